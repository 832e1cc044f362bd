//! Harness scripts that load a compiled module and report one JSON line.
//!
//! Protocol: the harness's stdout carries exactly one line
//! `{"passed":bool,"output"?:any,"error"?:string}`. Everything the candidate
//! prints goes to stderr. The test input arrives as JSON in `SANDBOX_INPUT`.

use std::path::Path;

use crate::config::SandboxRuntime;

/// Environment variable carrying the JSON test input.
pub const INPUT_ENV: &str = "SANDBOX_INPUT";

/// Generate the harness for `runtime` that loads the module at `module`.
pub fn render(runtime: SandboxRuntime, module: &Path) -> String {
    match runtime {
        SandboxRuntime::Shell => shell(module),
        SandboxRuntime::Node => node(module),
    }
}

fn shell(module: &Path) -> String {
    let module = shell_quote(&module.to_string_lossy());
    format!(
        r#"# fd 3 is the report channel; candidate stdout goes to stderr.
exec 3>&1 1>&2

__sandbox_escape() {{
  printf '%s' "$1" \
    | tr -d '\000-\010\013-\037' \
    | sed -e 's/\\/\\\\/g' -e 's/"/\\"/g' -e 's/	/\\t/g' \
    | awk 'NR > 1 {{ printf "%s", "\\n" }} {{ printf "%s", $0 }}'
}}

__sandbox_fail() {{
  printf '{{"passed":false,"error":"%s"}}\n' "$(__sandbox_escape "$1")" >&3
  exit 0
}}

. {module}

command -v execute >/dev/null 2>&1 || __sandbox_fail "module does not define an execute function"

__sandbox_output=$(execute "${input_env}")
__sandbox_status=$?

if [ "$__sandbox_status" -ne 0 ]; then
  if [ -n "$__sandbox_output" ]; then
    __sandbox_fail "$__sandbox_output"
  fi
  __sandbox_fail "execute exited with status $__sandbox_status"
fi

printf '{{"passed":true,"output":"%s"}}\n' "$(__sandbox_escape "$__sandbox_output")" >&3
exit 0
"#,
        input_env = INPUT_ENV,
    )
}

fn node(module: &Path) -> String {
    let module = serde_json::Value::String(module.to_string_lossy().into_owned()).to_string();
    format!(
        r#"'use strict';

const report = (message) => {{
  process.stdout.write(JSON.stringify(message) + '\n');
}};
const toStderr = (...args) => {{
  process.stderr.write(args.map((a) => (typeof a === 'string' ? a : JSON.stringify(a))).join(' ') + '\n');
}};
console.log = toStderr;
console.info = toStderr;
console.debug = toStderr;

const errorText = (err) => (err && err.message ? String(err.message) : String(err));

(async () => {{
  let mod;
  try {{
    mod = require({module});
  }} catch (err) {{
    report({{ passed: false, error: 'failed to load module: ' + errorText(err) }});
    return;
  }}

  const execute =
    typeof mod === 'function'
      ? mod
      : mod && typeof mod.execute === 'function'
        ? mod.execute
        : mod && mod.default && typeof mod.default.execute === 'function'
          ? mod.default.execute
          : undefined;
  if (typeof execute !== 'function') {{
    report({{ passed: false, error: 'module does not export an execute function' }});
    return;
  }}

  const controller = new AbortController();
  try {{
    const input = JSON.parse(process.env.{input_env} || 'null');
    const output = await execute(input, controller.signal);
    report(output === undefined ? {{ passed: true }} : {{ passed: true, output }});
  }} catch (err) {{
    report({{ passed: false, error: errorText(err) }});
  }}
}})();
"#,
        input_env = INPUT_ENV,
    )
}

/// Single-quote a string for POSIX sh.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
