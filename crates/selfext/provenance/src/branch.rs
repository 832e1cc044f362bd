//! Staging branch naming.

use std::fmt;
use std::path::Path;

use selfext_types::{ContextId, ExecutionContext};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::canonical::canonical_json;
use crate::slug::slugify;

/// Namespace under which every staging branch is created.
pub const BRANCH_PREFIX: &str = "jarvis/self-extension";

/// Hex characters of the change fingerprint kept in the branch name.
const FINGERPRINT_LEN: usize = 16;

/// A fully-formed staging branch name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BranchName(String);

impl BranchName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BranchName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// SHA-256 of the candidate source, lowercase hex.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Truncated hash of `{toolName, filePath, contentHash}`.
pub fn fingerprint(tool_name: &str, file_path: &Path, content_hash: &str) -> String {
    let keyed = json!({
        "toolName": tool_name,
        "filePath": file_path.to_string_lossy(),
        "contentHash": content_hash,
    });
    let digest = format!("{:x}", Sha256::digest(canonical_json(&keyed).as_bytes()));
    digest[..FINGERPRINT_LEN].to_string()
}

/// Derive the staging branch for a change.
///
/// Identical `(context, file, content)` always yields the identical name.
pub fn build_branch_name(
    ctx: &ExecutionContext,
    file_path: &Path,
    content_hash: &str,
) -> BranchName {
    let tool = slugify(&ctx.tool_name, "tool");
    let goal = id_token(ctx.goal_id.as_ref(), "goal");
    let cycle = id_token(ctx.cycle_id.as_ref(), "cycle");
    let sub_goal = id_token(ctx.sub_goal_id.as_ref(), "subgoal");
    let fp = fingerprint(&ctx.tool_name, file_path, content_hash);

    BranchName(format!(
        "{BRANCH_PREFIX}/{tool}/g{goal}-c{cycle}-s{sub_goal}-{fp}"
    ))
}

fn id_token(id: Option<&ContextId>, fallback: &str) -> String {
    match id {
        Some(id) => slugify(&id.to_string(), fallback),
        None => fallback.to_string(),
    }
}
