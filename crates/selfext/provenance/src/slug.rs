/// Maximum length of a single branch-name token.
pub const TOKEN_MAX_LEN: usize = 40;

/// Reduce an identifier to a branch-safe token.
///
/// Lowercases, collapses every run of characters outside `[a-z0-9]` into a
/// single `-`, strips leading/trailing `-`, and caps the result at
/// [`TOKEN_MAX_LEN`]. An empty result becomes `fallback`.
pub fn slugify(value: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;

    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch);
        } else {
            pending_dash = true;
        }
    }

    out.truncate(TOKEN_MAX_LEN);
    let trimmed = out.trim_end_matches('-');

    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
