//! Allowlist validation for paths taken from plan documents.
//!
//! Child references and `file:` artifacts come from human-edited text and end
//! up joined onto real directories, so they are checked before use.

/// Maximum accepted length of a document-supplied path.
pub const MAX_PATH_LEN: usize = 255;

/// Validate a document-supplied relative path.
///
/// Accepts only relative paths built from `[A-Za-z0-9._/-]`, without `..`
/// components, empty components, leading separators or drive letters. A
/// component may not start with `-`, so it is never read as an option.
/// Returns the rejection reason on failure.
pub fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("path is empty".to_string());
    }
    if path.len() > MAX_PATH_LEN {
        return Err(format!("path exceeds {} characters", MAX_PATH_LEN));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err("absolute paths are not allowed".to_string());
    }
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err("drive-letter paths are not allowed".to_string());
    }
    if let Some(bad) = path
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')))
    {
        return Err(format!("character {:?} is not allowed", bad));
    }

    let trimmed = path.strip_suffix('/').unwrap_or(path);
    for component in trimmed.split('/') {
        match component {
            "" => return Err("path contains an empty component".to_string()),
            ".." => return Err("path traversal ('..') is not allowed".to_string()),
            c if c.starts_with('-') => {
                return Err(format!("component {:?} starts with '-'", c));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Convenience wrapper for boolean checks.
pub fn is_safe_relative_path(path: &str) -> bool {
    validate_relative_path(path).is_ok()
}
