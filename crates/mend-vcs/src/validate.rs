//! Input validation for git arguments
//!
//! Commit ids and paths are passed as separate argv entries, never through a
//! shell, but a value starting with `-` would still be read as an option.

use mend_core::{MendError, Result};

/// Validate a commit id as printed by `git rev-parse HEAD`
pub fn validate_commit_id(input: &str) -> Result<&str> {
    let len_ok = (7..=64).contains(&input.len());
    if len_ok && input.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(input)
    } else {
        Err(MendError::Vcs(format!("Invalid commit id: '{}'", input)))
    }
}

/// Validate a repository-relative path
///
/// Rejects empty input, option-like values, directory traversal and null bytes.
pub fn validate_path(input: &str) -> Result<&str> {
    if input.is_empty() {
        return Err(MendError::Vcs("Path cannot be empty".to_string()));
    }
    if input.starts_with('-') {
        return Err(MendError::Vcs(format!("Path looks like an option: '{}'", input)));
    }
    if input.split(['/', '\\']).any(|part| part == "..") {
        return Err(MendError::Vcs(format!(
            "Path contains directory traversal: '{}'",
            input
        )));
    }
    if input.contains('\0') {
        return Err(MendError::Vcs("Path contains null byte".to_string()));
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_ids() {
        assert!(validate_commit_id("abc1234").is_ok());
        assert!(validate_commit_id("0123456789abcdef0123456789abcdef01234567").is_ok());
        assert!(validate_commit_id("abc").is_err());
        assert!(validate_commit_id("--force").is_err());
        assert!(validate_commit_id("HEAD~1").is_err());
    }

    #[test]
    fn test_paths() {
        assert!(validate_path("core.py").is_ok());
        assert!(validate_path("src/app/core.py").is_ok());
        assert!(validate_path("").is_err());
        assert!(validate_path("-p").is_err());
        assert!(validate_path("../etc/passwd").is_err());
        assert!(validate_path("a\0b").is_err());
    }
}
