//! In-memory diff application
//!
//! Hunks are anchored exactly at their declared old-side line numbers. There
//! is no fuzz search: if the source has drifted the whole apply fails. The
//! input text is borrowed, so a failed apply cannot leave partial edits.

use crate::diff::UnifiedDiff;
use mend_core::{MendError, Result};

/// Apply every hunk of `diff` to `source`, or none of them
pub fn apply_patch(source: &str, diff: &UnifiedDiff) -> Result<String> {
    let original: Vec<&str> = source.lines().collect();
    let mut output: Vec<&str> = Vec::with_capacity(original.len() + diff.hunk_line_count());
    let mut cursor = 0;

    for (i, hunk) in diff.hunks.iter().enumerate() {
        let number = i + 1;
        let mismatch = |line: usize, reason: String| MendError::DiffApplyMismatch {
            hunk: number,
            line,
            reason,
        };

        // A zero-length old side means "insert after old_start"
        let anchor = if hunk.old_len == 0 {
            hunk.old_start
        } else if hunk.old_start == 0 {
            return Err(mismatch(0, "old range starts at line 0".to_string()));
        } else {
            hunk.old_start - 1
        };

        if anchor < cursor {
            return Err(mismatch(
                hunk.old_start,
                "overlaps or precedes the previous hunk".to_string(),
            ));
        }
        let end = match anchor.checked_add(hunk.old_len) {
            Some(end) if end <= original.len() => end,
            _ => return Err(mismatch(
                hunk.old_start,
                format!(
                    "range extends past end of source ({} lines)",
                    original.len()
                ),
            )),
        };

        for (offset, expected) in hunk.old_lines().enumerate() {
            let found = original[anchor + offset];
            if found.trim_end() != expected.trim_end() {
                return Err(mismatch(
                    anchor + offset + 1,
                    format!("expected {:?}, found {:?}", expected, found),
                ));
            }
        }

        output.extend_from_slice(&original[cursor..anchor]);
        output.extend(hunk.new_lines());
        cursor = end;
    }

    output.extend_from_slice(&original[cursor..]);

    let mut patched = output.join("\n");
    if !patched.is_empty() && (source.ends_with('\n') || source.is_empty()) {
        patched.push('\n');
    }
    Ok(patched)
}
