//! Unified diff model and strict parser
//!
//! Accepted shape, and nothing else:
//!
//! ```text
//! --- a/core.py
//! +++ b/core.py
//! @@ -3,2 +3,2 @@
//!  context
//! -removed
//! +added
//! ```
//!
//! Exactly one file section. Hunk bodies must contain exactly the number of
//! old/new lines their header declares.

use mend_core::{MendError, Result};
use regex::Regex;
use std::sync::OnceLock;

const HUNK_HEADER_PATTERN: &str = r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@";

static HUNK_HEADER: OnceLock<Regex> = OnceLock::new();

fn hunk_header() -> Result<&'static Regex> {
    if let Some(re) = HUNK_HEADER.get() {
        return Ok(re);
    }
    let re = Regex::new(HUNK_HEADER_PATTERN)
        .map_err(|e| MendError::Other(format!("Invalid hunk header pattern: {}", e)))?;
    Ok(HUNK_HEADER.get_or_init(|| re))
}

/// One body line of a hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Removed(String),
    Added(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Context(s) | Self::Removed(s) | Self::Added(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based line in the old text (0 only for pure insertions at the top)
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines the hunk expects to find in the source
    pub fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(s) | HunkLine::Removed(s) => Some(s.as_str()),
            HunkLine::Added(_) => None,
        })
    }

    /// Lines the hunk leaves behind
    pub fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().filter_map(|line| match line {
            HunkLine::Context(s) | HunkLine::Added(s) => Some(s.as_str()),
            HunkLine::Removed(_) => None,
        })
    }
}

/// A parsed single-file unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub source: String,
    pub target: String,
    pub hunks: Vec<Hunk>,
    text: String,
}

impl UnifiedDiff {
    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().peekable();

        let source = lines
            .next()
            .and_then(|l| l.strip_prefix("--- "))
            .ok_or_else(|| MendError::MalformedDiff("Missing '---' header".to_string()))?;
        let target = lines
            .next()
            .and_then(|l| l.strip_prefix("+++ "))
            .ok_or_else(|| MendError::MalformedDiff("Missing '+++' header".to_string()))?;

        let header = hunk_header()?;
        let mut hunks = Vec::new();

        while let Some(line) = lines.next() {
            if line.trim().is_empty() && hunks.is_empty() {
                continue;
            }

            let caps = match header.captures(line) {
                Some(caps) => caps,
                None if line.trim().is_empty() => continue,
                None if line.starts_with("--- ") => {
                    return Err(MendError::MalformedDiff(
                        "Only single-file diffs are accepted".to_string(),
                    ))
                }
                None => {
                    return Err(MendError::MalformedDiff(format!(
                        "Expected hunk header, found: {}",
                        line
                    )))
                }
            };

            let number = |i: usize, default: usize| -> Result<usize> {
                match caps.get(i) {
                    Some(m) => m.as_str().parse().map_err(|_| {
                        MendError::MalformedDiff(format!("Bad number in hunk header: {}", line))
                    }),
                    None => Ok(default),
                }
            };
            let old_start = number(1, 0)?;
            let old_len = number(2, 1)?;
            let new_start = number(3, 0)?;
            let new_len = number(4, 1)?;

            let index = hunks.len() + 1;
            let mut body = Vec::new();
            let (mut old_seen, mut new_seen) = (0, 0);

            while old_seen < old_len || new_seen < new_len {
                let Some(raw) = lines.next() else {
                    return Err(MendError::MalformedDiff(format!(
                        "Hunk {} ends early ({}/{} old, {}/{} new lines)",
                        index, old_seen, old_len, new_seen, new_len
                    )));
                };

                let parsed = if raw.is_empty() {
                    // Blank context lines often lose their leading space
                    HunkLine::Context(String::new())
                } else if raw.starts_with('\\') {
                    continue;
                } else {
                    let mut chars = raw.chars();
                    let marker = chars.next();
                    let rest = chars.as_str().to_string();
                    match marker {
                        Some(' ') => HunkLine::Context(rest),
                        Some('-') => HunkLine::Removed(rest),
                        Some('+') => HunkLine::Added(rest),
                        _ => {
                            return Err(MendError::MalformedDiff(format!(
                                "Unexpected line in hunk {}: {}",
                                index, raw
                            )))
                        }
                    }
                };

                match parsed {
                    HunkLine::Context(_) => {
                        old_seen += 1;
                        new_seen += 1;
                    }
                    HunkLine::Removed(_) => old_seen += 1,
                    HunkLine::Added(_) => new_seen += 1,
                }
                if old_seen > old_len || new_seen > new_len {
                    return Err(MendError::MalformedDiff(format!(
                        "Hunk {} body does not match its header counts",
                        index
                    )));
                }
                body.push(parsed);
            }

            while lines.peek().is_some_and(|l| l.starts_with('\\')) {
                lines.next();
            }

            hunks.push(Hunk {
                old_start,
                old_len,
                new_start,
                new_len,
                lines: body,
            });
        }

        if hunks.is_empty() {
            return Err(MendError::MalformedDiff("Diff contains no hunks".to_string()));
        }

        Ok(Self {
            source: source.trim().to_string(),
            target: target.trim().to_string(),
            hunks,
            text: text.to_string(),
        })
    }

    /// Total body lines across all hunks
    pub fn hunk_line_count(&self) -> usize {
        self.hunks.iter().map(|h| h.lines.len()).sum()
    }

    /// The diff as it was received
    pub fn as_text(&self) -> &str {
        &self.text
    }
}
