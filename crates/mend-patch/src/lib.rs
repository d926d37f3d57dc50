//! # mend-patch
//!
//! Everything between "an improvement idea" and "new source text":
//!
//! - [`QueryFormulator`] produces improvement queries for the current goal and
//!   judges whether each is incremental
//! - [`PolicyGate`] filters queries and diffs lexically
//! - [`PatchGenerator`] asks the generation service for a unified diff
//! - [`UnifiedDiff`] and [`apply_patch`] parse and apply it, all-or-nothing

mod apply;
mod diff;
mod formulate;
mod generator;
mod policy;

pub use apply::apply_patch;
pub use diff::{Hunk, HunkLine, UnifiedDiff};
pub use formulate::{Judgment, QueryFormulator};
pub use generator::{build_patch_prompt, PatchGenerator};
pub use policy::{PolicyDecision, PolicyGate};
