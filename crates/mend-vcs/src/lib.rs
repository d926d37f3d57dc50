//! # mend-vcs
//!
//! Git integration for mend.
//!
//! This crate provides:
//! - Git command execution abstraction (real and mock executors)
//! - Pre-modification and success commits
//! - Per-path restore from a recorded commit

mod command;
mod repo;
mod validate;

pub use command::{GitCommand, MockVcsExecutor, VcsExecutor, VcsOutput};
pub use repo::{VersionControl, PRE_MODIFICATION_MESSAGE};
pub use validate::{validate_commit_id, validate_path};
