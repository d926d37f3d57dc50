//! # mend-core
//!
//! Core types for the mend self-patching pipeline.
//!
//! mend proposes a small change to a running program, asks a human to
//! approve it, applies it as a unified diff, validates the result in a
//! sandbox and then either keeps it or restores the previous source.
//!
//! ## Core Paradigm
//!
//! - One proposal at a time (the approval slot is single-occupancy)
//! - Every write to the target is preceded by a checkpoint
//! - A failed attempt always leaves the target byte-for-byte unchanged
//! - The goal only moves forward after a committed attempt

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::MendConfig;
pub use error::{MendError, Result};
pub use types::*;
