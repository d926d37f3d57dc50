//! # mend-sandbox
//!
//! Isolated evaluation of candidate source text.
//!
//! This crate provides:
//! - [`SandboxRunner`]: probe a candidate and call its entry point per case
//! - [`PythonRunner`]: one isolated interpreter process per probe and per case
//! - [`SandboxEvaluator`]: aggregate case results into a [`Verdict`]
//!
//! Nothing here touches the live target file.

mod evaluator;
mod runner;

pub use evaluator::{AcceptanceCheck, CaseReport, CheckResult, SandboxEvaluator, Thresholds, Verdict};
pub use runner::{CaseOutcome, CaseRun, ProbeOutcome, PythonRunner, SandboxRunner, ScriptedRunner};
