//! # mend-orchestrator
//!
//! Drives patch attempts for mend.
//!
//! This crate provides:
//! - A pure state machine for one attempt (`transition`)
//! - Checkpoint and rollback of the target file
//! - Goal tracking with a persisted phase record
//! - The single-slot approval store and the alert queue
//! - The pipeline driver and its background reflection task

mod alerts;
mod approval;
mod checkpoint;
mod control;
mod goal;
mod pipeline;
mod reflection;
mod state_machine;

pub use alerts::AlertQueue;
pub use approval::PendingApprovalStore;
pub use checkpoint::{
    backup_path_for, CheckpointHandle, CheckpointManager, RestoreSource, RollbackResult,
    SUCCESS_COMMIT_MESSAGE,
};
pub use control::ControlPlane;
pub use goal::{GoalTracker, PHASE_FILE};
pub use pipeline::{AttemptReport, Pipeline, PipelineParts, PipelineStatus, ReflectionOutcome};
pub use reflection::spawn_reflection_task;
pub use state_machine::{transition, Action, Event, State};
