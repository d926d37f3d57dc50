//! Unified error types for mend

use thiserror::Error;

/// Unified error type for all mend operations
#[derive(Error, Debug)]
pub enum MendError {
    // Generation service errors
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("API limit: {0}")]
    ApiLimit(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    // Proposal errors
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("A proposal is already pending approval: {0}")]
    ProposalPending(String),

    // Diff errors
    #[error("Malformed diff: {0}")]
    MalformedDiff(String),

    #[error("Diff too large: {lines} hunk lines (max {max})")]
    OversizedDiff { lines: usize, max: usize },

    #[error("Hunk {hunk} does not match source at line {line}: {reason}")]
    DiffApplyMismatch {
        hunk: usize,
        line: usize,
        reason: String,
    },

    // Sandbox errors
    #[error("Sandbox failure: {0}")]
    Sandbox(String),

    // Checkpoint / rollback errors
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Target is busy with another attempt: {0}")]
    TargetBusy(String),

    // Goal persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    // Version control errors
    #[error("VCS command failed: {0}")]
    Vcs(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl MendError {
    /// Short stable label for alerts and log fields
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Generation(_) | Self::MissingCredential(_) | Self::ApiLimit(_) => "generation",
            Self::Timeout(_) => "timeout",
            Self::PolicyViolation(_) => "policy",
            Self::ProposalPending(_) => "pending",
            Self::MalformedDiff(_) | Self::OversizedDiff { .. } => "malformed_diff",
            Self::DiffApplyMismatch { .. } => "apply_mismatch",
            Self::Sandbox(_) => "sandbox",
            Self::Checkpoint(_) | Self::TargetBusy(_) => "checkpoint",
            Self::Persistence(_) => "persistence",
            Self::Vcs(_) => "vcs",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Other(_) => "other",
        }
    }

    /// Whether this error means "the generation service gave us nothing usable"
    pub fn is_generation_failure(&self) -> bool {
        matches!(
            self,
            Self::Generation(_) | Self::MissingCredential(_) | Self::ApiLimit(_) | Self::Timeout(_)
        )
    }
}

/// Result type alias using MendError
pub type Result<T> = std::result::Result<T, MendError>;
