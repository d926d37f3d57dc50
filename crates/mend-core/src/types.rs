//! Core type definitions for the mend pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The current improvement goal
///
/// `index` counts from zero. Once `index` reaches the number of configured
/// phases the goal is terminal and the pipeline has nothing left to pursue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub index: usize,
    pub description: String,
    pub terminal: bool,
}

impl Goal {
    pub fn new(index: usize, description: impl Into<String>, phase_count: usize) -> Self {
        Self {
            index,
            description: description.into(),
            terminal: index >= phase_count,
        }
    }
}

impl std::fmt::Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.terminal {
            write!(f, "phase {} (terminal): {}", self.index, self.description)
        } else {
            write!(f, "phase {}: {}", self.index, self.description)
        }
    }
}

/// Where an improvement query came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryOrigin {
    /// Configured seed query for the phase
    Seed,
    /// Idea produced by the generation service
    Generated,
    /// Typed in by the operator (`mend patch`)
    Operator,
}

/// Free-text description of a proposed change to one source unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovementQuery {
    pub text: String,
    pub target: String,
    pub origin: QueryOrigin,
}

impl ImprovementQuery {
    pub fn new(text: impl Into<String>, target: impl Into<String>, origin: QueryOrigin) -> Self {
        Self {
            text: text.into(),
            target: target.into(),
            origin,
        }
    }
}

/// A single (input, expected output) pair for the sandbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: serde_json::Value,
    pub expected: serde_json::Value,
}

impl TestCase {
    pub fn new(input: impl Into<serde_json::Value>, expected: impl Into<serde_json::Value>) -> Self {
        Self {
            input: input.into(),
            expected: expected.into(),
        }
    }
}

/// Lifecycle status of a patch proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Applied,
    Failed,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Approved => write!(f, "approved"),
            Self::Rejected => write!(f, "rejected"),
            Self::Applied => write!(f, "applied"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A candidate change awaiting or undergoing the patch pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchProposal {
    pub id: String,
    pub query: ImprovementQuery,
    pub target: String,
    pub test_cases: Vec<TestCase>,
    pub status: ProposalStatus,
    /// Goal index the proposal was formulated under
    pub phase: usize,
    pub created_at: DateTime<Utc>,
}

impl PatchProposal {
    pub fn new(query: ImprovementQuery, test_cases: Vec<TestCase>, phase: usize) -> Self {
        Self {
            id: format!("prop-{}", &Uuid::new_v4().to_string()[..8]),
            target: query.target.clone(),
            query,
            test_cases,
            status: ProposalStatus::Pending,
            phase,
            created_at: Utc::now(),
        }
    }
}

/// Approve/reject token from the decision surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "y" | "yes" => Ok(Self::Approve),
            "reject" | "n" | "no" => Ok(Self::Reject),
            _ => Err(format!("Invalid decision: {}. Use approve or reject.", s)),
        }
    }
}

/// Aggregated results of running test cases against a candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Mean per-case latency in seconds
    pub avg_latency_secs: f64,
    /// Fraction of cases whose output matched (0.0 - 1.0)
    pub avg_accuracy: f64,
    pub cases: usize,
}

impl PerformanceMetrics {
    /// Aggregate (latency, correct) samples; `None` when there are no samples
    pub fn from_samples(samples: &[(f64, bool)]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let total_latency: f64 = samples.iter().map(|(t, _)| t).sum();
        let correct = samples.iter().filter(|(_, ok)| *ok).count() as f64;
        Some(Self {
            avg_latency_secs: total_latency / n,
            avg_accuracy: correct / n,
            cases: samples.len(),
        })
    }
}

/// Short operator-facing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for Alert {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.raised_at.format("%H:%M:%S"), self.message)
    }
}
