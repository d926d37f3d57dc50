//! Pure state machine for one patch attempt
//!
//! This module implements a pure functional state machine with NO I/O.
//! The pipeline feeds it events and executes the actions it returns.
//!
//! Key design principles:
//! - Pure function: transition(state, event) -> (state, actions)
//! - Never panics; unexpected events end the attempt
//! - Once a checkpoint exists, every path that does not reach `Committed`
//!   goes through `RolledBack` and emits `RestoreCheckpoint`
//! - Terminal states absorb all further events unchanged

/// Attempt state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Query produced and judged incremental
    Formulated,
    /// Query passed the policy gate
    PolicyChecked,
    /// Published to the approval slot
    Pending,
    /// Operator approved
    Approved,
    /// Target snapshotted; writes are now allowed
    Checkpointed,
    /// Patched text written to the target
    Applied,
    /// Sandbox verdict known
    Evaluated { passed: bool, summary: String },
    Committed,
    RolledBack { reason: String },
    Rejected { reason: String },
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Committed | Self::RolledBack { .. } | Self::Rejected { .. }
        )
    }

    /// Whether the target may differ from its checkpoint in this state
    pub fn holds_checkpoint(&self) -> bool {
        matches!(self, Self::Checkpointed | Self::Applied | Self::Evaluated { .. })
    }
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PolicyPassed,
    PolicyFailed { reason: String },
    Published,
    PublishFailed { reason: String },
    Approved,
    Declined,
    CheckpointTaken,
    PatchApplied,
    EvaluationFinished { passed: bool, summary: String },
    /// Outcome actions of `Evaluated` completed
    Finalized,
    Error { message: String },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Log { message: String },
    Alert { message: String },
    CommitCheckpoint,
    RestoreCheckpoint,
    AdvanceGoal,
}

fn log(message: impl Into<String>) -> Action {
    Action::Log {
        message: message.into(),
    }
}

fn alert(message: impl Into<String>) -> Action {
    Action::Alert {
        message: message.into(),
    }
}

fn rejected(reason: String) -> (State, Vec<Action>) {
    let actions = vec![
        log(format!("Proposal rejected: {}", reason)),
        alert(format!("Proposal rejected: {}", reason)),
    ];
    (State::Rejected { reason }, actions)
}

fn rolled_back(reason: String) -> (State, Vec<Action>) {
    let actions = vec![
        log(format!("Rolling back: {}", reason)),
        Action::RestoreCheckpoint,
        alert(format!("Patch rolled back: {}", reason)),
    ];
    (State::RolledBack { reason }, actions)
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
///
/// # Invalid Transitions
/// Before a checkpoint exists an invalid event rejects the attempt. After
/// that it rolls the attempt back. This function never panics.
pub fn transition(state: State, event: Event) -> (State, Vec<Action>) {
    match (state, event) {
        // Terminal states absorb everything
        (state, event) if state.is_terminal() => {
            let message = format!("Ignoring {:?} in terminal state {:?}", event, state);
            (state, vec![log(message)])
        }

        (State::Formulated, Event::PolicyPassed) => {
            (State::PolicyChecked, vec![log("Query passed policy gate")])
        }
        (State::Formulated, Event::PolicyFailed { reason }) => {
            rejected(format!("policy violation: {}", reason))
        }

        (State::PolicyChecked, Event::Published) => (
            State::Pending,
            vec![
                log("Proposal published"),
                alert("Patch proposal awaiting approval"),
            ],
        ),
        (State::PolicyChecked, Event::PublishFailed { reason }) => rejected(reason),

        (State::Pending, Event::Approved) => (State::Approved, vec![log("Proposal approved")]),
        (State::Pending, Event::Declined) => rejected("declined by operator".to_string()),

        (State::Approved, Event::CheckpointTaken) => {
            (State::Checkpointed, vec![log("Checkpoint taken")])
        }

        (State::Checkpointed, Event::PatchApplied) => {
            (State::Applied, vec![log("Patched source written to target")])
        }

        (State::Applied, Event::EvaluationFinished { passed: true, summary }) => (
            State::Evaluated {
                passed: true,
                summary: summary.clone(),
            },
            vec![log(format!("Evaluation passed: {}", summary)), Action::CommitCheckpoint],
        ),
        (State::Applied, Event::EvaluationFinished { passed: false, summary }) => (
            State::Evaluated {
                passed: false,
                summary: summary.clone(),
            },
            vec![log(format!("Evaluation failed: {}", summary)), Action::RestoreCheckpoint],
        ),

        (State::Evaluated { passed: true, .. }, Event::Finalized) => (
            State::Committed,
            vec![
                log("Patch committed"),
                Action::AdvanceGoal,
                alert("Patch applied successfully"),
            ],
        ),
        (State::Evaluated { passed: false, summary }, Event::Finalized) => {
            let actions = vec![
                log(format!("Rolled back: {}", summary)),
                alert(format!("Patch rolled back: {}", summary)),
            ];
            (State::RolledBack { reason: summary }, actions)
        }

        // Errors
        (state, Event::Error { message }) if state.holds_checkpoint() => rolled_back(message),
        (_, Event::Error { message }) => rejected(message),

        // All other invalid transitions
        (state, event) => {
            let reason = format!("invalid transition: {:?} cannot handle {:?}", state, event);
            if state.holds_checkpoint() {
                rolled_back(reason)
            } else {
                rejected(reason)
            }
        }
    }
}
