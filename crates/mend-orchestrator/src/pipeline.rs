//! Pipeline driver
//!
//! Owns every component and runs the two halves of an attempt:
//!
//! - reflection: formulate queries, judge them, gate them, publish one
//! - decision: consume the slot and, on approval, run
//!   checkpoint -> generate -> gate -> apply -> evaluate -> commit/rollback
//!
//! The state machine decides what happens; this module only executes the
//! actions it returns. Errors never escape: each one becomes a log line, an
//! alert and, once a checkpoint exists, a restore.

use crate::checkpoint::{CheckpointHandle, CheckpointManager};
use crate::control::ControlPlane;
use crate::goal::{GoalTracker, PHASE_FILE};
use crate::state_machine::{transition, Action, Event, State};
use mend_agent::GenerationClient;
use mend_core::{
    Decision, Goal, ImprovementQuery, MendConfig, MendError, PatchProposal, ProposalStatus,
    QueryOrigin, Result, TestCase,
};
use mend_patch::{apply_patch, Judgment, PatchGenerator, PolicyDecision, PolicyGate, QueryFormulator};
use mend_sandbox::{PythonRunner, SandboxEvaluator, SandboxRunner, Thresholds, Verdict};
use mend_vcs::{GitCommand, VcsExecutor, VersionControl};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of one reflection pass
#[derive(Debug, Clone)]
pub enum ReflectionOutcome {
    /// A proposal already occupies the slot (its id)
    AlreadyPending(String),
    /// Every phase is complete
    Terminal,
    Published(PatchProposal),
    /// No query survived judgment and the policy gate
    NoProposal,
}

/// Outcome of a decision, with a plain-text message for the operator
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub proposal: Option<PatchProposal>,
    pub final_state: Option<State>,
    pub verdict: Option<Verdict>,
    pub message: String,
}

impl AttemptReport {
    fn nothing_pending() -> Self {
        Self {
            proposal: None,
            final_state: None,
            verdict: None,
            message: "No pending proposal.".to_string(),
        }
    }

    pub fn committed(&self) -> bool {
        matches!(self.final_state, Some(State::Committed))
    }
}

/// Read-only snapshot for status surfaces
#[derive(Debug, Clone)]
pub struct PipelineStatus {
    pub goal: Goal,
    pub pending: Option<PatchProposal>,
    pub queued_alerts: usize,
    pub target: PathBuf,
}

/// Everything the pipeline needs besides the configuration
pub struct PipelineParts<R: SandboxRunner, E: VcsExecutor> {
    pub client: Arc<GenerationClient>,
    pub runner: R,
    pub vcs: Option<VersionControl<E>>,
    pub goals: GoalTracker,
    pub control: ControlPlane,
}

pub struct Pipeline<R: SandboxRunner, E: VcsExecutor> {
    target_name: String,
    target_path: PathBuf,
    entry_point: String,
    test_cases: Vec<TestCase>,
    formulator: QueryFormulator,
    generator: PatchGenerator,
    policy: PolicyGate,
    evaluator: SandboxEvaluator<R>,
    checkpoints: CheckpointManager<E>,
    goals: GoalTracker,
    control: ControlPlane,
    /// Serializes apply -> evaluate -> commit/rollback
    attempt_lock: Mutex<()>,
}

impl Pipeline<PythonRunner, GitCommand> {
    /// Production wiring: HTTP generation, Python sandbox, git when present
    pub async fn open(config: &MendConfig, repo_root: &Path) -> Result<Self> {
        let state_dir = config.state_path(repo_root);
        let client = GenerationClient::from_config(&config.generation, &state_dir).await?;
        let goals = GoalTracker::load(state_dir.join(PHASE_FILE), config.goals.phases.clone()).await;

        let vcs = GitCommand::detect(repo_root).map(VersionControl::new);
        if vcs.is_none() {
            info!("No git work tree at {:?}; file-level restore only", repo_root);
        }

        let parts = PipelineParts {
            client: Arc::new(client),
            runner: PythonRunner::from_config(&config.sandbox),
            vcs,
            goals,
            control: ControlPlane::new(config.reflection.alert_capacity),
        };
        Ok(Self::new(config, repo_root, parts))
    }
}

impl<R: SandboxRunner, E: VcsExecutor> Pipeline<R, E> {
    pub fn new(config: &MendConfig, repo_root: &Path, parts: PipelineParts<R, E>) -> Self {
        let generation = &config.generation;
        Self {
            target_name: config.target_file.clone(),
            target_path: config.target_path(repo_root),
            entry_point: config.entry_point.clone(),
            test_cases: config.test_cases.clone(),
            formulator: QueryFormulator::new(
                Arc::clone(&parts.client),
                generation.max_tokens,
                generation.temperature,
            ),
            generator: PatchGenerator::from_config(parts.client, &config.patch, generation),
            policy: PolicyGate::from_config(&config.policy),
            evaluator: SandboxEvaluator::new(parts.runner, Thresholds::from_config(&config.sandbox)),
            checkpoints: CheckpointManager::new(parts.vcs),
            goals: parts.goals,
            control: parts.control,
            attempt_lock: Mutex::new(()),
        }
    }

    pub fn control(&self) -> &ControlPlane {
        &self.control
    }

    pub fn goals(&self) -> &GoalTracker {
        &self.goals
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn status(&self) -> PipelineStatus {
        PipelineStatus {
            goal: self.goals.current(),
            pending: self.control.pending(),
            queued_alerts: self.control.alerts.len(),
            target: self.target_path.clone(),
        }
    }

    /// Manual phase advance
    pub async fn advance_goal(&self) -> Goal {
        let goal = self.goals.advance().await;
        self.control.alerts.push(format!("Goal set to {}", goal));
        goal
    }

    /// Formulate queries for the current goal and publish the first acceptable one
    pub async fn reflect(&self) -> ReflectionOutcome {
        if let Some(pending) = self.control.pending() {
            debug!("Reflection skipped, {} is pending", pending.id);
            return ReflectionOutcome::AlreadyPending(pending.id);
        }

        let goal = self.goals.current();
        let Some(phase) = self.goals.current_phase() else {
            info!("All phases complete, nothing to reflect on");
            return ReflectionOutcome::Terminal;
        };

        let queries = self.formulator.formulate(&goal, phase, &self.target_name).await;
        info!("Reflecting on {} with {} candidate queries", goal, queries.len());

        for query in queries {
            match self.formulator.judge(&query).await {
                Ok(Judgment::Incremental) => {}
                Ok(judgment) => {
                    info!("Dropping '{}': judged {:?}", query.text, judgment);
                    continue;
                }
                Err(e) => {
                    warn!(error_kind = e.kind(), "Could not judge '{}': {}", query.text, e);
                    continue;
                }
            }

            match self.offer(query, goal.index).await {
                Ok(proposal) => return ReflectionOutcome::Published(proposal),
                Err(MendError::ProposalPending(id)) => return ReflectionOutcome::AlreadyPending(id),
                Err(e) => debug!("Query not offered: {}", e),
            }
        }

        ReflectionOutcome::NoProposal
    }

    /// Publish an operator-written query, skipping the incrementality judgment
    pub async fn submit(&self, text: &str) -> Result<PatchProposal> {
        let text = text.trim();
        if text.is_empty() {
            return Err(MendError::Other("Query is empty".to_string()));
        }
        let query = ImprovementQuery::new(text, self.target_name.as_str(), QueryOrigin::Operator);
        self.offer(query, self.goals.current().index).await
    }

    /// Formulated -> PolicyChecked -> Pending
    async fn offer(&self, query: ImprovementQuery, phase: usize) -> Result<PatchProposal> {
        let mut no_checkpoint = None;

        let gate = self.policy.check(&query.text, phase);
        let event = match &gate {
            PolicyDecision::Accept => Event::PolicyPassed,
            PolicyDecision::Reject(reason) => Event::PolicyFailed {
                reason: reason.clone(),
            },
        };
        let state = self.drive(State::Formulated, event, &mut no_checkpoint).await;
        gate.into_result()?;

        let proposal = PatchProposal::new(query, self.test_cases.clone(), phase);
        let published = self.control.approvals.publish(proposal.clone());
        let event = match &published {
            Ok(()) => Event::Published,
            Err(e) => Event::PublishFailed {
                reason: e.to_string(),
            },
        };
        self.drive(state, event, &mut no_checkpoint).await;

        published.map(|()| proposal)
    }

    /// Act on the pending proposal
    pub async fn decide(&self, decision: Decision) -> AttemptReport {
        let Some(proposal) = self.control.approvals.consume(decision) else {
            return AttemptReport::nothing_pending();
        };

        let event = match decision {
            Decision::Approve => Event::Approved,
            Decision::Reject => Event::Declined,
        };
        let state = self.drive(State::Pending, event, &mut None).await;

        if state.is_terminal() {
            return self.report(proposal, state, None);
        }
        self.run_attempt(proposal, state).await
    }

    async fn run_attempt(&self, proposal: PatchProposal, state: State) -> AttemptReport {
        let _attempt = self.attempt_lock.lock().await;
        info!("Starting patch attempt for {}", proposal.id);

        let mut checkpoint = None;
        let mut verdict = None;

        let mut state = match self.checkpoints.snapshot(&self.target_path).await {
            Ok(handle) => {
                checkpoint = Some(handle);
                self.drive(state, Event::CheckpointTaken, &mut checkpoint).await
            }
            Err(e) => self.drive(state, error_event("checkpoint", &e), &mut checkpoint).await,
        };

        if !state.is_terminal() {
            let patched = match checkpoint.as_ref() {
                Some(handle) => self.patch_target(&proposal, handle).await,
                None => Err(MendError::Checkpoint("checkpoint missing".to_string())),
            };

            state = match patched {
                Ok(source) => {
                    let state = self.drive(state, Event::PatchApplied, &mut checkpoint).await;
                    let result = self
                        .evaluator
                        .evaluate(&source, &self.entry_point, &proposal.test_cases)
                        .await;
                    let event = Event::EvaluationFinished {
                        passed: result.passed,
                        summary: verdict_summary(&result),
                    };
                    verdict = Some(result);
                    self.drive(state, event, &mut checkpoint).await
                }
                Err(e) => self.drive(state, error_event("patch", &e), &mut checkpoint).await,
            };
        }

        if !state.is_terminal() {
            state = self.drive(state, Event::Finalized, &mut checkpoint).await;
        }

        if let Some(handle) = checkpoint.take() {
            error!("Attempt ended in {:?} with a live checkpoint, restoring", state);
            if let Err(e) = self.checkpoints.restore(handle).await {
                self.control
                    .alerts
                    .push(format!("CRITICAL: restore of {} failed: {}", self.target_name, e));
            }
        }

        self.report(proposal, state, verdict)
    }

    /// Generate, gate and apply a diff, then write the result to the target
    async fn patch_target(&self, proposal: &PatchProposal, handle: &CheckpointHandle) -> Result<String> {
        let source = std::str::from_utf8(handle.content())
            .map_err(|e| MendError::Checkpoint(format!("target is not UTF-8: {}", e)))?;

        let diff = self.generator.propose(&proposal.query, source).await?;
        self.policy.check(diff.as_text(), proposal.phase).into_result()?;

        let patched = apply_patch(source, &diff)?;
        self.checkpoints.write(handle, &patched).await?;
        Ok(patched)
    }

    /// Feed `event` and any follow-up events produced by failed actions
    async fn drive(
        &self,
        state: State,
        event: Event,
        checkpoint: &mut Option<CheckpointHandle>,
    ) -> State {
        let mut state = state;
        let mut next = Some(event);
        while let Some(event) = next.take() {
            let (new_state, actions) = transition(state, event);
            state = new_state;
            next = self.execute(actions, checkpoint).await;
        }
        state
    }

    async fn execute(
        &self,
        actions: Vec<Action>,
        checkpoint: &mut Option<CheckpointHandle>,
    ) -> Option<Event> {
        let mut follow_up = None;

        for action in actions {
            match action {
                Action::Log { message } => info!("{}", message),
                Action::Alert { message } => self.control.alerts.push(message),
                Action::CommitCheckpoint => {
                    let Some(handle) = checkpoint.as_ref() else {
                        follow_up = Some(Event::Error {
                            message: "no checkpoint to commit".to_string(),
                        });
                        continue;
                    };
                    match self.checkpoints.commit(handle).await {
                        Ok(()) => *checkpoint = None,
                        Err(e) => {
                            error!("Checkpoint commit failed: {}", e);
                            follow_up = Some(error_event("commit", &e));
                        }
                    }
                }
                Action::RestoreCheckpoint => match checkpoint.take() {
                    Some(handle) => {
                        if let Err(e) = self.checkpoints.restore(handle).await {
                            self.control.alerts.push(format!(
                                "CRITICAL: restore of {} failed: {}",
                                self.target_name, e
                            ));
                        }
                    }
                    None => debug!("No live checkpoint to restore"),
                },
                Action::AdvanceGoal => {
                    self.goals.advance().await;
                }
            }
        }

        follow_up
    }

    fn report(&self, mut proposal: PatchProposal, state: State, verdict: Option<Verdict>) -> AttemptReport {
        let message = match &state {
            State::Committed => {
                proposal.status = ProposalStatus::Applied;
                format!("Patch applied to {}; now at {}", self.target_name, self.goals.current())
            }
            State::RolledBack { reason } => {
                proposal.status = ProposalStatus::Failed;
                format!("Patch rolled back: {}", reason)
            }
            State::Rejected { reason } => {
                proposal.status = ProposalStatus::Rejected;
                format!("Proposal rejected: {}", reason)
            }
            other => format!("Attempt stopped in {:?}", other),
        };
        info!("{}: {}", proposal.id, message);

        AttemptReport {
            proposal: Some(proposal),
            final_state: Some(state),
            verdict,
            message,
        }
    }
}

fn error_event(stage: &str, error: &MendError) -> Event {
    Event::Error {
        message: format!("{} failed ({}): {}", stage, error.kind(), error),
    }
}

fn verdict_summary(verdict: &Verdict) -> String {
    if !verdict.passed {
        return verdict.failure_summary();
    }
    match &verdict.metrics {
        Some(m) => format!(
            "accuracy {:.2}, avg latency {:.3}s over {} case(s)",
            m.avg_accuracy, m.avg_latency_secs, m.cases
        ),
        None => "no test cases".to_string(),
    }
}
