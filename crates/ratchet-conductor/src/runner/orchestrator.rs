use crate::agent::{ChangeProducer, ChangeRequest};
use crate::checkpoint::{CheckpointError, Checkpointer, Workspace};
use crate::runner::event_log::{Event, EventLogger};
use crate::validate::TestRunner;
use ratchet_core::{
    rollback, AgentOutcome, Attempt, AttemptLedger, RetryPolicy, RollbackDecision, Snapshot,
    TestOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Limits for one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_rollback_threshold")]
    pub rollback_threshold: u32,
    /// Checkpoint the untouched workspace as a stable snapshot (attempt 0)
    /// before the first attempt, giving rollback a target.
    #[serde(default)]
    pub baseline: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            rollback_threshold: default_rollback_threshold(),
            baseline: false,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_rollback_threshold() -> u32 {
    2
}

impl RunConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.rollback_threshold)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Attempting,
    Evaluating,
    Continuing,
    Succeeded,
    RollingBack,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
}

/// Why a run ended `Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Cancelled,
    InvalidSequence,
    CheckpointFailed,
    RestoreFailed,
    /// Rollback was indicated but no stable snapshot exists.
    NoStableCheckpoint,
    /// Out of attempts and rollback was not indicated.
    RetriesExhausted,
    /// Workspace was restored to the last stable snapshot.
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub attempts: Vec<Attempt>,
    pub snapshots: Vec<Snapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackDecision>,
    /// States visited, in order.
    pub states: Vec<RunState>,
}

impl RunResult {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }
}

/// How the state machine ended, before the result is assembled.
struct Terminal {
    outcome: RunOutcome,
    failure: Option<FailureKind>,
    error: Option<String>,
    final_snapshot_id: Option<String>,
    rollback: Option<RollbackDecision>,
}

impl Terminal {
    fn succeeded(final_snapshot_id: Option<String>) -> Self {
        Self {
            outcome: RunOutcome::Succeeded,
            failure: None,
            error: None,
            final_snapshot_id,
            rollback: None,
        }
    }

    fn failed(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            outcome: RunOutcome::Failed,
            failure: Some(kind),
            error: Some(error.into()),
            final_snapshot_id: None,
            rollback: None,
        }
    }
}

impl From<CheckpointError> for Terminal {
    fn from(e: CheckpointError) -> Self {
        let kind = match e {
            CheckpointError::RestoreFailed { .. } => FailureKind::RestoreFailed,
            CheckpointError::Failed(_) | CheckpointError::OutOfOrder { .. } => {
                FailureKind::CheckpointFailed
            }
        };
        Terminal::failed(kind, e.to_string())
    }
}

/// Drives one task through attempt → test → checkpoint → decision until it
/// succeeds or the decision layer gives up.
///
/// Owns the ledger and checkpoint history for the duration of [`run`](Self::run);
/// collaborators are shared handles so callers can keep inspecting them.
pub struct Orchestrator {
    producer: Arc<dyn ChangeProducer>,
    tests: Arc<dyn TestRunner>,
    workspace: Arc<dyn Workspace>,
    config: RunConfig,
    task_name: String,
    event_log: Option<EventLogger>,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        producer: Arc<dyn ChangeProducer>,
        tests: Arc<dyn TestRunner>,
        workspace: Arc<dyn Workspace>,
        config: RunConfig,
    ) -> Self {
        Self {
            producer,
            tests,
            workspace,
            config,
            task_name: "task".into(),
            event_log: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Name used for producer session ids and event records.
    pub fn with_task_name(mut self, name: impl Into<String>) -> Self {
        self.task_name = name.into();
        self
    }

    pub fn with_event_log(mut self, log: EventLogger) -> Self {
        self.event_log = Some(log);
        self
    }

    /// Token that stops the run before the next attempt or evaluation. Also
    /// handed to the producer so in-flight work can stop early.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn emit(&mut self, event: Event) {
        if let Some(log) = &mut self.event_log {
            log.record(event);
        }
    }

    pub async fn run(&mut self, task: &str) -> RunResult {
        let run_id = format!("run_{}", ulid::Ulid::new().to_string().to_lowercase());
        info!(%run_id, task = %self.task_name, "run started");
        self.emit(Event::RunStart {
            run_id: run_id.clone(),
            task_name: self.task_name.clone(),
            max_attempts: self.config.max_attempts,
            rollback_threshold: self.config.rollback_threshold,
        });

        // Local handle so the checkpointer borrow doesn't pin `self`.
        let workspace = Arc::clone(&self.workspace);
        let mut checkpointer = Checkpointer::new(workspace.as_ref());
        let mut ledger = AttemptLedger::new();
        let mut states = vec![RunState::Idle];

        let mut terminal = self
            .drive(task, &mut ledger, &mut checkpointer, &mut states)
            .await;

        if terminal.outcome == RunOutcome::Failed && terminal.final_snapshot_id.is_none() {
            terminal.final_snapshot_id = checkpointer.last().map(|s| s.id.clone());
        }

        let attempts = ledger.into_attempts();
        match terminal.outcome {
            RunOutcome::Succeeded => {
                info!(%run_id, attempts = attempts.len(), "run succeeded");
                self.emit(Event::RunSucceeded {
                    attempts: attempts.len(),
                    final_snapshot_id: terminal.final_snapshot_id.clone(),
                });
            }
            RunOutcome::Failed => {
                let reason = terminal.error.clone().unwrap_or_default();
                warn!(%run_id, attempts = attempts.len(), %reason, "run failed");
                self.emit(Event::RunFailed {
                    attempts: attempts.len(),
                    reason,
                });
            }
        }

        RunResult {
            run_id,
            outcome: terminal.outcome,
            attempts,
            snapshots: checkpointer.snapshots().to_vec(),
            final_snapshot_id: terminal.final_snapshot_id,
            error: terminal.error,
            failure: terminal.failure,
            rollback: terminal.rollback,
            states,
        }
    }

    async fn drive(
        &mut self,
        task: &str,
        ledger: &mut AttemptLedger,
        checkpointer: &mut Checkpointer<'_>,
        states: &mut Vec<RunState>,
    ) -> Terminal {
        let policy = self.config.policy();

        if self.config.baseline && !self.cancel.is_cancelled() {
            match checkpointer.snapshot(0, true).await {
                Ok(s) => self.emit(Event::SnapshotCreated {
                    attempt: 0,
                    snapshot_id: s.id,
                    is_stable: true,
                }),
                Err(e) => {
                    states.push(RunState::Failed);
                    return e.into();
                }
            }
        }

        let mut feedback: Option<String> = None;
        loop {
            if self.cancel.is_cancelled() {
                info!("cancellation requested");
                states.push(RunState::Failed);
                return Terminal::failed(FailureKind::Cancelled, "cancelled");
            }
            states.push(RunState::Attempting);

            let index = ledger.next_index();
            info!(attempt = index, max = policy.max_attempts, "attempt started");
            self.emit(Event::AttemptStart {
                attempt: index,
                has_feedback: feedback.is_some(),
            });

            let request = ChangeRequest {
                task_name: &self.task_name,
                task,
                feedback: feedback.as_deref(),
                attempt: index,
            };
            let agent = match self.producer.apply(&request, self.cancel.clone()).await {
                Ok(outcome) => outcome,
                Err(e) => AgentOutcome::failure(format!("agent error: {e:#}")),
            };

            let test = if agent.succeeded {
                let changed = match checkpointer.changed_paths().await {
                    Ok(paths) => paths,
                    Err(e) => {
                        states.push(RunState::Failed);
                        return e.into();
                    }
                };
                if changed.is_empty() {
                    // Nothing to validate. Earlier failing work stays in
                    // place; the final snapshot is the last stable one.
                    if let Err(t) = self.record(ledger, Attempt::new(index, agent, None)) {
                        states.push(RunState::Failed);
                        return t;
                    }
                    info!(attempt = index, "no changes, nothing to validate");
                    states.push(RunState::Succeeded);
                    return Terminal::succeeded(checkpointer.last_stable().map(|s| s.id.clone()));
                }
                Some(match self.tests.run().await {
                    Ok(outcome) => outcome,
                    Err(e) => TestOutcome::failed([format!("test runner error: {e:#}")]),
                })
            } else {
                warn!(
                    attempt = index,
                    error = agent.error_message.as_deref().unwrap_or(""),
                    "change producer failed"
                );
                None
            };

            let passed = test.as_ref().map(|t| t.passed);
            if let Err(t) = self.record(ledger, Attempt::new(index, agent, test)) {
                states.push(RunState::Failed);
                return t;
            }

            // Producer failures leave nothing worth checkpointing.
            if let Some(passed) = passed {
                match checkpointer.snapshot(index, passed).await {
                    Ok(s) => self.emit(Event::SnapshotCreated {
                        attempt: index,
                        snapshot_id: s.id,
                        is_stable: passed,
                    }),
                    Err(e) => {
                        states.push(RunState::Failed);
                        return e.into();
                    }
                }
                if passed {
                    info!(attempt = index, "tests passed");
                    states.push(RunState::Succeeded);
                    return Terminal::succeeded(checkpointer.last().map(|s| s.id.clone()));
                }
            }

            // No evaluation (and no restore) once the caller has asked to stop.
            if self.cancel.is_cancelled() {
                info!(attempt = index, "cancellation requested");
                states.push(RunState::Failed);
                return Terminal::failed(FailureKind::Cancelled, "cancelled");
            }

            states.push(RunState::Evaluating);
            let decision = policy.decide(ledger);
            info!(
                attempt = index,
                retry = decision.should_retry,
                rollback = decision.should_rollback,
                reason = %decision.reason,
                "decision"
            );
            self.emit(Event::Decision {
                attempt: index,
                should_retry: decision.should_retry,
                should_rollback: decision.should_rollback,
                reason: decision.reason.clone(),
            });

            if decision.should_retry {
                states.push(RunState::Continuing);
                feedback = Some(policy.generate_feedback(ledger));
                continue;
            }

            let plan = rollback::decide(ledger, &*checkpointer);
            if !plan.should_rollback {
                states.push(RunState::Failed);
                let mut t = Terminal::failed(FailureKind::RetriesExhausted, decision.reason);
                t.rollback = Some(plan);
                return t;
            }

            let Some(target) = plan.target_snapshot_id.clone() else {
                warn!("rollback indicated but no stable checkpoint exists");
                self.emit(Event::Rollback {
                    target_snapshot_id: None,
                    confidence: plan.confidence,
                    restored: false,
                });
                states.push(RunState::Failed);
                let mut t = Terminal::failed(
                    FailureKind::NoStableCheckpoint,
                    format!("{}; no stable checkpoint to roll back to", decision.reason),
                );
                t.rollback = Some(plan);
                return t;
            };

            states.push(RunState::RollingBack);
            let restored = checkpointer.restore(&target).await;
            self.emit(Event::Rollback {
                target_snapshot_id: Some(target.clone()),
                confidence: plan.confidence,
                restored: restored.is_ok(),
            });
            states.push(RunState::Failed);
            let mut t = match restored {
                Ok(()) => {
                    let mut t = Terminal::failed(
                        FailureKind::RolledBack,
                        format!("{}; rolled back to {target}", decision.reason),
                    );
                    t.final_snapshot_id = Some(target);
                    t
                }
                Err(e) => e.into(),
            };
            t.rollback = Some(plan);
            return t;
        }
    }

    fn record(&mut self, ledger: &mut AttemptLedger, attempt: Attempt) -> Result<(), Terminal> {
        let event = Event::AttemptRecorded {
            attempt: attempt.index,
            agent_succeeded: attempt.agent_outcome.succeeded,
            tests_passed: attempt.test_outcome.as_ref().map(|t| t.passed),
            error_count: attempt.errors().len(),
        };
        ledger
            .record(attempt)
            .map_err(|e| Terminal::failed(FailureKind::InvalidSequence, e.to_string()))?;
        self.emit(event);
        Ok(())
    }
}
