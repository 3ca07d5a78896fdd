use serde::{Deserialize, Serialize};

/// Result reported by the change producer for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentOutcome {
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl AgentOutcome {
    pub fn success() -> Self {
        Self {
            succeeded: true,
            error_message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            error_message: Some(message.into()),
        }
    }
}

/// Result of the test run that followed a successful change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestOutcome {
    pub passed: bool,
    #[serde(default)]
    pub error_messages: Vec<String>,
}

impl TestOutcome {
    pub fn passed() -> Self {
        Self {
            passed: true,
            error_messages: Vec::new(),
        }
    }

    pub fn failed<I, S>(errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passed: false,
            error_messages: errors.into_iter().map(Into::into).collect(),
        }
    }
}

/// One iteration's outcome. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based, strictly increasing within a run.
    pub index: u32,
    pub timestamp: String,
    pub agent_outcome: AgentOutcome,
    /// Absent when tests were skipped (producer failed, or nothing changed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_outcome: Option<TestOutcome>,
}

impl Attempt {
    pub fn new(index: u32, agent_outcome: AgentOutcome, test_outcome: Option<TestOutcome>) -> Self {
        Self {
            index,
            timestamp: now_rfc3339(),
            agent_outcome,
            test_outcome,
        }
    }

    /// Passed its tests, or succeeded without needing any.
    pub fn is_successful(&self) -> bool {
        match &self.test_outcome {
            Some(t) => t.passed,
            None => self.agent_outcome.succeeded,
        }
    }

    /// Test error messages, empty when tests were skipped.
    pub fn errors(&self) -> &[String] {
        self.test_outcome
            .as_ref()
            .map(|t| t.error_messages.as_slice())
            .unwrap_or(&[])
    }
}

/// A checkpoint of workspace state tied to one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Opaque handle assigned by the workspace (e.g. a commit id).
    pub id: String,
    pub attempt_index: u32,
    pub is_stable: bool,
    pub created_at: String,
}

/// Read access to checkpoint history, as needed by the rollback engine.
pub trait SnapshotHistory {
    /// Snapshot with the greatest attempt index among the stable ones.
    fn last_stable(&self) -> Option<&Snapshot>;
}

impl SnapshotHistory for [Snapshot] {
    fn last_stable(&self) -> Option<&Snapshot> {
        self.iter()
            .filter(|s| s.is_stable)
            .max_by_key(|s| s.attempt_index)
    }
}

impl SnapshotHistory for Vec<Snapshot> {
    fn last_stable(&self) -> Option<&Snapshot> {
        self.as_slice().last_stable()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    LoopDetected,
    Stalled,
    TimeoutHeavy,
    Improving,
    Diverging,
}

/// One detected trend. Signals are independent observations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatternSignal {
    pub kind: SignalKind,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub description: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Continue,
    Rollback,
    ManualIntervention,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RollbackDecision {
    pub should_rollback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_snapshot_id: Option<String>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative_approach: Option<String>,
}

pub(crate) fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
