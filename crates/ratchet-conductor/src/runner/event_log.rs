//! Structured event logging for runs.
//!
//! Writes append-only JSONL to `.ratchet/runs/{task}/events.jsonl`.

use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

// ── Event types ──

/// A run event. Serialized as tagged JSON (`"type": "run_start"`, etc.).
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    RunStart {
        run_id: String,
        task_name: String,
        max_attempts: u32,
        rollback_threshold: u32,
    },
    AttemptStart {
        attempt: u32,
        has_feedback: bool,
    },
    AttemptRecorded {
        attempt: u32,
        agent_succeeded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tests_passed: Option<bool>,
        error_count: usize,
    },
    SnapshotCreated {
        attempt: u32,
        snapshot_id: String,
        is_stable: bool,
    },
    Decision {
        attempt: u32,
        should_retry: bool,
        should_rollback: bool,
        reason: String,
    },
    Rollback {
        #[serde(skip_serializing_if = "Option::is_none")]
        target_snapshot_id: Option<String>,
        confidence: f64,
        restored: bool,
    },
    RunSucceeded {
        attempts: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_snapshot_id: Option<String>,
    },
    RunFailed {
        attempts: usize,
        reason: String,
    },
}

/// Wrapper that adds sequence number and timestamp to each event.
#[derive(Debug, Serialize)]
pub struct FullEvent {
    pub seq: u32,
    pub ts: String,
    #[serde(flatten)]
    pub event: Event,
}

// ── EventLogger ──

/// Append-only JSONL event writer.
pub struct EventLogger {
    jsonl_path: PathBuf,
    seq: u32,
}

impl EventLogger {
    /// Create a new logger. Path: `{cwd}/.ratchet/runs/{task_name}/events.jsonl`.
    pub fn new(cwd: &Path, task_name: &str) -> Self {
        Self {
            jsonl_path: super::run_dir(cwd, task_name).join("events.jsonl"),
            seq: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.jsonl_path
    }

    /// Record an event. Best-effort: silently ignores write failures.
    pub fn record(&mut self, event: Event) {
        let full = FullEvent {
            seq: self.seq,
            ts: crate::now_rfc3339(),
            event,
        };
        self.seq += 1;

        if let Ok(line) = serde_json::to_string(&full) {
            let _ = append_line(&self.jsonl_path, &line);
        }
    }
}

/// Append a single line to a file, creating parent dirs if needed.
fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
