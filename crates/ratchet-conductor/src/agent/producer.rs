use crate::checkpoint::memory::MemoryWorkspace;
use crate::validate::mask_secrets;
use anyhow::Result;
use ratchet_core::AgentOutcome;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Anything that edits the workspace given an instruction.
///
/// Re-invoked once per attempt against the same workspace.
#[async_trait::async_trait]
pub trait ChangeProducer: Send + Sync {
    async fn apply(
        &self,
        request: &ChangeRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome>;
}

/// Input for one producer invocation.
#[derive(Debug, Clone)]
pub struct ChangeRequest<'a> {
    pub task_name: &'a str,
    pub task: &'a str,
    /// Feedback from the previous attempt; `None` on the first one.
    pub feedback: Option<&'a str>,
    pub attempt: u32,
}

impl ChangeRequest<'_> {
    /// Task text followed by the previous attempt's feedback, if any.
    pub fn prompt(&self) -> String {
        let mut prompt = self.task.trim_end().to_string();
        if let Some(feedback) = self.feedback.filter(|f| !f.trim().is_empty()) {
            prompt.push_str("\n\n## Previous Attempt Failed\n");
            prompt.push_str(feedback.trim_end());
            prompt.push_str("\n\nYour previous changes are still on disk. Fix the issues above.");
        }
        prompt
    }
}

/// Fixed namespace UUID for producer sessions.
const SESSION_NS: Uuid = Uuid::from_bytes([
    0x5a, 0x7c, 0x4e, 0x70, 0x00, 0x00, 0x40, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02,
]);

/// Deterministic session id per task and attempt.
pub fn attempt_session_id(task_name: &str, attempt: u32) -> Uuid {
    Uuid::new_v5(&SESSION_NS, format!("{task_name}-{attempt}").as_bytes())
}

/// Runs the Claude Code CLI (`claude -p`) in the workspace.
pub struct ClaudeCodeProducer {
    pub claude_bin: PathBuf,
    pub cwd: PathBuf,
    pub timeout: Duration,
    pub permission_mode: String,
    pub env: HashMap<String, String>,
}

impl ClaudeCodeProducer {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        Self {
            claude_bin: PathBuf::from("claude"),
            cwd: cwd.into(),
            timeout: Duration::from_secs(1800),
            permission_mode: "bypassPermissions".into(),
            env: HashMap::new(),
        }
    }

    pub fn with_bin(mut self, claude_bin: impl Into<PathBuf>) -> Self {
        self.claude_bin = claude_bin.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_permission_mode(mut self, mode: impl Into<String>) -> Self {
        self.permission_mode = mode.into();
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Check that the CLI binary is reachable.
    pub fn verify_available(&self) -> Result<()> {
        let status = std::process::Command::new(&self.claude_bin)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(s) if s.success() => Ok(()),
            _ => anyhow::bail!(
                "Claude CLI not found (looked for {:?}).\n\
                 Install: npm install -g @anthropic-ai/claude-code",
                self.claude_bin
            ),
        }
    }
}

#[async_trait::async_trait]
impl ChangeProducer for ClaudeCodeProducer {
    #[instrument(skip_all, fields(attempt = request.attempt))]
    async fn apply(
        &self,
        request: &ChangeRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        let session_id = attempt_session_id(request.task_name, request.attempt).to_string();
        let mut cmd = tokio::process::Command::new(&self.claude_bin);
        cmd.arg("-p")
            .arg(request.prompt())
            .arg("--output-format")
            .arg("json")
            .arg("--session-id")
            .arg(&session_id)
            .arg("--permission-mode")
            .arg(&self.permission_mode)
            .current_dir(&self.cwd)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            // Allow nesting inside another agent session
            .env_remove("CLAUDE_CODE")
            .env_remove("CLAUDECODE");
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn()?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow::anyhow!("failed to capture stderr"))?;
        debug!(%session_id, "agent started");

        let run = async {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, String::from_utf8_lossy(&buf).into_owned()))
        };

        tokio::select! {
            result = run => {
                let (status, stderr) = result?;
                if status.success() {
                    info!("agent finished");
                    Ok(AgentOutcome::success())
                } else {
                    let tail = tail_lines(&mask_secrets(&stderr), 20);
                    warn!(code = ?status.code(), "agent failed");
                    Ok(AgentOutcome::failure(format!(
                        "agent exited with code {}: {}",
                        status.code().unwrap_or(-1),
                        tail
                    )))
                }
            }
            _ = tokio::time::sleep(self.timeout) => {
                warn!(timeout_sec = self.timeout.as_secs(), "agent timed out");
                Ok(AgentOutcome::failure(format!(
                    "agent timeout after {}s",
                    self.timeout.as_secs()
                )))
            }
            _ = cancel.cancelled() => {
                Ok(AgentOutcome::failure("cancelled"))
            }
        }
    }
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Scripted producer for tests.
///
/// Pops one configured outcome per call (default: success). Successful calls
/// stage the next configured edit set into the attached workspace (default:
/// `src/attempt_{n}.rs`); an empty edit set models a no-op change.
#[derive(Default)]
pub struct MockProducer {
    outcomes: Mutex<Vec<AgentOutcome>>,
    edits: Mutex<Vec<Vec<String>>>,
    requests: Mutex<Vec<(u32, Option<String>)>>,
    workspace: Option<Arc<MemoryWorkspace>>,
}

impl MockProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace: Arc<MemoryWorkspace>) -> Self {
        self.workspace = Some(workspace);
        self
    }

    pub fn set_outcomes(&self, outcomes: Vec<AgentOutcome>) {
        *self.outcomes.lock().unwrap() = outcomes;
    }

    pub fn set_edits(&self, edits: Vec<Vec<String>>) {
        *self.edits.lock().unwrap() = edits;
    }

    /// `(attempt, feedback)` for every call so far.
    pub fn requests(&self) -> Vec<(u32, Option<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChangeProducer for MockProducer {
    async fn apply(
        &self,
        request: &ChangeRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<AgentOutcome> {
        if cancel.is_cancelled() {
            return Ok(AgentOutcome::failure("cancelled"));
        }
        self.requests
            .lock()
            .unwrap()
            .push((request.attempt, request.feedback.map(str::to_string)));

        let outcome = {
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                AgentOutcome::success()
            } else {
                outcomes.remove(0)
            }
        };
        if outcome.succeeded {
            let edit = {
                let mut edits = self.edits.lock().unwrap();
                if edits.is_empty() {
                    vec![format!("src/attempt_{}.rs", request.attempt)]
                } else {
                    edits.remove(0)
                }
            };
            if let Some(ws) = &self.workspace {
                ws.stage(edit);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Workspace;

    fn request<'a>(attempt: u32, feedback: Option<&'a str>) -> ChangeRequest<'a> {
        ChangeRequest {
            task_name: "demo",
            task: "Add a login form",
            feedback,
            attempt,
        }
    }

    #[test]
    fn session_id_deterministic_per_attempt() {
        assert_eq!(attempt_session_id("t", 1), attempt_session_id("t", 1));
        assert_ne!(attempt_session_id("t", 1), attempt_session_id("t", 2));
        assert_eq!(attempt_session_id("t", 1).get_version_num(), 5);
    }

    #[test]
    fn prompt_without_feedback_is_task() {
        assert_eq!(request(1, None).prompt(), "Add a login form");
        assert_eq!(request(1, Some("  ")).prompt(), "Add a login form");
    }

    #[test]
    fn prompt_appends_feedback() {
        let prompt = request(2, Some("1. selector not found")).prompt();
        assert!(prompt.starts_with("Add a login form"));
        assert!(prompt.contains("## Previous Attempt Failed"));
        assert!(prompt.contains("1. selector not found"));
    }

    #[test]
    fn tail_keeps_last_lines() {
        assert_eq!(tail_lines("a\n\nb\nc\n", 2), "b\nc");
        assert_eq!(tail_lines("", 3), "");
    }

    #[tokio::test]
    async fn mock_defaults_to_success_with_edit() {
        let ws = Arc::new(MemoryWorkspace::new());
        let producer = MockProducer::new().with_workspace(ws.clone());
        let out = producer
            .apply(&request(1, None), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.succeeded);
        assert_eq!(ws.changed_paths().await.unwrap(), vec!["src/attempt_1.rs"]);
        assert_eq!(producer.requests(), vec![(1, None)]);
    }

    #[tokio::test]
    async fn mock_pops_outcomes_and_edits() {
        let ws = Arc::new(MemoryWorkspace::new());
        let producer = MockProducer::new().with_workspace(ws.clone());
        producer.set_outcomes(vec![AgentOutcome::failure("boom"), AgentOutcome::success()]);
        producer.set_edits(vec![vec![]]);

        let first = producer
            .apply(&request(1, None), CancellationToken::new())
            .await
            .unwrap();
        assert!(!first.succeeded);
        // failed calls do not consume edits
        let second = producer
            .apply(&request(2, Some("fix it")), CancellationToken::new())
            .await
            .unwrap();
        assert!(second.succeeded);
        assert!(ws.changed_paths().await.unwrap().is_empty());
        assert_eq!(producer.requests()[1], (2, Some("fix it".to_string())));
    }

    #[tokio::test]
    async fn mock_respects_cancel() {
        let producer = MockProducer::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out = producer.apply(&request(1, None), cancel).await.unwrap();
        assert_eq!(out.error_message.as_deref(), Some("cancelled"));
        assert!(producer.requests().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn claude_producer_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let producer = ClaudeCodeProducer::new(dir.path()).with_bin("false");
        let out = producer
            .apply(&request(1, None), CancellationToken::new())
            .await
            .unwrap();
        assert!(!out.succeeded);
        assert!(out.error_message.unwrap().contains("exited with code 1"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn claude_producer_keeps_non_utf8_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("noisy.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf 'bad \\377 byte\\nerror: real cause\\n' >&2\nexit 2\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let producer = ClaudeCodeProducer::new(dir.path()).with_bin(&script);
        let out = producer
            .apply(&request(1, None), CancellationToken::new())
            .await
            .unwrap();
        let message = out.error_message.unwrap();
        assert!(message.contains("exited with code 2"));
        assert!(message.contains("error: real cause"));
        assert!(message.contains('\u{FFFD}'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn claude_producer_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let producer = ClaudeCodeProducer::new(dir.path())
            .with_bin(&script)
            .with_timeout(Duration::from_millis(200));
        let out = producer
            .apply(&request(1, None), CancellationToken::new())
            .await
            .unwrap();
        assert!(out.error_message.unwrap().contains("timeout"));
    }
}
