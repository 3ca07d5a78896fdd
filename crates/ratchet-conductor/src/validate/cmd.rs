use crate::validate::{mask_secrets, TestRunner};
use anyhow::Result;
use ratchet_core::TestOutcome;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Error lines kept per failing command.
const MAX_ERRORS_PER_COMMAND: usize = 10;
/// Characters kept per error line.
const MAX_LINE_CHARS: usize = 500;

/// One shell command and its timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
    pub cmd: String,
    pub timeout: Duration,
}

impl TestCommand {
    pub fn new(cmd: impl Into<String>, timeout_sec: u64) -> Self {
        Self {
            cmd: cmd.into(),
            timeout: Duration::from_secs(timeout_sec),
        }
    }
}

/// Runs every configured command through the platform shell.
///
/// All commands run even after one fails, so the next attempt sees every
/// broken check at once.
pub struct CmdTestRunner {
    commands: Vec<TestCommand>,
    cwd: PathBuf,
    env: HashMap<String, String>,
}

impl CmdTestRunner {
    pub fn new(commands: Vec<TestCommand>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            cwd: cwd.into(),
            env: HashMap::new(),
        }
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[instrument(skip_all, fields(cmd = %command.cmd))]
    async fn run_one(&self, command: &TestCommand) -> Vec<String> {
        let (shell, args) = shell_cmd(&command.cmd);
        let mut cmd = Command::new(&shell);
        cmd.args(&args)
            .current_dir(&self.cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }

        match tokio::time::timeout(command.timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                debug!("passed");
                Vec::new()
            }
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push('\n');
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                let errors = extract_errors(&mask_secrets(&text), output.status.code());
                warn!(code = ?output.status.code(), errors = errors.len(), "failed");
                errors
            }
            Ok(Err(e)) => vec![format!("spawn error: {e}: {}", command.cmd)],
            Err(_) => vec![format!(
                "command timed out after {}s: {}",
                command.timeout.as_secs(),
                command.cmd
            )],
        }
    }
}

#[async_trait::async_trait]
impl TestRunner for CmdTestRunner {
    async fn run(&self) -> Result<TestOutcome> {
        let mut errors = Vec::new();
        let mut failed = false;
        for command in &self.commands {
            let errs = self.run_one(command).await;
            if !errs.is_empty() {
                failed = true;
                errors.extend(errs);
            }
        }
        if failed {
            Ok(TestOutcome::failed(errors))
        } else {
            Ok(TestOutcome::passed())
        }
    }
}

/// Shell program and args for the current platform.
#[cfg(windows)]
fn shell_cmd(cmd: &str) -> (String, Vec<String>) {
    ("cmd.exe".into(), vec!["/C".into(), cmd.into()])
}

#[cfg(not(windows))]
fn shell_cmd(cmd: &str) -> (String, Vec<String>) {
    ("sh".into(), vec!["-c".into(), cmd.into()])
}

/// Lines that look like errors, or `exit N: <last line>` when none do.
fn extract_errors(output: &str, code: Option<i32>) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let lower = line.to_lowercase();
        if !(lower.contains("error") || lower.contains("fail") || lower.contains("panic")) {
            continue;
        }
        let line = truncate(line);
        if !errors.contains(&line) {
            errors.push(line);
        }
        if errors.len() == MAX_ERRORS_PER_COMMAND {
            break;
        }
    }
    if errors.is_empty() {
        let last = output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .last()
            .unwrap_or("no output");
        errors.push(format!("exit {}: {}", code.unwrap_or(-1), truncate(last)));
    }
    errors
}

fn truncate(line: &str) -> String {
    if line.chars().count() > MAX_LINE_CHARS {
        let cut: String = line.chars().take(MAX_LINE_CHARS).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_error_lines() {
        let out = "running 2 tests\ntest a ... ok\nerror[E0308]: mismatched types\nthread 'b' panicked at src/lib.rs\n";
        let errs = extract_errors(out, Some(101));
        assert_eq!(
            errs,
            vec!["error[E0308]: mismatched types", "thread 'b' panicked at src/lib.rs"]
        );
    }

    #[test]
    fn falls_back_to_exit_code() {
        assert_eq!(extract_errors("one\ntwo\n", Some(2)), vec!["exit 2: two"]);
        assert_eq!(extract_errors("", None), vec!["exit -1: no output"]);
    }

    #[test]
    fn caps_and_dedups() {
        let out = "error: same\n".repeat(3) + &(0..20).map(|i| format!("error {i}\n")).collect::<String>();
        let errs = extract_errors(&out, Some(1));
        assert_eq!(errs.len(), MAX_ERRORS_PER_COMMAND);
        assert_eq!(errs.iter().filter(|e| *e == "error: same").count(), 1);
    }

    #[test]
    fn truncates_long_lines() {
        let long = "x".repeat(MAX_LINE_CHARS + 10);
        assert_eq!(truncate(&long).chars().count(), MAX_LINE_CHARS + 3);
    }

    #[tokio::test]
    async fn no_commands_pass() {
        let dir = tempfile::tempdir().unwrap();
        let out = CmdTestRunner::new(vec![], dir.path()).run().await.unwrap();
        assert!(out.passed);
        assert!(out.error_messages.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_all_commands_and_collects_errors() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CmdTestRunner::new(
            vec![
                TestCommand::new("echo 'error: first broke' >&2; exit 1", 10),
                TestCommand::new("true", 10),
                TestCommand::new("echo done; exit 3", 10),
            ],
            dir.path(),
        );
        let out = runner.run().await.unwrap();
        assert!(!out.passed);
        assert_eq!(out.error_messages, vec!["error: first broke", "exit 3: done"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passes_env_and_masks_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let env = HashMap::from([("API_TOKEN".to_string(), "s3cr3t".to_string())]);
        let runner = CmdTestRunner::new(
            vec![TestCommand::new("echo \"error token=$API_TOKEN\"; exit 1", 10)],
            dir.path(),
        )
        .with_env(env);
        let out = runner.run().await.unwrap();
        assert_eq!(out.error_messages, vec!["error token=[MASKED]"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = CmdTestRunner::new(
            vec![TestCommand {
                cmd: "sleep 10".into(),
                timeout: Duration::from_millis(100),
            }],
            dir.path(),
        );
        let out = runner.run().await.unwrap();
        assert!(!out.passed);
        assert!(out.error_messages[0].starts_with("command timed out"));
    }
}
