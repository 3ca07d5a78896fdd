use anyhow::{bail, Result};
use ratchet_conductor::agent::{attempt_session_id, ClaudeCodeProducer};
use ratchet_conductor::checkpoint::git::GitWorkspace;
use ratchet_conductor::runner::event_log::EventLogger;
use ratchet_conductor::runner::report::{save_report, RunReport};
use ratchet_conductor::task::{load_task, TaskSpec};
use ratchet_conductor::validate::cmd::{CmdTestRunner, TestCommand};
use ratchet_conductor::{Orchestrator, RunConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Execute `ratchet run <task.yaml>`
pub fn run(task_file: &Path, cwd_override: Option<&Path>, dry_run: bool, baseline: bool) -> Result<()> {
    let task = load_task(task_file)?;
    let cwd = resolve_cwd(task_file, &task, cwd_override)?;
    let config = RunConfig {
        max_attempts: task.max_attempts,
        rollback_threshold: task.rollback_threshold,
        baseline: task.baseline || baseline,
    };

    if dry_run {
        print_dry_run(&task, &config, &cwd);
        return Ok(());
    }

    let producer = ClaudeCodeProducer::new(&cwd)
        .with_bin(&task.agent.bin)
        .with_timeout(Duration::from_secs(task.agent.timeout_sec))
        .with_permission_mode(&task.agent.permission_mode)
        .with_env(task.env.clone());
    producer.verify_available()?;

    let commands = task
        .tests
        .iter()
        .map(|t| TestCommand::new(&t.cmd, t.timeout_sec))
        .collect();
    let tests = CmdTestRunner::new(commands, &cwd).with_env(task.env.clone());
    let workspace = GitWorkspace::new(&cwd);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(workspace.verify())?;

    let mut orchestrator = Orchestrator::new(
        Arc::new(producer),
        Arc::new(tests),
        Arc::new(workspace),
        config,
    )
    .with_task_name(&task.name)
    .with_event_log(EventLogger::new(&cwd, &task.name));

    // Handle Ctrl+C gracefully
    ctrlc_cancel(orchestrator.cancel_handle());

    println!(
        "Running task \"{}\" (max {} attempts) in {}",
        task.name,
        config.max_attempts,
        cwd.display()
    );
    let started_at = now_rfc3339();
    let result = rt.block_on(orchestrator.run(&task.task));
    let report = RunReport {
        task_name: task.name.clone(),
        task: task.task.clone(),
        config,
        started_at,
        finished_at: now_rfc3339(),
        result,
    };
    let path = save_report(&cwd, &report)?;

    crate::cmd_status::print_report(&report);
    println!("  Report: {}", path.display());

    if !report.result.succeeded() {
        bail!(
            "task \"{}\" failed: {}",
            task.name,
            report.result.error.as_deref().unwrap_or("unknown")
        );
    }
    Ok(())
}

/// `--cwd`, else the task's `cwd` relative to the task file, else the task
/// file's directory. Always absolute.
fn resolve_cwd(task_file: &Path, task: &TaskSpec, cwd_override: Option<&Path>) -> Result<PathBuf> {
    let base = task_file.parent().unwrap_or(Path::new("."));
    let cwd = cwd_override
        .map(Path::to_path_buf)
        .or_else(|| task.cwd.as_ref().map(|p| base.join(p)))
        .unwrap_or_else(|| base.to_path_buf());
    Ok(if cwd.is_relative() {
        std::env::current_dir()?.join(&cwd)
    } else {
        cwd
    })
}

fn print_dry_run(task: &TaskSpec, config: &RunConfig, cwd: &Path) {
    println!("[dry-run] Task: {}", task.name);
    println!("  Working dir: {}", cwd.display());
    println!("  Max attempts: {}", config.max_attempts);
    println!("  Rollback threshold: {}", config.rollback_threshold);
    println!("  Baseline checkpoint: {}", if config.baseline { "yes" } else { "no" });
    println!(
        "  Agent: {} (timeout {}s, {})",
        task.agent.bin, task.agent.timeout_sec, task.agent.permission_mode
    );
    if task.tests.is_empty() {
        println!("  Tests: none (every change passes)");
    } else {
        println!("  Tests:");
        for t in &task.tests {
            println!("    - {} (timeout {}s)", t.cmd, t.timeout_sec);
        }
    }
    println!("\n  Session IDs:");
    for attempt in 1..=config.max_attempts {
        println!(
            "    attempt {attempt} → {}",
            attempt_session_id(&task.name, attempt)
        );
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

fn ctrlc_cancel(cancel: CancellationToken) {
    let _ = ctrlc::set_handler(move || {
        cancel.cancel();
    });
}
