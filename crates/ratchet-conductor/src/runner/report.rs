//! Persisted summary of the latest run of a task.

use crate::runner::orchestrator::{RunConfig, RunResult};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub task_name: String,
    pub task: String,
    pub config: RunConfig,
    pub started_at: String,
    pub finished_at: String,
    pub result: RunResult,
}

/// Path: `{cwd}/.ratchet/runs/{task_name}/report.json`.
pub fn report_path(cwd: &Path, task_name: &str) -> PathBuf {
    super::run_dir(cwd, task_name).join("report.json")
}

/// Save atomically (write to temp file, then rename).
pub fn save_report(cwd: &Path, report: &RunReport) -> Result<PathBuf> {
    let path = report_path(cwd, &report.task_name);
    let json = serde_json::to_string_pretty(report)?;
    write_atomic(&path, json.as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Load the last report for a task. Returns `None` if none was saved.
pub fn load_report(cwd: &Path, task_name: &str) -> Result<Option<RunReport>> {
    let path = report_path(cwd, task_name);
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let report = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(Some(report))
}

/// Task names with a saved report, sorted.
pub fn list_reports(cwd: &Path) -> Result<Vec<String>> {
    let runs = cwd.join(super::ARTIFACT_DIR).join("runs");
    if !runs.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(&runs)? {
        let entry = entry?;
        if entry.path().join("report.json").is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}
