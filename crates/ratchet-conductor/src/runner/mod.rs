pub mod event_log;
pub mod orchestrator;
pub mod report;

use std::path::{Path, PathBuf};

pub use crate::checkpoint::git::ARTIFACT_DIR;

/// Per-task artifact directory: `{cwd}/.ratchet/runs/{task_name}`.
pub fn run_dir(cwd: &Path, task_name: &str) -> PathBuf {
    cwd.join(ARTIFACT_DIR).join("runs").join(task_name)
}
