//! Git-backed workspace: snapshots are commits, restore is a hard reset.
//!
//! Run artifacts under `.ratchet/` are never committed, reported as
//! changes, or removed by a restore.

use crate::checkpoint::Workspace;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Directory holding run artifacts, relative to the workspace root.
pub const ARTIFACT_DIR: &str = ".ratchet";

#[derive(Debug, Clone)]
pub struct GitWorkspace {
    workdir: PathBuf,
}

impl GitWorkspace {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    /// Fail unless `workdir` is inside a git work tree.
    pub async fn verify(&self) -> Result<()> {
        let out = self.run_capture(&["rev-parse", "--is-inside-work-tree"]).await?;
        if out.trim() != "true" {
            return Err(anyhow!("{} is not a git work tree", self.workdir.display()));
        }
        Ok(())
    }

    /// Paths reported by `git status --porcelain`, artifacts excluded.
    async fn status_paths(&self) -> Result<Vec<String>> {
        let out = self
            .run_capture(&["status", "--porcelain=v1", "-uall"])
            .await?;
        let mut paths = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let path = parse_status_line(line)?;
            if !is_artifact(&path) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn head(&self) -> Result<Option<String>> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"]).await?;
        if !out.status.success() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).trim().to_string()))
    }

    async fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"]).await?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    async fn commit_exists(&self, id: &str) -> Result<bool> {
        let spec = format!("{id}^{{commit}}");
        let out = self.run(&["cat-file", "-e", &spec]).await?;
        Ok(out.status.success())
    }

    async fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

#[async_trait::async_trait]
impl Workspace for GitWorkspace {
    #[instrument(skip_all)]
    async fn snapshot(&self) -> Result<String> {
        let exclude = format!(":(exclude){ARTIFACT_DIR}");
        self.run_checked(&["add", "-A", "--", ".", &exclude]).await?;

        if self.has_staged_changes().await? {
            self.run_checked(&["commit", "--no-verify", "--quiet", "-m", "ratchet: checkpoint"])
                .await?;
        } else {
            debug!("nothing staged, reusing HEAD");
        }

        match self.head().await? {
            Some(sha) => Ok(sha),
            None => Err(anyhow!(
                "no reviewable changes and no existing commit to checkpoint"
            )),
        }
    }

    #[instrument(skip_all, fields(id))]
    async fn restore(&self, id: &str) -> Result<bool> {
        if !self.commit_exists(id).await? {
            warn!(id, "unknown checkpoint");
            return Ok(false);
        }
        self.run_checked(&["reset", "--hard", "--quiet", id]).await?;
        self.run_checked(&["clean", "-fd", "--quiet", "-e", ARTIFACT_DIR])
            .await?;
        Ok(true)
    }

    async fn changed_paths(&self) -> Result<Vec<String>> {
        self.status_paths().await
    }
}

fn is_artifact(path: &str) -> bool {
    path == ARTIFACT_DIR || path.starts_with(&format!("{ARTIFACT_DIR}/"))
}

/// Path of one porcelain line; renames yield the new path.
fn parse_status_line(line: &str) -> Result<String> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(unquote(path.trim()));
    }
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let path = line[3..].trim();
    let path = path.split_once(" -> ").map_or(path, |(_, new)| new.trim());
    Ok(unquote(path))
}

/// Git quotes paths containing spaces or special characters.
fn unquote(path: &str) -> String {
    path.strip_prefix('"')
        .and_then(|p| p.strip_suffix('"'))
        .unwrap_or(path)
        .to_string()
}
