//! In-memory workspace for tests.
//!
//! Each instance owns its own state; nothing is shared between runs.

use crate::checkpoint::Workspace;
use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    /// Paths touched since the last snapshot.
    pending: BTreeSet<String>,
    /// Every path ever written, as of the working state.
    files: BTreeSet<String>,
    snapshots: Vec<(String, BTreeSet<String>)>,
    restored: Vec<String>,
    fail_snapshots: bool,
    fail_restores: bool,
    fail_changed_paths: bool,
}

#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    state: Mutex<State>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record edits to the given paths.
    pub fn stage<I, S>(&self, paths: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state.lock().unwrap();
        for p in paths {
            let p = p.into();
            state.files.insert(p.clone());
            state.pending.insert(p);
        }
    }

    /// Make every following `snapshot()` call fail.
    pub fn fail_snapshots(&self, fail: bool) {
        self.state.lock().unwrap().fail_snapshots = fail;
    }

    /// Make every following `restore()` call fail.
    pub fn fail_restores(&self, fail: bool) {
        self.state.lock().unwrap().fail_restores = fail;
    }

    /// Make every following `changed_paths()` call fail.
    pub fn fail_changed_paths(&self, fail: bool) {
        self.state.lock().unwrap().fail_changed_paths = fail;
    }

    /// Ids passed to successful `restore()` calls, in order.
    pub fn restored(&self) -> Vec<String> {
        self.state.lock().unwrap().restored.clone()
    }

    /// Snapshot ids created so far.
    pub fn snapshot_ids(&self) -> Vec<String> {
        let state = self.state.lock().unwrap();
        state.snapshots.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn files(&self) -> Vec<String> {
        self.state.lock().unwrap().files.iter().cloned().collect()
    }
}

#[async_trait::async_trait]
impl Workspace for MemoryWorkspace {
    async fn snapshot(&self) -> Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.fail_snapshots {
            bail!("snapshot storage unavailable");
        }
        if state.pending.is_empty() {
            return match state.snapshots.last() {
                Some((id, _)) => Ok(id.clone()),
                None => bail!("nothing to checkpoint: no changes and no earlier checkpoint"),
            };
        }
        let id = format!("snap-{}", state.snapshots.len() + 1);
        let tree = state.files.clone();
        state.snapshots.push((id.clone(), tree));
        state.pending.clear();
        Ok(id)
    }

    async fn restore(&self, id: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if state.fail_restores {
            bail!("restore storage unavailable");
        }
        let Some(tree) = state
            .snapshots
            .iter()
            .find(|(sid, _)| sid == id)
            .map(|(_, tree)| tree.clone())
        else {
            return Ok(false);
        };
        state.files = tree;
        state.pending.clear();
        state.restored.push(id.to_string());
        Ok(true)
    }

    async fn changed_paths(&self) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_changed_paths {
            bail!("status listing unavailable");
        }
        Ok(state.pending.iter().cloned().collect())
    }
}
