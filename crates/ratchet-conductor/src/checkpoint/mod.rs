pub mod git;
pub mod memory;

use anyhow::Result;
use ratchet_core::{Snapshot, SnapshotHistory};
use thiserror::Error;
use tracing::{debug, info};

/// Storage behind checkpoints. Implemented by [`git::GitWorkspace`] and
/// [`memory::MemoryWorkspace`].
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    /// Materialize the current state and return its opaque id.
    async fn snapshot(&self) -> Result<String>;
    /// Reset to a previous snapshot. `Ok(false)` means the id is unknown.
    async fn restore(&self, id: &str) -> Result<bool>;
    /// Paths changed since the last snapshot.
    async fn changed_paths(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("checkpoint failed: {0}")]
    Failed(String),
    #[error("restore to {id} failed: {reason}")]
    RestoreFailed { id: String, reason: String },
    #[error("snapshot for attempt {got} after attempt {last} is out of order")]
    OutOfOrder { last: u32, got: u32 },
}

/// Core side of the checkpoint abstraction: keeps the ordered snapshot
/// history and delegates storage to a [`Workspace`].
pub struct Checkpointer<'a> {
    workspace: &'a dyn Workspace,
    snapshots: Vec<Snapshot>,
}

impl<'a> Checkpointer<'a> {
    pub fn new(workspace: &'a dyn Workspace) -> Self {
        Self {
            workspace,
            snapshots: Vec::new(),
        }
    }

    /// Checkpoint the workspace for `attempt_index`. At most one snapshot per
    /// attempt; attempt indices must strictly increase.
    pub async fn snapshot(
        &mut self,
        attempt_index: u32,
        is_stable: bool,
    ) -> Result<Snapshot, CheckpointError> {
        if let Some(last) = self.snapshots.last() {
            if attempt_index <= last.attempt_index {
                return Err(CheckpointError::OutOfOrder {
                    last: last.attempt_index,
                    got: attempt_index,
                });
            }
        }
        let id = self
            .workspace
            .snapshot()
            .await
            .map_err(|e| CheckpointError::Failed(format!("{e:#}")))?;
        let snapshot = Snapshot {
            id,
            attempt_index,
            is_stable,
            created_at: crate::now_rfc3339(),
        };
        info!(
            attempt = attempt_index,
            id = %snapshot.id,
            stable = is_stable,
            "snapshot created"
        );
        self.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    pub fn last_stable(&self) -> Option<&Snapshot> {
        self.snapshots.last_stable()
    }

    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Reset the workspace to `snapshot_id`.
    pub async fn restore(&self, snapshot_id: &str) -> Result<(), CheckpointError> {
        match self.workspace.restore(snapshot_id).await {
            Ok(true) => {
                info!(id = snapshot_id, "workspace restored");
                Ok(())
            }
            Ok(false) => Err(CheckpointError::RestoreFailed {
                id: snapshot_id.to_string(),
                reason: "workspace rejected the snapshot id".into(),
            }),
            Err(e) => Err(CheckpointError::RestoreFailed {
                id: snapshot_id.to_string(),
                reason: format!("{e:#}"),
            }),
        }
    }

    /// Paths changed since the last checkpoint.
    pub async fn changed_paths(&self) -> Result<Vec<String>, CheckpointError> {
        let paths = self
            .workspace
            .changed_paths()
            .await
            .map_err(|e| CheckpointError::Failed(format!("listing changes: {e:#}")))?;
        debug!(count = paths.len(), "changed paths");
        Ok(paths)
    }
}

impl SnapshotHistory for Checkpointer<'_> {
    fn last_stable(&self) -> Option<&Snapshot> {
        self.snapshots.last_stable()
    }
}
