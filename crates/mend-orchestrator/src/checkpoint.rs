//! Checkpoint and rollback for the patch target
//!
//! Before a candidate is written, the target `T` is copied to `T.backup` and
//! its bytes are kept in memory. Restore tries, in order:
//! - moving `T.backup` back onto `T`
//! - writing the in-memory copy
//! - `git checkout <recorded commit> -- T` when a git backend is present
//!
//! Only one checkpoint per target can be live at a time; writes require the
//! [`CheckpointHandle`] so there is no way to mutate a target without one.

use chrono::{DateTime, Utc};
use mend_core::fail_open::fail_open;
use mend_core::{MendError, Result};
use mend_vcs::{VcsExecutor, VersionControl};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{error, info, warn};

/// Commit message for accepted patches
pub const SUCCESS_COMMIT_MESSAGE: &str = "Successful patch modification";

/// Proof that a target has been snapshotted
///
/// Consumed by [`CheckpointManager::restore`]; [`CheckpointManager::commit`]
/// borrows it so a failed commit can still be restored.
#[derive(Debug)]
pub struct CheckpointHandle {
    target: PathBuf,
    backup: PathBuf,
    content: Vec<u8>,
    vcs_commit: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CheckpointHandle {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    /// Pre-attempt content of the target
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn vcs_commit(&self) -> Option<&str> {
        self.vcs_commit.as_deref()
    }
}

/// Which restore path succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    BackupFile,
    MemoryCopy,
    VersionControl,
}

/// Result of a rollback operation
#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub target: PathBuf,
    pub source: RestoreSource,
}

/// `T` -> `T.backup`
pub fn backup_path_for(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

pub struct CheckpointManager<E: VcsExecutor> {
    vcs: Option<VersionControl<E>>,
    active: Mutex<HashSet<PathBuf>>,
}

impl<E: VcsExecutor> CheckpointManager<E> {
    /// `vcs` is optional; without it only file-level restore is available
    pub fn new(vcs: Option<VersionControl<E>>) -> Self {
        Self {
            vcs,
            active: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_active(&self, target: &Path) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(target)
    }

    fn claim(&self, target: &Path) -> Result<()> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(target.to_path_buf()) {
            return Err(MendError::TargetBusy(target.display().to_string()));
        }
        Ok(())
    }

    fn release(&self, target: &Path) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(target);
    }

    /// Snapshot `target` before any write
    pub async fn snapshot(&self, target: &Path) -> Result<CheckpointHandle> {
        self.claim(target)?;

        match self.take_snapshot(target).await {
            Ok(handle) => {
                info!("Checkpoint created for {:?}", target);
                Ok(handle)
            }
            Err(e) => {
                self.release(target);
                Err(e)
            }
        }
    }

    async fn take_snapshot(&self, target: &Path) -> Result<CheckpointHandle> {
        let content = tokio::fs::read(target)
            .await
            .map_err(|e| MendError::Checkpoint(format!("Cannot read {:?}: {}", target, e)))?;

        let vcs_commit = match &self.vcs {
            Some(vcs) => fail_open("pre_modification_commit", vcs.pre_modification_commit().await),
            None => None,
        };

        let backup = backup_path_for(target);
        tokio::fs::write(&backup, &content)
            .await
            .map_err(|e| MendError::Checkpoint(format!("Cannot write {:?}: {}", backup, e)))?;

        Ok(CheckpointHandle {
            target: target.to_path_buf(),
            backup,
            content,
            vcs_commit,
            created_at: Utc::now(),
        })
    }

    /// Overwrite the checkpointed target
    pub async fn write(&self, handle: &CheckpointHandle, content: &str) -> Result<()> {
        tokio::fs::write(&handle.target, content).await?;
        Ok(())
    }

    /// Put the pre-attempt content back and discard the checkpoint
    pub async fn restore(&self, handle: CheckpointHandle) -> Result<RollbackResult> {
        let result = self.try_restore(&handle).await;
        self.release(&handle.target);

        match &result {
            Ok(r) => info!("Restored {:?} via {:?}", r.target, r.source),
            Err(e) => error!("CRITICAL: could not restore {:?}: {}", handle.target, e),
        }
        result
    }

    async fn try_restore(&self, handle: &CheckpointHandle) -> Result<RollbackResult> {
        let done = |source| RollbackResult {
            target: handle.target.clone(),
            source,
        };

        if tokio::fs::try_exists(&handle.backup).await.unwrap_or(false) {
            match tokio::fs::rename(&handle.backup, &handle.target).await {
                Ok(()) => return Ok(done(RestoreSource::BackupFile)),
                Err(e) => warn!("Restore from {:?} failed: {}", handle.backup, e),
            }
        }

        match tokio::fs::write(&handle.target, &handle.content).await {
            Ok(()) => {
                // Best effort; the target is already correct
                let _ = tokio::fs::remove_file(&handle.backup).await;
                return Ok(done(RestoreSource::MemoryCopy));
            }
            Err(e) => warn!("Restore from memory copy failed: {}", e),
        }

        if let (Some(vcs), Some(commit)) = (&self.vcs, &handle.vcs_commit) {
            let relative = handle
                .target
                .strip_prefix(vcs.repo_root())
                .unwrap_or(&handle.target)
                .to_string_lossy()
                .into_owned();
            vcs.restore_path(commit, &relative).await?;
            return Ok(done(RestoreSource::VersionControl));
        }

        Err(MendError::Checkpoint(format!(
            "All restore paths failed for {:?}",
            handle.target
        )))
    }

    /// Accept the current target content and discard the checkpoint
    ///
    /// On error the checkpoint stays live so the caller can still restore
    /// with the same handle.
    pub async fn commit(&self, handle: &CheckpointHandle) -> Result<()> {
        match tokio::fs::remove_file(&handle.backup).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(MendError::Checkpoint(format!(
                    "Cannot remove {:?}: {}",
                    handle.backup, e
                )))
            }
        }

        if let Some(vcs) = &self.vcs {
            fail_open("success_commit", vcs.commit_all(SUCCESS_COMMIT_MESSAGE).await);
        }

        self.release(&handle.target);
        info!("Checkpoint committed for {:?}", handle.target);
        Ok(())
    }
}
