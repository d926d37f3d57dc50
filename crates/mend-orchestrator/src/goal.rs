//! Improvement goal tracking
//!
//! The phase index is persisted as `{"phase": N}` in `<state_dir>/phase.json`.
//! Persistence failures are logged and the in-memory index is kept.

use mend_core::config::PhaseConfig;
use mend_core::fail_open::{fail_open_retrying, RetryPolicy};
use mend_core::{Goal, MendError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

/// File name of the phase record inside the state directory
pub const PHASE_FILE: &str = "phase.json";

const TERMINAL_DESCRIPTION: &str = "All phases complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct PhaseRecord {
    phase: usize,
}

pub struct GoalTracker {
    phases: Vec<PhaseConfig>,
    index: Mutex<usize>,
    path: Option<PathBuf>,
    /// Held for a whole advance so records are written in index order
    advance_lock: tokio::sync::Mutex<()>,
}

impl GoalTracker {
    /// Tracker without durable storage
    pub fn in_memory(phases: Vec<PhaseConfig>) -> Self {
        Self {
            phases,
            index: Mutex::new(0),
            path: None,
            advance_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Tracker backed by `path`; a missing or unreadable record starts at phase 0
    pub async fn load(path: impl Into<PathBuf>, phases: Vec<PhaseConfig>) -> Self {
        let path = path.into();
        let index = match read_record(&path).await {
            Ok(Some(record)) => record.phase.min(phases.len()),
            Ok(None) => 0,
            Err(e) => {
                warn!("Phase record unreadable, starting at phase 0: {}", e);
                0
            }
        };

        Self {
            phases,
            index: Mutex::new(index),
            path: Some(path),
            advance_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn index(&self) -> usize {
        *self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn goal_at(&self, index: usize) -> Goal {
        let description = self
            .phases
            .get(index)
            .map(|p| p.description.as_str())
            .unwrap_or(TERMINAL_DESCRIPTION);
        Goal::new(index, description, self.phases.len())
    }

    pub fn current(&self) -> Goal {
        self.goal_at(self.index())
    }

    /// Seed queries and description for the current phase (`None` when terminal)
    pub fn current_phase(&self) -> Option<&PhaseConfig> {
        self.phases.get(self.index())
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    /// Move to the next phase and persist it
    ///
    /// At the terminal goal this is a no-op.
    pub async fn advance(&self) -> Goal {
        let _serial = self.advance_lock.lock().await;
        let next = {
            let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
            if *index >= self.phases.len() {
                info!("Goal already terminal, not advancing");
                return self.goal_at(*index);
            }
            *index += 1;
            *index
        };

        let goal = self.goal_at(next);
        info!("Advanced to {}", goal);

        if self.path.is_some() {
            fail_open_retrying("persist_phase", RetryPolicy::default(), || self.save(next)).await;
        }
        goal
    }

    async fn save(&self, phase: usize) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_record(path, PhaseRecord { phase })
            .await
            .map_err(|e| MendError::Persistence(format!("{:?}: {}", path, e)))
    }
}

async fn read_record(path: &Path) -> Result<Option<PhaseRecord>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_record(path: &Path, record: PhaseRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(&record)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn phases(n: usize) -> Vec<PhaseConfig> {
        (0..n)
            .map(|i| PhaseConfig {
                description: format!("phase {}", i),
                queries: vec![],
            })
            .collect()
    }

    #[tokio::test]
    async fn test_advance_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PHASE_FILE);

        let tracker = GoalTracker::load(&path, phases(3)).await;
        assert_eq!(tracker.current().index, 0);

        let goal = tracker.advance().await;
        assert_eq!(goal.index, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"phase":1}"#);

        let reloaded = GoalTracker::load(&path, phases(3)).await;
        assert_eq!(reloaded.current().description, "phase 1");
    }

    #[tokio::test]
    async fn test_terminal_is_sticky() {
        let tracker = GoalTracker::in_memory(phases(2));
        tracker.advance().await;
        let terminal = tracker.advance().await;
        assert!(terminal.terminal);
        assert_eq!(terminal.index, 2);
        assert!(tracker.current_phase().is_none());

        let again = tracker.advance().await;
        assert_eq!(again.index, 2);
    }

    #[tokio::test]
    async fn test_corrupt_or_out_of_range_record() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PHASE_FILE);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(GoalTracker::load(&path, phases(3)).await.current().index, 0);

        std::fs::write(&path, r#"{"phase": 42}"#).unwrap();
        let tracker = GoalTracker::load(&path, phases(3)).await;
        assert_eq!(tracker.current().index, 3);
        assert!(tracker.current().terminal);
    }

    #[tokio::test]
    async fn test_persist_failure_is_non_fatal() {
        let temp = TempDir::new().unwrap();
        // A directory where the record file should be makes every write fail
        let path = temp.path().join(PHASE_FILE);
        std::fs::create_dir(&path).unwrap();

        let tracker = GoalTracker::load(&path, phases(3)).await;
        let goal = tracker.advance().await;
        assert_eq!(goal.index, 1);
        assert_eq!(tracker.current().index, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_advances_persist_last_index() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(PHASE_FILE);
        let tracker = Arc::new(GoalTracker::load(&path, phases(10)).await);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move { tracker.advance().await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.unwrap();
        }

        assert_eq!(tracker.current().index, 6);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), r#"{"phase":6}"#);
    }
}
