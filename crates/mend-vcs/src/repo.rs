//! Commit-level operations used around a patch attempt
//!
//! The checkpoint manager records HEAD before a candidate is written, commits
//! accepted candidates, and can restore the target from the recorded commit
//! when the on-disk backup is gone.

use mend_core::{MendError, Result};
use std::path::Path;
use tracing::{debug, info, instrument};

use crate::command::VcsExecutor;
use crate::validate::{validate_commit_id, validate_path};

/// Message used for the commit that captures uncommitted work
pub const PRE_MODIFICATION_MESSAGE: &str = "Pre-modification commit";

/// Git operations over an executor
pub struct VersionControl<E: VcsExecutor> {
    executor: E,
}

impl<E: VcsExecutor> VersionControl<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn repo_root(&self) -> &Path {
        self.executor.repo_root()
    }

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.executor.exec(args).await?;
        if !output.success {
            return Err(MendError::Vcs(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Current HEAD commit id
    pub async fn head(&self) -> Result<String> {
        let head = self.run(&["rev-parse", "HEAD"]).await?;
        let head = head.trim();
        validate_commit_id(head)?;
        Ok(head.to_string())
    }

    /// Stage everything; returns `true` when there is something to commit
    async fn stage_all(&self) -> Result<bool> {
        self.run(&["add", "-A"]).await?;
        // --quiet exits 1 when the index differs from HEAD
        let diff = self.executor.exec(&["diff", "--cached", "--quiet"]).await?;
        Ok(!diff.success)
    }

    /// Commit any pending work, then return HEAD
    ///
    /// Executes: `git add -A`, `git diff --cached --quiet`,
    /// `git commit -m "Pre-modification commit"` (only if dirty), `git rev-parse HEAD`
    #[instrument(skip(self))]
    pub async fn pre_modification_commit(&self) -> Result<String> {
        if self.stage_all().await? {
            debug!("Working tree dirty, committing before modification");
            self.run(&["commit", "-m", PRE_MODIFICATION_MESSAGE]).await?;
        }
        let head = self.head().await?;
        info!("Recorded pre-modification commit {}", head);
        Ok(head)
    }

    /// Commit all changes with `message`; returns the new HEAD, or `None` if clean
    #[instrument(skip(self))]
    pub async fn commit_all(&self, message: &str) -> Result<Option<String>> {
        if !self.stage_all().await? {
            debug!("Nothing to commit");
            return Ok(None);
        }
        self.run(&["commit", "-m", message]).await?;
        Ok(Some(self.head().await?))
    }

    /// Restore one path to its content at `commit`
    ///
    /// Executes: `git checkout {commit} -- {path}`
    #[instrument(skip(self))]
    pub async fn restore_path(&self, commit: &str, path: &str) -> Result<()> {
        validate_commit_id(commit)?;
        validate_path(path)?;
        self.run(&["checkout", commit, "--", path]).await?;
        info!("Restored {} from {}", path, commit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{MockVcsExecutor, VcsOutput};

    const HEAD: &str = "0a1b2c3d4e5f";

    fn clean_repo() -> MockVcsExecutor {
        MockVcsExecutor::new()
            .with_response("add -A", VcsOutput::ok(""))
            .with_response("diff --cached --quiet", VcsOutput::ok(""))
            .with_response("rev-parse HEAD", VcsOutput::ok(&format!("{}\n", HEAD)))
    }

    #[tokio::test]
    async fn test_pre_modification_clean_tree_skips_commit() {
        let vcs = VersionControl::new(clean_repo());
        assert_eq!(vcs.pre_modification_commit().await.unwrap(), HEAD);
        assert!(!vcs.executor().calls().iter().any(|c| c.starts_with("commit")));
    }

    #[tokio::test]
    async fn test_pre_modification_dirty_tree_commits() {
        let executor = clean_repo()
            .with_response("diff --cached --quiet", VcsOutput::failed(""))
            .with_response("commit -m Pre-modification commit", VcsOutput::ok(""));
        let vcs = VersionControl::new(executor);

        assert_eq!(vcs.pre_modification_commit().await.unwrap(), HEAD);
        assert_eq!(
            vcs.executor().calls(),
            vec![
                "add -A",
                "diff --cached --quiet",
                "commit -m Pre-modification commit",
                "rev-parse HEAD"
            ]
        );
    }

    #[tokio::test]
    async fn test_commit_all_clean_is_none() {
        let vcs = VersionControl::new(clean_repo());
        assert!(vcs.commit_all("Apply patch").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restore_path() {
        let executor = clean_repo().with_response(
            &format!("checkout {} -- core.py", HEAD),
            VcsOutput::ok(""),
        );
        let vcs = VersionControl::new(executor);
        vcs.restore_path(HEAD, "core.py").await.unwrap();

        assert!(vcs.restore_path("HEAD", "core.py").await.is_err());
        assert!(vcs.restore_path(HEAD, "../core.py").await.is_err());
    }

    #[tokio::test]
    async fn test_failed_command_surfaces_stderr() {
        let executor = MockVcsExecutor::new()
            .with_response("rev-parse HEAD", VcsOutput::failed("fatal: not a git repository"));
        let err = VersionControl::new(executor).head().await.unwrap_err();
        assert!(err.to_string().contains("not a git repository"));
    }
}
