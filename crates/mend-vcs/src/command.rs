//! Git command execution abstraction

use async_trait::async_trait;
use mend_core::{MendError, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Mutex, PoisonError};
use tokio::process::Command;
use tracing::{debug, instrument};

/// Output from a git command
#[derive(Debug, Clone, Default)]
pub struct VcsOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl VcsOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            stdout: stdout.to_string(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failed(stderr: &str) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: false,
        }
    }
}

impl From<Output> for VcsOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        }
    }
}

/// Trait for executing git commands (allows mocking in tests)
#[async_trait]
pub trait VcsExecutor: Send + Sync {
    /// Execute a git command with the given arguments
    async fn exec(&self, args: &[&str]) -> Result<VcsOutput>;

    /// Get the repository root
    fn repo_root(&self) -> &Path;
}

/// Real git executor
#[derive(Clone)]
pub struct GitCommand {
    repo_root: PathBuf,
}

impl GitCommand {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Executor for `root` if it is a git working tree
    pub fn detect(root: &Path) -> Option<Self> {
        if root.join(".git").exists() {
            Some(Self::new(root))
        } else {
            None
        }
    }
}

#[async_trait]
impl VcsExecutor for GitCommand {
    #[instrument(skip(self), fields(repo = %self.repo_root.display()))]
    async fn exec(&self, args: &[&str]) -> Result<VcsOutput> {
        debug!("Executing git {:?}", args);

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .output()
            .await
            .map_err(|e| MendError::Vcs(format!("Failed to execute git: {}", e)))?;

        let git_output = VcsOutput::from(output);

        if !git_output.success {
            debug!("git command failed: {}", git_output.stderr);
        }

        Ok(git_output)
    }

    fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

/// Mock git executor for testing
///
/// Responses are keyed by the space-joined argument list. Every call is
/// recorded so tests can assert on the exact command sequence.
#[derive(Default)]
pub struct MockVcsExecutor {
    repo_root: PathBuf,
    responses: HashMap<String, VcsOutput>,
    calls: Mutex<Vec<String>>,
}

impl MockVcsExecutor {
    pub fn new() -> Self {
        Self {
            repo_root: PathBuf::from("/mock/repo"),
            ..Self::default()
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.repo_root = root.into();
        self
    }

    pub fn with_response(mut self, command: &str, output: VcsOutput) -> Self {
        self.responses.insert(command.to_string(), output);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl VcsExecutor for MockVcsExecutor {
    async fn exec(&self, args: &[&str]) -> Result<VcsOutput> {
        let key = args.join(" ");
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(key.clone());
        self.responses
            .get(&key)
            .cloned()
            .ok_or_else(|| MendError::Vcs(format!("No mock response for: {}", key)))
    }

    fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_mock_executor() {
        let executor = MockVcsExecutor::new().with_response("rev-parse HEAD", VcsOutput::ok("abc123\n"));

        let output = executor.exec(&["rev-parse", "HEAD"]).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "abc123\n");
        assert!(executor.exec(&["status"]).await.is_err());
        assert_eq!(executor.calls(), vec!["rev-parse HEAD", "status"]);
    }

    #[test]
    fn test_detect_requires_git_dir() {
        let temp = TempDir::new().unwrap();
        assert!(GitCommand::detect(temp.path()).is_none());

        std::fs::create_dir(temp.path().join(".git")).unwrap();
        let git = GitCommand::detect(temp.path()).unwrap();
        assert_eq!(git.repo_root(), temp.path());
    }
}
