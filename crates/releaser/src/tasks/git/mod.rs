//! Git access for working copies.
//!
//! [`GitOperations`] is the seam between the release pipeline and git; the
//! controller uses [`GitCli`], which drives the system `git` binary.

pub mod auth;
pub mod cache;
pub mod cli;

pub use auth::GitAuth;
pub use cache::WorkspaceCache;
pub use cli::GitCli;

use crate::tasks::credentials::Author;
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed: {stderr}")]
    Failed { command: String, stderr: String },

    #[error("failed to prepare git credentials: {0}")]
    Auth(#[source] std::io::Error),

    #[error("invalid repository address '{0}'")]
    InvalidAddress(String),
}

/// Git operations used by the release pipeline.
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Clone `branch` of `remote` into `dest`.
    async fn clone_branch(
        &self,
        remote: &str,
        branch: &str,
        dest: &Path,
        auth: &GitAuth,
    ) -> Result<(), GitError>;

    /// Fetch branches and tags from `origin`, overwriting moved tags.
    async fn fetch(&self, dir: &Path, auth: &GitAuth) -> Result<(), GitError>;

    /// Force-checkout `branch` at `origin/<branch>`.
    async fn checkout(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    /// Hard reset the working tree to `origin/<branch>`.
    async fn reset_to_remote(&self, dir: &Path, branch: &str) -> Result<(), GitError>;

    async fn remote_tag_exists(
        &self,
        dir: &Path,
        tag: &str,
        auth: &GitAuth,
    ) -> Result<bool, GitError>;

    /// Create an annotated tag at HEAD.
    async fn create_tag(
        &self,
        dir: &Path,
        tag: &str,
        message: &str,
        author: &Author,
    ) -> Result<(), GitError>;

    async fn push_tag(&self, dir: &Path, tag: &str, auth: &GitAuth) -> Result<(), GitError>;

    /// Stage everything and commit. Returns `false` when there was nothing to
    /// commit.
    async fn commit_all(
        &self,
        dir: &Path,
        message: &str,
        author: &Author,
    ) -> Result<bool, GitError>;

    /// Push HEAD to `refs/heads/<branch>` on `origin`.
    async fn push_branch(&self, dir: &Path, branch: &str, auth: &GitAuth)
        -> Result<(), GitError>;
}

/// Step of [`sync_working_copy`] that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Clone,
    Checkout,
    Pull,
}

/// Bring the working copy at `dir` to the tip of `origin/<branch>`.
///
/// An existing copy is fetched, force-checked-out and hard reset so upstream
/// force-pushes are tolerated; otherwise the branch is cloned.
pub async fn sync_working_copy(
    git: &dyn GitOperations,
    remote: &str,
    branch: &str,
    dir: &Path,
    auth: &GitAuth,
) -> Result<(), (SyncStage, GitError)> {
    if !dir.join(".git").exists() {
        if dir.exists() {
            debug!(dir = %dir.display(), "Removing incomplete working copy");
            tokio::fs::remove_dir_all(dir)
                .await
                .map_err(|source| {
                    (
                        SyncStage::Clone,
                        GitError::Spawn {
                            command: "clone".to_string(),
                            source,
                        },
                    )
                })?;
        }
        return git
            .clone_branch(remote, branch, dir, auth)
            .await
            .map_err(|e| (SyncStage::Clone, e));
    }

    git.fetch(dir, auth)
        .await
        .map_err(|e| (SyncStage::Clone, e))?;
    git.checkout(dir, branch)
        .await
        .map_err(|e| (SyncStage::Checkout, e))?;
    git.reset_to_remote(dir, branch)
        .await
        .map_err(|e| (SyncStage::Pull, e))
}
