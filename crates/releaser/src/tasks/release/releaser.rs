//! Tagging and releasing of a single repository

use crate::crds::{ReleaseAction, Repository};
use crate::tasks::credentials::{Author, Credentials};
use crate::tasks::git::{
    sync_working_copy, GitAuth, GitError, GitOperations, SyncStage, WorkspaceCache,
};
use crate::tasks::metrics::MetricsSink;
use crate::tasks::providers::ProviderFactory;
use scm::{ReleaseOutcome, ReleaseSpec, ScmError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Failure of one repository step. Every variant is retryable.
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("no version to release")]
    MissingVersion { address: String },

    #[error("cannot prepare credentials: {source}")]
    Auth { address: String, source: GitError },

    #[error("clone or fetch failed: {source}")]
    Clone { address: String, source: GitError },

    #[error("checkout failed: {source}")]
    Checkout { address: String, source: GitError },

    #[error("pull failed: {source}")]
    Pull { address: String, source: GitError },

    #[error("cannot create tag {tag}: {source}")]
    Tag {
        address: String,
        tag: String,
        source: GitError,
    },

    #[error("cannot push tag {tag}: {source}")]
    Push {
        address: String,
        tag: String,
        source: GitError,
    },

    #[error("provider release failed: {source}")]
    Provider { address: String, source: ScmError },
}

impl ReleaseError {
    /// Remote the failure happened on.
    pub fn address(&self) -> &str {
        match self {
            ReleaseError::MissingVersion { address }
            | ReleaseError::Auth { address, .. }
            | ReleaseError::Clone { address, .. }
            | ReleaseError::Checkout { address, .. }
            | ReleaseError::Pull { address, .. }
            | ReleaseError::Tag { address, .. }
            | ReleaseError::Push { address, .. }
            | ReleaseError::Provider { address, .. } => address,
        }
    }

    pub(crate) fn from_sync(address: &str, (stage, source): (SyncStage, GitError)) -> Self {
        let address = address.to_string();
        match stage {
            SyncStage::Clone => ReleaseError::Clone { address, source },
            SyncStage::Checkout => ReleaseError::Checkout { address, source },
            SyncStage::Pull => ReleaseError::Pull { address, source },
        }
    }
}

/// What happened to one repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseReport {
    pub repository: String,
    pub address: String,
    pub version: String,
    pub action: ReleaseAction,
    /// `false` when the tag already existed on the remote
    pub tag_created: bool,
    /// Provider outcome; `None` for tag-only repositories and for providers
    /// without an API client
    pub release: Option<ReleaseOutcome>,
}

pub struct RepositoryReleaser {
    git: Arc<dyn GitOperations>,
    cache: Arc<WorkspaceCache>,
    providers: Arc<dyn ProviderFactory>,
    metrics: Arc<dyn MetricsSink>,
}

impl RepositoryReleaser {
    pub fn new(
        git: Arc<dyn GitOperations>,
        cache: Arc<WorkspaceCache>,
        providers: Arc<dyn ProviderFactory>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            git,
            cache,
            providers,
            metrics,
        }
    }

    /// Tag `repo` at the tip of its branch, then run its release action.
    #[instrument(skip_all, fields(repository = %repo.name, address = %repo.address))]
    pub async fn release_one(
        &self,
        repo: &Repository,
        request_version: &str,
        credentials: &Credentials,
        author: &Author,
    ) -> Result<ReleaseReport, ReleaseError> {
        let address = repo.address.clone();
        let version = repo.effective_version(request_version).trim().to_string();
        if version.is_empty() {
            return Err(ReleaseError::MissingVersion { address });
        }
        let branch = repo.effective_branch();

        let auth = GitAuth::from_credentials(credentials).map_err(|source| ReleaseError::Auth {
            address: address.clone(),
            source,
        })?;
        let dir = self
            .cache
            .path_for(&address)
            .map_err(|source| ReleaseError::Clone {
                address: address.clone(),
                source,
            })?;

        let tag_created = {
            let _guard = self.cache.lock(&dir).await;

            sync_working_copy(self.git.as_ref(), &address, branch, &dir, &auth)
                .await
                .map_err(|e| ReleaseError::from_sync(&address, e))?;

            let exists = self
                .git
                .remote_tag_exists(&dir, &version, &auth)
                .await
                .map_err(|source| ReleaseError::Clone {
                    address: address.clone(),
                    source,
                })?;

            if exists {
                info!(tag = %version, "Tag already exists on remote, skipping");
                false
            } else {
                self.git
                    .create_tag(&dir, &version, repo.effective_message(), author)
                    .await
                    .map_err(|source| ReleaseError::Tag {
                        address: address.clone(),
                        tag: version.clone(),
                        source,
                    })?;
                self.git
                    .push_tag(&dir, &version, &auth)
                    .await
                    .map_err(|source| ReleaseError::Push {
                        address: address.clone(),
                        tag: version.clone(),
                        source,
                    })?;
                self.metrics.tag();
                info!(tag = %version, branch = %branch, "Pushed tag");
                true
            }
        };

        let action = repo.effective_action(&version);
        let release = match action {
            ReleaseAction::PreRelease | ReleaseAction::Release => {
                self.provider_release(repo, &version, action, credentials)
                    .await?
            }
            ReleaseAction::Tag | ReleaseAction::Auto => None,
        };

        Ok(ReleaseReport {
            repository: repo.name.clone(),
            address,
            version,
            action,
            tag_created,
            release,
        })
    }

    async fn provider_release(
        &self,
        repo: &Repository,
        version: &str,
        action: ReleaseAction,
        credentials: &Credentials,
    ) -> Result<Option<ReleaseOutcome>, ReleaseError> {
        let provider_error = |source: ScmError| ReleaseError::Provider {
            address: repo.address.clone(),
            source,
        };

        let Some(client) = self
            .providers
            .client(repo, credentials.token())
            .map_err(provider_error)?
        else {
            warn!(
                provider = %repo.effective_provider(),
                "Provider has no release API client, keeping the tag only"
            );
            return Ok(None);
        };

        let prerelease = action == ReleaseAction::PreRelease;
        let spec = ReleaseSpec::new(version, repo.effective_branch()).prerelease(prerelease);
        let outcome = client.release(&spec).await.map_err(provider_error)?;
        debug!(tag = %version, ?outcome, "Provider release finished");

        if outcome != ReleaseOutcome::AlreadyPublished {
            if prerelease {
                self.metrics.pre_release();
            } else {
                self.metrics.release();
            }
        }
        Ok(Some(outcome))
    }
}
