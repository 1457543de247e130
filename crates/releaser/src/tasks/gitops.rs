//! Lifecycle write-back to the GitOps repository
//!
//! A finished request is marked `done` in its `<name>.yaml` and the next draft
//! of the series is written next to it, as two commits on the GitOps branch.
//! Without GitOps the same transition happens on the in-cluster objects.

use crate::crds::{Phase, Releaser};
use crate::tasks::credentials::{Author, Credentials};
use crate::tasks::git::{sync_working_copy, GitAuth, GitError, GitOperations, WorkspaceCache};
use crate::tasks::metrics::MetricsSink;
use crate::tasks::version::{bump_request, bump_request_document};
use kube::ResourceExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum GitOpsError {
    #[error("cannot sync GitOps repository {address}: {source}")]
    Sync { address: String, source: GitError },

    #[error("cannot search GitOps repository for {name}.yaml: {source}")]
    Lookup {
        name: String,
        source: walkdir::Error,
    },

    #[error("{name}.yaml not found in GitOps repository {address}")]
    MissingFile { name: String, address: String },

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("cannot serialize release request {name}: {source}")]
    Serialize {
        name: String,
        source: serde_yaml::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot commit to GitOps repository {address}: {source}")]
    Commit { address: String, source: GitError },

    #[error("cannot push to GitOps repository {address}: {source}")]
    Push { address: String, source: GitError },
}

/// Result of a successful finalize
#[derive(Debug, Clone)]
pub enum FinalizeOutcome {
    /// GitOps disabled: the request is `done` and `next` must be created
    Sibling { next: Box<Releaser> },
    /// GitOps enabled: both documents were committed and pushed
    Written {
        done_file: PathBuf,
        next_file: PathBuf,
        next_name: String,
    },
}

pub struct GitOpsWriter {
    git: Arc<dyn GitOperations>,
    cache: Arc<WorkspaceCache>,
    metrics: Arc<dyn MetricsSink>,
    retain_pre_release: bool,
}

impl GitOpsWriter {
    pub fn new(
        git: Arc<dyn GitOperations>,
        cache: Arc<WorkspaceCache>,
        metrics: Arc<dyn MetricsSink>,
        retain_pre_release: bool,
    ) -> Self {
        Self {
            git,
            cache,
            metrics,
            retain_pre_release,
        }
    }

    /// Complete a request whose repositories were all released.
    #[instrument(skip_all, fields(releaser = %request.name_any()))]
    pub async fn finalize(
        &self,
        request: &mut Releaser,
        credentials: &Credentials,
        author: &Author,
    ) -> Result<FinalizeOutcome, GitOpsError> {
        if request.git_ops_enabled().is_none() {
            let mut next = request.clone();
            bump_request(&mut next, self.retain_pre_release);
            request.spec.phase = Phase::Done;
            info!(next = %next.name_any(), "Release done, prepared next request");
            return Ok(FinalizeOutcome::Sibling {
                next: Box::new(next),
            });
        }

        self.write_back(request, credentials, author).await
    }

    async fn write_back(
        &self,
        request: &Releaser,
        credentials: &Credentials,
        author: &Author,
    ) -> Result<FinalizeOutcome, GitOpsError> {
        let name = request.name_any();
        let repository = request
            .git_ops_enabled()
            .map(|g| g.repository.clone())
            .unwrap_or_default();
        let address = repository.address.clone();
        let branch = repository.effective_branch();

        let sync_error = |source: GitError| GitOpsError::Sync {
            address: address.clone(),
            source,
        };
        let auth = GitAuth::from_credentials(credentials).map_err(sync_error)?;
        let dir = self.cache.path_for(&address).map_err(sync_error)?;
        let _guard = self.cache.lock(&dir).await;

        sync_working_copy(self.git.as_ref(), &address, branch, &dir, &auth)
            .await
            .map_err(|(_, source)| sync_error(source))?;

        let done_file = find_document(&dir, &name)?.ok_or_else(|| GitOpsError::MissingFile {
            name: name.clone(),
            address: address.clone(),
        })?;
        debug!(file = %done_file.display(), "Found release request document");

        let data = tokio::fs::read(&done_file)
            .await
            .map_err(|source| GitOpsError::Read {
                path: done_file.clone(),
                source,
            })?;
        let mut document: Releaser =
            serde_yaml::from_slice(&data).map_err(|source| GitOpsError::Parse {
                path: done_file.clone(),
                source,
            })?;
        document.spec.phase = Phase::Done;
        document.strip_transient_metadata();

        let done_data = serde_yaml::to_string(&document)
            .map_err(|source| GitOpsError::Serialize {
                name: name.clone(),
                source,
            })?
            .into_bytes();
        write_file(&done_file, &done_data).await?;
        self.commit_and_push(
            &dir,
            branch,
            &format!("release: mark {name} as done"),
            author,
            &auth,
            &address,
        )
        .await?;

        let (next_data, next_filename, _) =
            bump_request_document(&done_data, self.retain_pre_release).map_err(|source| {
                GitOpsError::Parse {
                    path: done_file.clone(),
                    source,
                }
            })?;
        let next_name = next_filename
            .strip_suffix(".yaml")
            .unwrap_or(&next_filename)
            .to_string();
        let next_file = done_file
            .parent()
            .unwrap_or(dir.as_path())
            .join(&next_filename);
        write_file(&next_file, &next_data).await?;
        self.commit_and_push(
            &dir,
            branch,
            &format!("release: prepare {next_name}"),
            author,
            &auth,
            &address,
        )
        .await?;

        self.metrics.gitops();
        info!(next = %next_name, "GitOps repository updated");

        Ok(FinalizeOutcome::Written {
            done_file,
            next_file,
            next_name,
        })
    }

    async fn commit_and_push(
        &self,
        dir: &Path,
        branch: &str,
        message: &str,
        author: &Author,
        auth: &GitAuth,
        address: &str,
    ) -> Result<(), GitOpsError> {
        let committed = self
            .git
            .commit_all(dir, message, author)
            .await
            .map_err(|source| GitOpsError::Commit {
                address: address.to_string(),
                source,
            })?;
        if !committed {
            debug!(message, "Nothing changed, pushing existing history");
        }
        self.git
            .push_branch(dir, branch, auth)
            .await
            .map_err(|source| GitOpsError::Push {
                address: address.to_string(),
                source,
            })
    }
}

/// Find `<name>.yaml` anywhere below `root`, outside `.git`.
fn find_document(root: &Path, name: &str) -> Result<Option<PathBuf>, GitOpsError> {
    let wanted = format!("{name}.yaml");
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|source| GitOpsError::Lookup {
            name: name.to_string(),
            source,
        })?;
        if entry.file_type().is_file() && entry.file_name() == wanted.as_str() {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}

async fn write_file(path: &Path, data: &[u8]) -> Result<(), GitOpsError> {
    tokio::fs::write(path, data)
        .await
        .map_err(|source| GitOpsError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{GitOps, ReleaserSpec, Repository};
    use crate::tasks::metrics::NoopMetrics;
    use tempfile::TempDir;

    #[test]
    fn test_find_document_skips_git_dir() {
        let root = TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join(".git")).unwrap();
        std::fs::write(root.path().join(".git/rel-v1.0.0.yaml"), "x").unwrap();
        assert_eq!(find_document(root.path(), "rel-v1.0.0").unwrap(), None);

        std::fs::create_dir_all(root.path().join("releases/2025")).unwrap();
        let nested = root.path().join("releases/2025/rel-v1.0.0.yaml");
        std::fs::write(&nested, "x").unwrap();
        assert_eq!(
            find_document(root.path(), "rel-v1.0.0").unwrap(),
            Some(nested)
        );
    }

    #[tokio::test]
    async fn test_disabled_gitops_produces_sibling() {
        let root = TempDir::new().unwrap();
        let writer = GitOpsWriter::new(
            Arc::new(crate::tasks::git::GitCli::default()),
            Arc::new(WorkspaceCache::new(root.path())),
            Arc::new(NoopMetrics),
            true,
        );
        let mut request = Releaser::new(
            "rel-v1.2.3-alpha.1",
            ReleaserSpec {
                phase: Phase::Ready,
                version: "v1.2.3-alpha.1".to_string(),
                git_ops: Some(GitOps {
                    enable: false,
                    repository: Repository::default(),
                    secret: None,
                }),
                ..ReleaserSpec::default()
            },
        );

        let outcome = writer
            .finalize(
                &mut request,
                &Credentials::Anonymous,
                &Author {
                    name: "bot".to_string(),
                    email: "bot@example.com".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(request.spec.phase, Phase::Done);
        let FinalizeOutcome::Sibling { next } = outcome else {
            panic!("expected a sibling request");
        };
        assert_eq!(next.name_any(), "rel-v1.2.3-alpha.2");
        assert_eq!(next.spec.version, "v1.2.3-alpha.2");
        assert_eq!(next.spec.phase, Phase::Draft);
    }
}
