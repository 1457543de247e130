//! Provider clients.

pub mod gitea;
pub mod github;
pub mod gitlab;

use async_trait::async_trait;

use crate::address::{server_base, RepoPath};
use crate::error::ScmError;
use crate::kind::ProviderKind;
use crate::Result;

/// Number of release list pages scanned when a tag lookup misses.
pub const MAX_RELEASE_PAGES: u32 = 5;

/// Page size used for release list scans.
pub const RELEASE_PAGE_SIZE: u32 = 50;

pub(crate) const USER_AGENT: &str = "ks-releaser";

/// Capability interface shared by all provider clients.
#[async_trait]
pub trait ScmProvider: Send + Sync {
    /// Provider this client talks to.
    fn kind(&self) -> ProviderKind;

    /// Create a release for `spec.tag`, or update a pending draft release with
    /// the same tag. A published release is left untouched.
    async fn release(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome>;

    /// Comment on the open issue titled `title`, or open a new one.
    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueOutcome>;
}

/// Parameters of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSpec {
    pub tag: String,
    pub commitish: String,
    pub name: String,
    pub body: String,
    pub draft: bool,
    pub prerelease: bool,
}

impl ReleaseSpec {
    /// A published, non pre-release release named after its tag.
    #[must_use]
    pub fn new(tag: impl Into<String>, commitish: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            name: tag.clone(),
            tag,
            commitish: commitish.into(),
            body: String::new(),
            draft: false,
            prerelease: false,
        }
    }

    #[must_use]
    pub fn prerelease(mut self, prerelease: bool) -> Self {
        self.prerelease = prerelease;
        self
    }

    #[must_use]
    pub fn draft(mut self, draft: bool) -> Self {
        self.draft = draft;
        self
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// What [`ScmProvider::release`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Created,
    UpdatedDraft,
    AlreadyPublished,
}

/// What [`ScmProvider::create_issue`] did, with the issue number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    Created(u64),
    Commented(u64),
}

impl IssueOutcome {
    #[must_use]
    pub fn number(self) -> u64 {
        match self {
            IssueOutcome::Created(n) | IssueOutcome::Commented(n) => n,
        }
    }
}

/// API base URLs for the public SaaS providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoints {
    pub github_api: String,
    pub gitlab_api: String,
}

impl Default for ApiEndpoints {
    fn default() -> Self {
        Self {
            github_api: "https://api.github.com".to_string(),
            gitlab_api: "https://gitlab.com/api/v4".to_string(),
        }
    }
}

/// Everything needed to build a client for one repository.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    pub kind: ProviderKind,
    pub repo: RepoPath,
    /// Server base URL of self-hosted providers, `scheme://host[:port]/`.
    pub server: Option<String>,
    pub token: Option<String>,
}

impl ProviderTarget {
    /// Resolve the repository path and server of `address`.
    pub fn from_address(kind: ProviderKind, address: &str, server: Option<&str>) -> Result<Self> {
        let repo = RepoPath::from_address(kind, address, server)?;
        let server = match server {
            Some(server) => Some(server.to_string()),
            None if kind.canonical_prefix().is_none() => server_base(address),
            None => None,
        };

        Ok(Self {
            kind,
            repo,
            server,
            token: None,
        })
    }

    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }
}

/// Build the client for a target.
///
/// Returns `Ok(None)` for providers without an API client.
pub fn client_for(
    target: &ProviderTarget,
    endpoints: &ApiEndpoints,
) -> Result<Option<Box<dyn ScmProvider>>> {
    let client: Box<dyn ScmProvider> = match target.kind {
        ProviderKind::GitHub => Box::new(github::GitHubProvider::new(
            &endpoints.github_api,
            target.repo.clone(),
            target.token.clone(),
        )),
        ProviderKind::GitLab => Box::new(gitlab::GitLabProvider::new(
            &endpoints.gitlab_api,
            target.repo.clone(),
            target.token.clone(),
        )),
        ProviderKind::Gitea => {
            let server = target
                .server
                .as_deref()
                .ok_or(ScmError::MissingServer("gitea"))?;
            Box::new(gitea::GiteaProvider::new(
                server,
                target.repo.clone(),
                target.token.clone(),
            ))
        }
        ProviderKind::Gitee | ProviderKind::Bitbucket | ProviderKind::Unknown => return Ok(None),
    };

    Ok(Some(client))
}

/// Turn a non-success response into [`ScmError::Api`].
pub(crate) async fn check_response(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(ScmError::Api {
        provider,
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_for_known_providers() {
        let endpoints = ApiEndpoints::default();

        let github =
            ProviderTarget::from_address(ProviderKind::GitHub, "https://github.com/x/b", None)
                .unwrap();
        assert!(github.server.is_none());
        assert_eq!(
            client_for(&github, &endpoints).unwrap().unwrap().kind(),
            ProviderKind::GitHub
        );

        let gitea =
            ProviderTarget::from_address(ProviderKind::Gitea, "https://localhost/x/b.git", None)
                .unwrap();
        assert_eq!(gitea.server.as_deref(), Some("https://localhost/"));
        assert_eq!(
            client_for(&gitea, &endpoints).unwrap().unwrap().kind(),
            ProviderKind::Gitea
        );
    }

    #[test]
    fn test_client_for_identification_only_providers() {
        let endpoints = ApiEndpoints::default();
        for (kind, address) in [
            (ProviderKind::Gitee, "https://gitee.com/x/b"),
            (ProviderKind::Bitbucket, "https://bitbucket.org/x/b"),
            (ProviderKind::Unknown, "https://git.example.org/x/b"),
        ] {
            let target = ProviderTarget::from_address(kind, address, None).unwrap();
            assert!(client_for(&target, &endpoints).unwrap().is_none());
        }
    }

    #[test]
    fn test_empty_token_is_anonymous() {
        let target =
            ProviderTarget::from_address(ProviderKind::GitHub, "https://github.com/x/b", None)
                .unwrap()
                .with_token(Some(String::new()));
        assert!(target.token.is_none());
    }

    #[test]
    fn test_release_spec_builder() {
        let spec = ReleaseSpec::new("v1.0.0", "main").prerelease(true).body("notes");
        assert_eq!(spec.name, "v1.0.0");
        assert_eq!(spec.commitish, "main");
        assert!(spec.prerelease);
        assert!(!spec.draft);
        assert_eq!(spec.body, "notes");
    }
}
