//! Repository address parsing.

use crate::error::ScmError;
use crate::kind::ProviderKind;
use url::Url;

/// Organization and repository path of a hosted repository.
///
/// Nested groups (GitLab subgroups) stay in `organization`, so
/// `group/sub/repo` becomes organization `group/sub` and repository `repo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoPath {
    pub organization: String,
    pub repository: String,
}

impl RepoPath {
    #[must_use]
    pub fn new(organization: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            repository: repository.into(),
        }
    }

    /// `organization/repository`
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.organization, self.repository)
    }

    /// Parse an `org/repo` style path.
    pub fn parse(path: &str) -> Result<Self, ScmError> {
        let cleaned = path.trim().trim_matches('/');
        let cleaned = cleaned.strip_suffix(".git").unwrap_or(cleaned);

        match cleaned.rsplit_once('/') {
            Some((org, repo)) if !org.is_empty() && !repo.is_empty() => Ok(Self::new(org, repo)),
            _ => Err(ScmError::InvalidAddress(path.to_string())),
        }
    }

    /// Derive the repository path from an address.
    ///
    /// The provider's canonical host prefix is stripped when it has one.
    /// Self-hosted providers strip `server` instead, or the scheme and host of
    /// the address when no server is given.
    pub fn from_address(
        kind: ProviderKind,
        address: &str,
        server: Option<&str>,
    ) -> Result<Self, ScmError> {
        let address = address.trim();

        let prefix = kind
            .canonical_prefix()
            .map(str::to_string)
            .or_else(|| server.map(with_trailing_slash))
            .or_else(|| server_base(address));

        if let Some(rest) = prefix.as_deref().and_then(|p| address.strip_prefix(p)) {
            return Self::parse(rest);
        }

        // scp-like SSH addresses: git@host:org/repo.git
        if !address.contains("://") {
            if let Some((_, path)) = address.split_once(':') {
                return Self::parse(path);
            }
        }

        let url = Url::parse(address).map_err(|_| ScmError::InvalidAddress(address.to_string()))?;
        Self::parse(url.path())
    }
}

/// `scheme://host[:port]/` of an address, used as the server of self-hosted
/// providers.
#[must_use]
pub fn server_base(address: &str) -> Option<String> {
    let url = Url::parse(address.trim()).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}://{host}:{port}/", url.scheme()),
        None => format!("{}://{host}/", url.scheme()),
    })
}

fn with_trailing_slash(server: &str) -> String {
    if server.ends_with('/') {
        server.to_string()
    } else {
        format!("{server}/")
    }
}
