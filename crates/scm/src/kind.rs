//! Git hosting provider identification.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Git hosting provider of a repository.
///
/// Only GitHub, GitLab and Gitea have API clients. The remaining values exist
/// so that addresses on those hosts are still identified correctly; tagging
/// works for every provider because it only needs git.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    GitHub,
    GitLab,
    Gitea,
    Gitee,
    Bitbucket,
    Unknown,
}

impl ProviderKind {
    /// All provider kinds, in declaration order.
    pub const ALL: [ProviderKind; 6] = [
        ProviderKind::GitHub,
        ProviderKind::GitLab,
        ProviderKind::Gitea,
        ProviderKind::Gitee,
        ProviderKind::Bitbucket,
        ProviderKind::Unknown,
    ];

    /// Lowercase identifier, as used in resource manifests.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::GitHub => "github",
            ProviderKind::GitLab => "gitlab",
            ProviderKind::Gitea => "gitea",
            ProviderKind::Gitee => "gitee",
            ProviderKind::Bitbucket => "bitbucket",
            ProviderKind::Unknown => "unknown",
        }
    }

    /// Canonical public host prefix, for providers with a well-known SaaS host.
    #[must_use]
    pub fn canonical_prefix(self) -> Option<&'static str> {
        match self {
            ProviderKind::GitHub => Some("https://github.com/"),
            ProviderKind::GitLab => Some("https://gitlab.com/"),
            ProviderKind::Gitee => Some("https://gitee.com/"),
            ProviderKind::Bitbucket => Some("https://bitbucket.org/"),
            ProviderKind::Gitea | ProviderKind::Unknown => None,
        }
    }

    /// Guess the provider from a repository address.
    ///
    /// Returns `None` for an empty address and [`ProviderKind::Unknown`] for
    /// any host that is not one of the well-known public providers.
    #[must_use]
    pub fn from_address(address: &str) -> Option<Self> {
        let address = address.trim();
        if address.is_empty() {
            return None;
        }

        if address.starts_with("https://gitea.com/") {
            return Some(ProviderKind::Gitea);
        }

        Self::ALL
            .into_iter()
            .find(|kind| {
                kind.canonical_prefix()
                    .is_some_and(|prefix| address.starts_with(prefix))
            })
            .or(Some(ProviderKind::Unknown))
    }

    /// Parse a provider identifier case-insensitively.
    #[must_use]
    pub fn from_str_ci(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }

    /// Whether this crate ships an API client for the provider.
    #[must_use]
    pub fn has_client(self) -> bool {
        matches!(
            self,
            ProviderKind::GitHub | ProviderKind::GitLab | ProviderKind::Gitea
        )
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
