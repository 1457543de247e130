//! Provider client construction for configured repositories

use crate::crds::Repository;
use scm::{client_for, ApiEndpoints, ProviderTarget, ScmProvider};

/// Builds SCM clients; the seam that lets the pipeline run against fakes.
pub trait ProviderFactory: Send + Sync {
    /// Client for `repo`, or `None` when its provider has no API client.
    fn client(
        &self,
        repo: &Repository,
        token: Option<String>,
    ) -> scm::Result<Option<Box<dyn ScmProvider>>>;
}

/// REST clients against the configured API endpoints
#[derive(Debug, Clone, Default)]
pub struct RestProviderFactory {
    endpoints: ApiEndpoints,
}

impl RestProviderFactory {
    pub fn new(endpoints: ApiEndpoints) -> Self {
        Self { endpoints }
    }
}

impl ProviderFactory for RestProviderFactory {
    fn client(
        &self,
        repo: &Repository,
        token: Option<String>,
    ) -> scm::Result<Option<Box<dyn ScmProvider>>> {
        let kind = repo.effective_provider();
        if !kind.has_client() {
            return Ok(None);
        }
        let target = ProviderTarget::from_address(kind, &repo.address, None)?.with_token(token);
        client_for(&target, &self.endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scm::ProviderKind;

    fn repo(provider: Option<ProviderKind>, address: &str) -> Repository {
        Repository {
            name: "r".to_string(),
            provider,
            address: address.to_string(),
            ..Repository::default()
        }
    }

    #[test]
    fn test_clients_for_supported_providers() {
        let factory = RestProviderFactory::default();

        let github = factory
            .client(&repo(None, "https://github.com/org/repo"), None)
            .unwrap()
            .unwrap();
        assert_eq!(github.kind(), ProviderKind::GitHub);

        let gitea = factory
            .client(
                &repo(Some(ProviderKind::Gitea), "https://git.example.org/org/repo"),
                Some("token".to_string()),
            )
            .unwrap()
            .unwrap();
        assert_eq!(gitea.kind(), ProviderKind::Gitea);
    }

    #[test]
    fn test_no_client_for_identification_only_providers() {
        let factory = RestProviderFactory::default();
        for address in [
            "https://gitee.com/org/repo",
            "https://bitbucket.org/org/repo",
            "https://git.example.org/org/repo",
        ] {
            assert!(factory.client(&repo(None, address), None).unwrap().is_none());
        }
    }
}
