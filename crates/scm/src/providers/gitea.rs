//! Gitea REST v1 client for self-hosted servers.

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    check_response, IssueOutcome, ReleaseOutcome, ReleaseSpec, ScmProvider, MAX_RELEASE_PAGES,
    RELEASE_PAGE_SIZE,
};
use crate::address::RepoPath;
use crate::kind::ProviderKind;
use crate::Result;

const PROVIDER: &str = "gitea";

pub struct GiteaProvider {
    api_base: String,
    repo: RepoPath,
    token: Option<String>,
    client: reqwest::Client,
}

impl GiteaProvider {
    /// `server` is the base URL of the Gitea instance, e.g. `https://gitea.com/`.
    #[must_use]
    pub fn new(server: &str, repo: RepoPath, token: Option<String>) -> Self {
        Self {
            api_base: format!("{}/api/v1", server.trim_end_matches('/')),
            repo,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}{path}",
            self.api_base, self.repo.organization, self.repo.repository
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(USER_AGENT, super::USER_AGENT);

        match &self.token {
            Some(token) => builder.header(AUTHORIZATION, format!("token {token}")),
            None => builder,
        }
    }

    async fn find_release(&self, tag: &str) -> Result<Option<Release>> {
        let url = self.repo_url(&format!("/releases/tags/{}", urlencoding::encode(tag)));
        let response = self.request(Method::GET, &url).send().await?;

        if response.status() != StatusCode::NOT_FOUND {
            let release = check_response(PROVIDER, response).await?.json().await?;
            return Ok(Some(release));
        }

        for page in 1..=MAX_RELEASE_PAGES {
            let response = self
                .request(Method::GET, &self.repo_url("/releases"))
                .query(&[("page", page), ("limit", RELEASE_PAGE_SIZE)])
                .send()
                .await?;
            let releases: Vec<Release> = check_response(PROVIDER, response).await?.json().await?;
            let last_page = releases.len() < RELEASE_PAGE_SIZE as usize;

            if let Some(found) = releases.into_iter().find(|r| r.tag_name == tag) {
                return Ok(Some(found));
            }
            if last_page {
                break;
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl ScmProvider for GiteaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gitea
    }

    async fn release(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome> {
        let payload = ReleasePayload {
            tag_name: &spec.tag,
            target_commitish: &spec.commitish,
            name: &spec.name,
            body: &spec.body,
            draft: spec.draft,
            prerelease: spec.prerelease,
        };

        let (request, outcome) = match self.find_release(&spec.tag).await? {
            Some(existing) if existing.draft => (
                self.request(
                    Method::PATCH,
                    &self.repo_url(&format!("/releases/{}", existing.id)),
                ),
                ReleaseOutcome::UpdatedDraft,
            ),
            Some(_) => return Ok(ReleaseOutcome::AlreadyPublished),
            None => (
                self.request(Method::POST, &self.repo_url("/releases")),
                ReleaseOutcome::Created,
            ),
        };

        debug!(repository = %self.repo.full_name(), tag = %spec.tag, ?outcome, "Writing release");
        let response = request.json(&payload).send().await?;
        check_response(PROVIDER, response).await?;
        Ok(outcome)
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueOutcome> {
        let response = self
            .request(Method::GET, &self.repo_url("/issues"))
            .query(&[("state", "open"), ("type", "issues"), ("q", title)])
            .send()
            .await?;
        let issues: Vec<Issue> = check_response(PROVIDER, response).await?.json().await?;

        if let Some(issue) = issues.into_iter().find(|i| i.title == title) {
            let url = self.repo_url(&format!("/issues/{}/comments", issue.number));
            let response = self
                .request(Method::POST, &url)
                .json(&CommentPayload { body })
                .send()
                .await?;
            check_response(PROVIDER, response).await?;
            return Ok(IssueOutcome::Commented(issue.number));
        }

        let response = self
            .request(Method::POST, &self.repo_url("/issues"))
            .json(&IssuePayload { title, body })
            .send()
            .await?;
        let created: Issue = check_response(PROVIDER, response).await?.json().await?;
        Ok(IssueOutcome::Created(created.number))
    }
}

// ============================================================================
// Gitea API types
// ============================================================================

#[derive(Debug, Deserialize)]
struct Release {
    id: u64,
    tag_name: String,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Serialize)]
struct ReleasePayload<'a> {
    tag_name: &'a str,
    target_commitish: &'a str,
    name: &'a str,
    body: &'a str,
    draft: bool,
    prerelease: bool,
}

#[derive(Debug, Deserialize)]
struct Issue {
    number: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Serialize)]
struct IssuePayload<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct CommentPayload<'a> {
    body: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GiteaProvider {
        GiteaProvider::new(
            &format!("{}/", server.uri()),
            RepoPath::new("x", "b"),
            Some("secret".to_string()),
        )
    }

    #[tokio::test]
    async fn test_release_created_after_scanning_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/x/b/releases/tags/v2.0.0-rc.1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/x/b/releases"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "tag_name": "v1.9.0", "draft": false}
            ])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/x/b/releases"))
            .and(header("authorization", "token secret"))
            .and(body_partial_json(json!({"tag_name": "v2.0.0-rc.1", "prerelease": true})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .release(&ReleaseSpec::new("v2.0.0-rc.1", "master").prerelease(true))
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::Created);
    }

    #[tokio::test]
    async fn test_draft_release_updated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/x/b/releases/tags/v1.0.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 8, "tag_name": "v1.0.0", "draft": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/v1/repos/x/b/releases/8"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 8})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .release(&ReleaseSpec::new("v1.0.0", "master"))
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::UpdatedDraft);
    }

    #[tokio::test]
    async fn test_issue_created_and_commented() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/x/b/issues"))
            .and(query_param("q", "release-a"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"number": 2, "title": "release-a"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/repos/x/b/issues"))
            .and(query_param("q", "release-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/x/b/issues/2/comments"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/repos/x/b/issues"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"number": 3, "title": "release-b"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = provider(&server);
        assert_eq!(
            provider.create_issue("release-a", "body").await.unwrap(),
            IssueOutcome::Commented(2)
        );
        assert_eq!(
            provider.create_issue("release-b", "body").await.unwrap(),
            IssueOutcome::Created(3)
        );
    }
}
