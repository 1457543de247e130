//! GitHub REST v3 client.

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
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

const PROVIDER: &str = "github";

/// GitHub client scoped to one repository.
pub struct GitHubProvider {
    api_base: String,
    repo: RepoPath,
    token: Option<String>,
    client: reqwest::Client,
}

impl GitHubProvider {
    /// `api_base` is `https://api.github.com` for github.com.
    #[must_use]
    pub fn new(api_base: &str, repo: RepoPath, token: Option<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
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
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, super::USER_AGENT);

        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Find the release for `tag`, including drafts which are not addressable
    /// through the tag endpoint.
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
                .query(&[("per_page", RELEASE_PAGE_SIZE), ("page", page)])
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
impl ScmProvider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    async fn release(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome> {
        let payload = ReleasePayload::from(spec);

        match self.find_release(&spec.tag).await? {
            Some(existing) if existing.draft => {
                debug!(repository = %self.repo.full_name(), tag = %spec.tag, id = existing.id, "Updating draft release");
                let url = self.repo_url(&format!("/releases/{}", existing.id));
                let response = self
                    .request(Method::PATCH, &url)
                    .json(&payload)
                    .send()
                    .await?;
                check_response(PROVIDER, response).await?;
                Ok(ReleaseOutcome::UpdatedDraft)
            }
            Some(_) => {
                debug!(repository = %self.repo.full_name(), tag = %spec.tag, "Release already published");
                Ok(ReleaseOutcome::AlreadyPublished)
            }
            None => {
                debug!(repository = %self.repo.full_name(), tag = %spec.tag, "Creating release");
                let response = self
                    .request(Method::POST, &self.repo_url("/releases"))
                    .json(&payload)
                    .send()
                    .await?;
                check_response(PROVIDER, response).await?;
                Ok(ReleaseOutcome::Created)
            }
        }
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueOutcome> {
        let query = format!(
            "{title} in:title repo:{} is:issue is:open",
            self.repo.full_name()
        );
        let response = self
            .request(Method::GET, &format!("{}/search/issues", self.api_base))
            .query(&[("q", query)])
            .send()
            .await?;
        let found: SearchResult = check_response(PROVIDER, response).await?.json().await?;

        if let Some(issue) = found.items.into_iter().find(|i| i.title == title) {
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
// GitHub API types
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

impl<'a> From<&'a ReleaseSpec> for ReleasePayload<'a> {
    fn from(spec: &'a ReleaseSpec) -> Self {
        Self {
            tag_name: &spec.tag,
            target_commitish: &spec.commitish,
            name: &spec.name,
            body: &spec.body,
            draft: spec.draft,
            prerelease: spec.prerelease,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    items: Vec<Issue>,
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

    fn provider(server: &MockServer) -> GitHubProvider {
        GitHubProvider::new(
            &server.uri(),
            RepoPath::new("x", "b"),
            Some("secret".to_string()),
        )
    }

    #[tokio::test]
    async fn test_release_created_when_missing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/x/b/releases/tags/v1.0.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/x/b/releases"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/x/b/releases"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "tag_name": "v1.0.0",
                "target_commitish": "master",
                "prerelease": true,
                "draft": false
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .release(&ReleaseSpec::new("v1.0.0", "master").prerelease(true))
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::Created);
    }

    #[tokio::test]
    async fn test_draft_found_by_page_scan_is_updated() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/x/b/releases/tags/v1.0.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/x/b/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 7, "tag_name": "v0.9.0", "draft": false},
                {"id": 42, "tag_name": "v1.0.0", "draft": true}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/repos/x/b/releases/42"))
            .and(body_partial_json(json!({"draft": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42})))
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
    async fn test_published_release_left_untouched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/x/b/releases/tags/v1.0.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3, "tag_name": "v1.0.0", "draft": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .release(&ReleaseSpec::new("v1.0.0", "master"))
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::AlreadyPublished);
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/x/b/releases/tags/v1.0.0"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Bad credentials"))
            .mount(&server)
            .await;

        let err = provider(&server)
            .release(&ReleaseSpec::new("v1.0.0", "master"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(err.to_string().contains("Bad credentials"));
    }

    #[tokio::test]
    async fn test_issue_comment_on_exact_title_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"number": 4, "title": "release-v1.0.0-old"},
                    {"number": 5, "title": "release-v1.0.0"}
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/x/b/issues/5/comments"))
            .and(body_partial_json(json!({"body": "report"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .create_issue("release-v1.0.0", "report")
            .await
            .unwrap();
        assert_eq!(outcome, IssueOutcome::Commented(5));
    }

    #[tokio::test]
    async fn test_issue_created_when_none_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/repos/x/b/issues"))
            .and(body_partial_json(json!({"title": "release-v1.0.0"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "number": 9, "title": "release-v1.0.0"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .create_issue("release-v1.0.0", "report")
            .await
            .unwrap();
        assert_eq!(outcome, IssueOutcome::Created(9));
    }
}
