//! GitLab REST v4 client.
//!
//! GitLab releases have no draft state, so any release found for a tag counts
//! as published and the pre-release flag is not sent.

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_response, IssueOutcome, ReleaseOutcome, ReleaseSpec, ScmProvider};
use crate::address::RepoPath;
use crate::kind::ProviderKind;
use crate::Result;

const PROVIDER: &str = "gitlab";

/// GitLab client scoped to one project.
pub struct GitLabProvider {
    api_base: String,
    repo: RepoPath,
    token: Option<String>,
    client: reqwest::Client,
}

impl GitLabProvider {
    /// `api_base` is `https://gitlab.com/api/v4` for gitlab.com.
    #[must_use]
    pub fn new(api_base: &str, repo: RepoPath, token: Option<String>) -> Self {
        Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            repo,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn project_url(&self, path: &str) -> String {
        format!(
            "{}/projects/{}{path}",
            self.api_base,
            urlencoding::encode(&self.repo.full_name())
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header(USER_AGENT, super::USER_AGENT);

        match &self.token {
            Some(token) => builder.header("PRIVATE-TOKEN", token),
            None => builder,
        }
    }

    async fn release_exists(&self, tag: &str) -> Result<bool> {
        let url = self.project_url(&format!("/releases/{}", urlencoding::encode(tag)));
        let response = self.request(Method::GET, &url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_response(PROVIDER, response).await?;
        Ok(true)
    }
}

#[async_trait]
impl ScmProvider for GitLabProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitLab
    }

    async fn release(&self, spec: &ReleaseSpec) -> Result<ReleaseOutcome> {
        if self.release_exists(&spec.tag).await? {
            debug!(repository = %self.repo.full_name(), tag = %spec.tag, "Release already published");
            return Ok(ReleaseOutcome::AlreadyPublished);
        }

        debug!(repository = %self.repo.full_name(), tag = %spec.tag, "Creating release");
        let payload = ReleasePayload {
            name: &spec.name,
            tag_name: &spec.tag,
            description: &spec.body,
            git_ref: &spec.commitish,
        };
        let response = self
            .request(Method::POST, &self.project_url("/releases"))
            .json(&payload)
            .send()
            .await?;
        check_response(PROVIDER, response).await?;
        Ok(ReleaseOutcome::Created)
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<IssueOutcome> {
        let response = self
            .request(Method::GET, &self.project_url("/issues"))
            .query(&[("state", "opened"), ("in", "title"), ("search", title)])
            .send()
            .await?;
        let issues: Vec<Issue> = check_response(PROVIDER, response).await?.json().await?;

        if let Some(issue) = issues.into_iter().find(|i| i.title == title) {
            let url = self.project_url(&format!("/issues/{}/notes", issue.iid));
            let response = self
                .request(Method::POST, &url)
                .json(&NotePayload { body })
                .send()
                .await?;
            check_response(PROVIDER, response).await?;
            return Ok(IssueOutcome::Commented(issue.iid));
        }

        let response = self
            .request(Method::POST, &self.project_url("/issues"))
            .json(&IssuePayload {
                title,
                description: body,
            })
            .send()
            .await?;
        let created: Issue = check_response(PROVIDER, response).await?.json().await?;
        Ok(IssueOutcome::Created(created.iid))
    }
}

// ============================================================================
// GitLab API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ReleasePayload<'a> {
    name: &'a str,
    tag_name: &'a str,
    description: &'a str,
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Debug, Deserialize)]
struct Issue {
    iid: u64,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Serialize)]
struct IssuePayload<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
struct NotePayload<'a> {
    body: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> GitLabProvider {
        GitLabProvider::new(
            &server.uri(),
            RepoPath::new("group/sub", "b"),
            Some("secret".to_string()),
        )
    }

    #[tokio::test]
    async fn test_release_created_with_encoded_project() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/group%2Fsub%2Fb/releases/v1.0.0"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/projects/group%2Fsub%2Fb/releases"))
            .and(header("PRIVATE-TOKEN", "secret"))
            .and(body_partial_json(json!({"tag_name": "v1.0.0", "ref": "master"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({})))
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
    async fn test_existing_release_is_published() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/group%2Fsub%2Fb/releases/v1.0.0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"tag_name": "v1.0.0"})))
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .release(&ReleaseSpec::new("v1.0.0", "master"))
            .await
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::AlreadyPublished);
    }

    #[tokio::test]
    async fn test_issue_note_on_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/group%2Fsub%2Fb/issues"))
            .and(query_param("search", "release-v1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([{"iid": 3, "title": "release-v1"}])),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/projects/group%2Fsub%2Fb/issues/3/notes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .create_issue("release-v1", "report")
            .await
            .unwrap();
        assert_eq!(outcome, IssueOutcome::Commented(3));
    }

    #[tokio::test]
    async fn test_issue_created_without_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/group%2Fsub%2Fb/issues"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/projects/group%2Fsub%2Fb/issues"))
            .and(body_partial_json(json!({"title": "release-v1", "description": "report"})))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"iid": 11, "title": "release-v1"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = provider(&server)
            .create_issue("release-v1", "report")
            .await
            .unwrap();
        assert_eq!(outcome, IssueOutcome::Created(11));
    }
}
