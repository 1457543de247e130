//! Reports failing release requests as an issue on the GitOps repository

use crate::crds::{Condition, Phase, Releaser};
use crate::tasks::credentials::{load_credentials, Credentials};
use crate::tasks::providers::ProviderFactory;
use crate::tasks::types::{Context, Error, Result};
use dashmap::DashMap;
use handlebars::Handlebars;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use scm::IssueOutcome;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

const ISSUE_TEMPLATE: &str = "Errors found with releaser: {{name}}

|Type|Status|Message|
|---|---|---|
{{#each conditions}}|{{this.condition_type}}|{{this.status}}|{{this.message}}|
{{/each}}";

#[derive(Serialize)]
struct IssueData<'a> {
    name: &'a str,
    conditions: Vec<IssueRow>,
}

#[derive(Serialize)]
struct IssueRow {
    condition_type: String,
    status: String,
    message: String,
}

impl From<&Condition> for IssueRow {
    fn from(condition: &Condition) -> Self {
        IssueRow {
            condition_type: condition.condition_type.as_str().to_string(),
            status: condition.status.as_str().to_string(),
            message: table_cell(&condition.message),
        }
    }
}

/// Markdown table cell: trimmed, single line, pipes escaped.
fn table_cell(text: &str) -> String {
    text.trim()
        .replace(['\r', '\n'], " ")
        .replace('|', "\\|")
}

/// Whether `releaser` has failures worth an issue.
pub fn should_report(releaser: &Releaser) -> bool {
    releaser.git_ops_enabled().is_some()
        && releaser.phase() != Phase::Done
        && !releaser.failed_conditions().is_empty()
}

pub struct StatusReporter {
    providers: Arc<dyn ProviderFactory>,
    templates: Handlebars<'static>,
    /// Digest of the last body reported per request
    reported: DashMap<String, String>,
}

impl StatusReporter {
    pub fn new(providers: Arc<dyn ProviderFactory>) -> Result<Self> {
        let mut templates = Handlebars::new();
        templates.register_escape_fn(handlebars::no_escape);
        templates
            .register_template_string("issue", ISSUE_TEMPLATE)
            .map_err(|e| Error::TemplateError(e.to_string()))?;

        Ok(Self {
            providers,
            templates,
            reported: DashMap::new(),
        })
    }

    /// Issue body listing the failed conditions of `releaser`.
    pub fn render(&self, releaser: &Releaser) -> Result<String> {
        let name = releaser.name_any();
        let data = IssueData {
            name: &name,
            conditions: releaser
                .failed_conditions()
                .into_iter()
                .map(IssueRow::from)
                .collect(),
        };
        self.templates
            .render("issue", &data)
            .map_err(|e| Error::TemplateError(e.to_string()))
    }

    /// Open or comment on the request's issue. Returns `None` when nothing
    /// was sent: no failures, an unchanged report, or no provider client.
    pub async fn report(
        &self,
        releaser: &Releaser,
        credentials: &Credentials,
    ) -> Result<Option<IssueOutcome>> {
        let Some(git_ops) = releaser.git_ops_enabled() else {
            return Ok(None);
        };
        if !should_report(releaser) {
            return Ok(None);
        }

        let name = releaser.name_any();
        let key = format!("{}/{name}", releaser.namespace().unwrap_or_default());
        let body = self.render(releaser)?;
        let digest = hex::encode(Sha256::digest(body.as_bytes()));

        if self
            .reported
            .get(&key)
            .is_some_and(|last| *last == digest)
        {
            debug!(releaser = %name, "Failure report unchanged, not posting again");
            return Ok(None);
        }

        let Some(client) = self
            .providers
            .client(&git_ops.repository, credentials.token())?
        else {
            warn!(
                releaser = %name,
                provider = %git_ops.repository.effective_provider(),
                "GitOps provider has no issue API client"
            );
            return Ok(None);
        };

        let outcome = client.create_issue(&name, &body).await?;
        self.reported.insert(key, digest);
        info!(releaser = %name, issue = outcome.number(), "Reported release failures");
        Ok(Some(outcome))
    }
}

#[instrument(skip(ctx), fields(releaser = %releaser.name_any(), namespace = %ctx.namespace))]
pub async fn reconcile_status(releaser: Arc<Releaser>, ctx: Arc<Context>) -> Result<Action> {
    if !should_report(&releaser) {
        return Ok(Action::await_change());
    }

    let namespace = releaser
        .namespace()
        .unwrap_or_else(|| ctx.namespace.clone());
    let credentials = load_credentials(&ctx.client, releaser.git_ops_secret(), &namespace).await?;
    ctx.reporter.report(&releaser, &credentials).await?;

    Ok(Action::await_change())
}

pub fn error_policy_status(releaser: Arc<Releaser>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(
        error = ?err,
        releaser = %releaser.name_any(),
        "Failure report could not be posted"
    );
    Action::requeue(ctx.config.retry_delay())
}
