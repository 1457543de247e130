//! One release pass over a request
//!
//! The pipeline works on its own copy of the request and hands back the
//! finished value; persisting it is left to the reconciler.

use super::conditions::{ConditionTracker, ErrorAggregate};
use super::releaser::RepositoryReleaser;
use crate::crds::{Releaser, ReleaserStatus};
use crate::tasks::config::ControllerConfig;
use crate::tasks::credentials::{Author, Credentials};
use crate::tasks::git::{GitOperations, WorkspaceCache};
use crate::tasks::gitops::{FinalizeOutcome, GitOpsWriter};
use crate::tasks::metrics::MetricsSink;
use crate::tasks::providers::ProviderFactory;
use chrono::{SecondsFormat, Utc};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Knobs of a pass taken from the controller configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub author: Author,
    pub retain_pre_release: bool,
    pub max_conditions: usize,
}

impl From<&ControllerConfig> for PipelineSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            author: Author::from(&config.git.author),
            retain_pre_release: config.controller.retain_pre_release,
            max_conditions: config.status.max_conditions,
        }
    }
}

/// Result of [`ReleasePipeline::run`]
#[derive(Debug, Clone)]
pub struct PassOutcome {
    /// The request with its new status, and `done` when GitOps is disabled
    /// and the pass succeeded
    pub request: Releaser,
    /// Next draft to create, GitOps disabled only
    pub next: Option<Releaser>,
    pub errors: ErrorAggregate,
}

impl PassOutcome {
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

pub struct ReleasePipeline {
    releaser: RepositoryReleaser,
    writer: GitOpsWriter,
    settings: PipelineSettings,
}

impl ReleasePipeline {
    pub fn new(
        git: Arc<dyn GitOperations>,
        cache: Arc<WorkspaceCache>,
        providers: Arc<dyn ProviderFactory>,
        metrics: Arc<dyn MetricsSink>,
        settings: PipelineSettings,
    ) -> Self {
        let releaser = RepositoryReleaser::new(
            Arc::clone(&git),
            Arc::clone(&cache),
            providers,
            Arc::clone(&metrics),
        );
        let writer = GitOpsWriter::new(git, cache, metrics, settings.retain_pre_release);
        Self {
            releaser,
            writer,
            settings,
        }
    }

    /// Release every repository in order, then finalize when all succeeded.
    #[instrument(skip_all, fields(releaser = %request.name_any()))]
    pub async fn run(
        &self,
        request: &Releaser,
        credentials: &Credentials,
        gitops_credentials: &Credentials,
    ) -> PassOutcome {
        let mut working = request.clone();
        let name = working.name_any();
        let started = now();

        let history = working
            .status
            .take()
            .map(|status| status.conditions)
            .unwrap_or_default();
        let mut tracker = ConditionTracker::with_history(history);
        let author = credentials.author(&self.settings.author);

        for repo in &working.spec.repositories {
            let result = self
                .releaser
                .release_one(repo, &working.spec.version, credentials, &author)
                .await;
            if let Err(err) = &result {
                warn!(repository = %repo.name, error = %err, "Repository release failed");
            }
            tracker.record(repo, &result);
        }

        let mut next = None;
        if tracker.errors().is_empty() {
            let gitops_author = gitops_credentials.author(&self.settings.author);
            match self
                .writer
                .finalize(&mut working, gitops_credentials, &gitops_author)
                .await
            {
                Ok(FinalizeOutcome::Sibling { next: sibling }) => next = Some(*sibling),
                Ok(FinalizeOutcome::Written { .. }) => {}
                Err(err) => {
                    warn!(error = %err, "Finalize failed");
                    tracker.record_other(format!("failed to finalize {name}: {err}"));
                }
            }
        }

        let errors = tracker.errors().clone();
        let success = errors.is_empty();
        working.status = Some(ReleaserStatus {
            conditions: tracker.into_conditions(self.settings.max_conditions),
            start_time: Some(started),
            completion_time: success.then(now),
        });

        if success {
            info!("Release pass succeeded");
        } else {
            warn!(errors = errors.len(), "Release pass failed");
        }

        PassOutcome {
            request: working,
            next,
            errors,
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
