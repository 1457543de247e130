use crate::tasks::config::ControllerConfig;
use crate::tasks::git::GitError;
use crate::tasks::release::ReleasePipeline;
use crate::tasks::status::StatusReporter;
use dashmap::DashMap;
use kube::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared state handed to every reconcile
pub struct Context {
    pub client: Client,
    pub namespace: String,
    pub config: Arc<ControllerConfig>,
    pub pipeline: ReleasePipeline,
    pub reporter: StatusReporter,
    pub retries: RetryThrottle,
}

/// Earliest next attempt per request after a failed pass.
///
/// Status and annotation patches trigger watch events right away; the
/// throttle keeps those from starting a new pass before the retry delay.
#[derive(Debug, Default)]
pub struct RetryThrottle {
    not_before: DashMap<String, Instant>,
}

impl RetryThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer(&self, key: &str, delay: Duration) {
        self.not_before
            .insert(key.to_string(), Instant::now() + delay);
    }

    /// Time left before `key` may run again, if any.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let deadline = *self.not_before.get(key)?;
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            self.not_before.remove(key);
            None
        } else {
            Some(left)
        }
    }

    pub fn clear(&self, key: &str) {
        self.not_before.remove(key);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Git error: {0}")]
    GitError(#[from] GitError),

    #[error("SCM provider error: {0}")]
    ScmError(#[from] scm::ScmError),

    #[error("Template error: {0}")]
    TemplateError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
