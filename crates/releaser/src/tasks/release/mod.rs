//! Release controller: admits ready requests through the change gate, runs a
//! pass and persists its outcome.

pub mod conditions;
pub mod pipeline;
pub mod releaser;

pub use conditions::{ConditionTracker, ErrorAggregate};
pub use pipeline::{PassOutcome, PipelineSettings, ReleasePipeline};
pub use releaser::{ReleaseError, ReleaseReport, RepositoryReleaser};

use crate::crds::{Phase, Releaser};
use crate::tasks::credentials::load_credentials;
use crate::tasks::gate::{self, ChangeGate, GateDecision};
use crate::tasks::types::{Context, Error, Result};
use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

#[instrument(skip(ctx), fields(releaser = %releaser.name_any(), namespace = %ctx.namespace))]
pub async fn reconcile_releaser(releaser: Arc<Releaser>, ctx: Arc<Context>) -> Result<Action> {
    let name = releaser.name_any();
    let namespace = releaser
        .namespace()
        .unwrap_or_else(|| ctx.namespace.clone());
    let key = format!("{namespace}/{name}");

    if releaser.phase() != Phase::Ready {
        debug!(phase = ?releaser.phase(), "Release request not ready, nothing to do");
        ctx.retries.clear(&key);
        return Ok(Action::await_change());
    }

    if let Some(remaining) = ctx.retries.remaining(&key) {
        debug!(
            remaining_seconds = remaining.as_secs(),
            "Retry delay not elapsed"
        );
        return Ok(Action::requeue(remaining));
    }

    let api: Api<Releaser> = Api::namespaced(ctx.client.clone(), &namespace);
    let gate = ChangeGate::new(api.clone());

    match gate::needs_processing(&releaser)? {
        GateDecision::Unchanged => {
            debug!("Desired state already processed");
            return Ok(Action::await_change());
        }
        GateDecision::Bootstrap(hash) => {
            debug!(hash = %hash, "Recording hash of first pass");
            gate.record_hash(&releaser).await?;
        }
        GateDecision::Changed => {
            info!("Desired state changed since the last pass");
        }
    }

    match run_pass(&releaser, &api, &namespace, &ctx).await {
        Ok(true) => {
            gate.record_hash(&releaser).await?;
            ctx.retries.clear(&key);
            Ok(Action::await_change())
        }
        Ok(false) => {
            let delay = ctx.config.retry_delay();
            gate.invalidate(&releaser).await?;
            ctx.retries.defer(&key, delay);
            info!(
                retry_seconds = delay.as_secs(),
                "Release pass failed, retrying later"
            );
            Ok(Action::requeue(delay))
        }
        Err(err) => {
            // The hash may already be stored; drop it so the retry is admitted.
            if let Err(invalidate_err) = gate.invalidate(&releaser).await {
                warn!(error = %invalidate_err, "Failed to clear the stored hash");
            }
            ctx.retries.defer(&key, ctx.config.retry_delay());
            Err(err)
        }
    }
}

/// Run one pass and persist it. Returns whether the pass succeeded.
async fn run_pass(
    releaser: &Releaser,
    api: &Api<Releaser>,
    namespace: &str,
    ctx: &Context,
) -> Result<bool> {
    let credentials =
        load_credentials(&ctx.client, releaser.spec.secret.as_ref(), namespace).await?;
    let gitops_credentials = match releaser.git_ops_enabled() {
        Some(_) => load_credentials(&ctx.client, releaser.git_ops_secret(), namespace).await?,
        None => credentials.clone(),
    };

    let outcome = ctx
        .pipeline
        .run(releaser, &credentials, &gitops_credentials)
        .await;
    persist(releaser, api, &outcome).await?;
    Ok(outcome.success())
}

/// Writes pass outcomes back to the cluster.
#[async_trait]
trait RequestStore: Sync {
    async fn patch_status(&self, name: &str, patch: &Value) -> Result<()>;
    async fn mark_done(&self, name: &str) -> Result<()>;
    /// Returns `false` when a request of that name already exists.
    async fn create(&self, request: &Releaser) -> Result<bool>;
}

#[async_trait]
impl RequestStore for Api<Releaser> {
    async fn patch_status(&self, name: &str, patch: &Value) -> Result<()> {
        Api::patch_status(self, name, &PatchParams::default(), &Patch::Merge(patch)).await?;
        Ok(())
    }

    async fn mark_done(&self, name: &str) -> Result<()> {
        let phase_patch = json!({ "spec": { "phase": Phase::Done } });
        Api::patch(self, name, &PatchParams::default(), &Patch::Merge(&phase_patch)).await?;
        Ok(())
    }

    async fn create(&self, request: &Releaser) -> Result<bool> {
        match Api::create(self, &PostParams::default(), request).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(response)) if response.code == 409 => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

/// Status first, then the next request, then `done`. A request is only
/// marked done once its successor exists.
async fn persist(releaser: &Releaser, store: &dyn RequestStore, outcome: &PassOutcome) -> Result<()> {
    let name = releaser.name_any();

    let status_patch = json!({ "status": outcome.request.status });
    store.patch_status(&name, &status_patch).await?;

    if !outcome.success() {
        return Ok(());
    }

    if let Some(next) = &outcome.next {
        if store.create(next).await? {
            info!(next = %next.name_any(), "Created next release request");
        } else {
            debug!(next = %next.name_any(), "Next release request already exists");
        }
    }

    if outcome.request.phase() == Phase::Done {
        store.mark_done(&name).await?;
        info!("Release request marked as done");
    }

    Ok(())
}

/// Error policy for the release controller
pub fn error_policy_releaser(releaser: Arc<Releaser>, err: &Error, ctx: Arc<Context>) -> Action {
    error!(
        error = ?err,
        releaser = %releaser.name_any(),
        "Release reconciliation failed"
    );
    Action::requeue(ctx.config.retry_delay())
}
