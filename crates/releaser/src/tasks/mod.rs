use crate::crds::Releaser;
use futures::StreamExt;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, Instrument};

pub mod config;
pub mod credentials;
pub mod gate;
pub mod git;
pub mod gitops;
pub mod metrics;
pub mod providers;
pub mod release;
pub mod status;
pub mod types;
pub mod version;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use metrics::{MetricsSink, NoopMetrics, ReleaseMetrics};
pub use release::{error_policy_releaser, reconcile_releaser, ReleasePipeline};
pub use status::{error_policy_status, reconcile_status};
pub use types::{Context, Error, Result};

use git::{GitCli, WorkspaceCache};
use providers::RestProviderFactory;
use release::PipelineSettings;
use status::StatusReporter;

/// Wire the production git, cache and provider implementations into a
/// controller context.
pub fn build_context(
    client: Client,
    namespace: String,
    config: ControllerConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Context> {
    let providers = Arc::new(RestProviderFactory::new(config.api_endpoints()));
    let pipeline = ReleasePipeline::new(
        Arc::new(GitCli::new(config.git.binary.clone())),
        Arc::new(WorkspaceCache::new(config.git.cache_dir.clone())),
        providers.clone(),
        metrics,
        PipelineSettings::from(&config),
    );
    let reporter = StatusReporter::new(providers)?;

    Ok(Context {
        client,
        namespace,
        config: Arc::new(config),
        pipeline,
        reporter,
        retries: types::RetryThrottle::new(),
    })
}

/// Main entry point for the release and status controllers
#[instrument(skip(client, config, metrics), fields(namespace = %namespace))]
pub async fn run_releaser_controllers(
    client: Client,
    namespace: String,
    config: ControllerConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<()> {
    info!("Starting releaser controllers in namespace: {}", namespace);

    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }
    debug!(
        cache_dir = %config.git.cache_dir.display(),
        concurrency = config.controller.concurrency,
        "Configuration validation passed"
    );

    let context = Arc::new(build_context(
        client.clone(),
        namespace.clone(),
        config,
        metrics,
    )?);

    let release_controller_handle = tokio::spawn({
        let context = context.clone();
        let client = client.clone();
        let namespace = namespace.clone();
        async move { run_release_controller(client, namespace, context).await }
    });

    let status_controller_handle = tokio::spawn({
        let context = context.clone();
        let client = client.clone();
        let namespace = namespace.clone();
        async move { run_status_controller(client, namespace, context).await }
    });

    match tokio::try_join!(release_controller_handle, status_controller_handle) {
        Ok((release_result, status_result)) => {
            if let Err(e) = release_result {
                error!("Release controller failed: {:?}", e);
            }
            if let Err(e) = status_result {
                error!("Status controller failed: {:?}", e);
            }
        }
        Err(e) => {
            error!("Controller task join error: {:?}", e);
        }
    }

    info!("Releaser controllers shutting down");
    Ok(())
}

fn releaser_api(client: Client, namespace: &str) -> Api<Releaser> {
    if namespace.is_empty() {
        Api::all(client)
    } else {
        Api::namespaced(client, namespace)
    }
}

/// Run the Releaser release controller
#[instrument(skip(client, context), fields(namespace = %namespace))]
async fn run_release_controller(
    client: Client,
    namespace: String,
    context: Arc<Context>,
) -> Result<()> {
    info!("Starting release controller");

    let api = releaser_api(client, &namespace);
    let controller_config =
        controller::Config::default().concurrency(context.config.controller.concurrency);

    Controller::new(api, Config::default().any_semantic())
        .with_config(controller_config)
        .run(reconcile_releaser, error_policy_releaser, context)
        .for_each(|result| {
            let span = tracing::info_span!("release_reconciliation_result");
            async move { log_result("Release", result) }.instrument(span)
        })
        .await;

    info!("Release controller shutting down");
    Ok(())
}

/// Run the controller that reports failures to the GitOps provider
#[instrument(skip(client, context), fields(namespace = %namespace))]
async fn run_status_controller(
    client: Client,
    namespace: String,
    context: Arc<Context>,
) -> Result<()> {
    info!("Starting status controller");

    let api = releaser_api(client, &namespace);

    Controller::new(api, Config::default().any_semantic())
        .run(reconcile_status, error_policy_status, context)
        .for_each(|result| {
            let span = tracing::info_span!("status_reconciliation_result");
            async move { log_result("Status", result) }.instrument(span)
        })
        .await;

    info!("Status controller shutting down");
    Ok(())
}

fn log_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller: &str,
    result: std::result::Result<(T, Action), E>,
) {
    match result {
        Ok((object, _)) => debug!(resource = ?object, "{} reconciliation successful", controller),
        Err(err) => error!(error = ?err, "{} reconciliation error", controller),
    }
}
