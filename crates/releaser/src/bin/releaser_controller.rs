/*
 * 5D Labs Releaser - Controller Service
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Controller Service - Kubernetes Controller for `Releaser` CRDs
//!
//! This service:
//! - Watches `Releaser` resources and releases the repositories of ready ones
//! - Writes the finished lifecycle back to the GitOps repository
//! - Reports failing requests as issues on the GitOps provider
//! - Serves health and metrics endpoints

use anyhow::Context as _;
use axum::{response::Json, routing::get, Router};
use clap::Parser;
use releaser::tasks::config::ControllerConfig;
use releaser::tasks::metrics::{MetricsSink, ReleaseMetrics};
use releaser::tasks::run_releaser_controllers;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Kubernetes controller that tags and releases git repositories
#[derive(Parser, Debug)]
#[command(name = "releaser-controller")]
#[command(version)]
struct Cli {
    /// Namespace to watch; empty watches all namespaces
    #[arg(long, env = "RELEASER_NAMESPACE", default_value = "")]
    namespace: String,

    /// Controller configuration file
    #[arg(long, env = "RELEASER_CONFIG_PATH")]
    config: Option<String>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,releaser=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!(
        "Starting 5D Labs Releaser Controller v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = ControllerConfig::load(cli.config.as_deref());
    config.validate()?;
    let bind_address = config.server.bind_address.clone();

    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    // Start the controllers in the background
    let controller_handle = {
        let namespace = cli.namespace.clone();
        let sink: Arc<dyn MetricsSink> = Arc::new(ReleaseMetrics::from_global());
        tokio::spawn(async move {
            if let Err(e) = run_releaser_controllers(client, namespace, config, sink).await {
                error!("Controller error: {}", e);
            }
        })
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(60))),
        );

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {bind_address}"))?;
    info!("Controller HTTP server listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    controller_handle.abort();
    info!("Controller service stopped");

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "releaser-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "releaser-controller",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_handler() -> Json<Value> {
    // Counters are exported through the OpenTelemetry meter provider
    Json(json!({
        "service": "releaser-controller",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
