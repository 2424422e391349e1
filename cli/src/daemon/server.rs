// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Gateway HTTP server

use anyhow::{Context, Result};
use fsgate_core::application::catalog::ServiceCatalog;
use fsgate_core::application::container::{ContainerBuilder, ContainerDirs, ServiceContainer};
use fsgate_core::infrastructure::cluster::LocalClusterConnector;
use fsgate_core::infrastructure::config_loader;
use fsgate_core::presentation::api;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::SERVER_NAME;

pub struct ServeOptions {
    pub dirs: ContainerDirs,
    pub host: String,
    pub port: u16,
    pub metrics_port: Option<u16>,
    pub cluster_root: PathBuf,
}

pub async fn start_server(options: ServeOptions) -> Result<()> {
    info!("fsgate starting (PID: {})", std::process::id());

    if let Some(port) = options.metrics_port {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let connector = Arc::new(LocalClusterConnector::new(options.cluster_root.clone()));
    let container = ContainerBuilder::new(SERVER_NAME, options.dirs)
        .catalog(ServiceCatalog::standard(connector))
        .defaults(config_loader::embedded_defaults().context("Failed to parse built-in defaults")?)
        .build()
        .context("Invalid server layout")?;

    run_lifecycle(container.clone(), |c| c.init())
        .await
        .context("Service container failed to start")?;
    info!(
        "Service container up: status={}, cluster root={}",
        container.status(),
        options.cluster_root.display()
    );

    let app = api::with_request_boundary(api::router(container.clone()), container.clone());

    let addr = format!("{}:{}", options.host, options.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Gateway listening on {}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed");

    info!("fsgate shutting down");
    if container.status().is_operational() {
        if let Err(e) = run_lifecycle(container, |c| c.destroy()).await {
            warn!("Service container did not stop cleanly: {:#}", e);
        }
    }
    served
}

/// Lifecycle hooks are synchronous and may touch the filesystem; keep them
/// off the async workers.
async fn run_lifecycle<F, E>(container: ServiceContainer, op: F) -> Result<()>
where
    F: FnOnce(&ServiceContainer) -> std::result::Result<(), E> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    tokio::task::spawn_blocking(move || op(&container))
        .await
        .context("Lifecycle task failed")?
        .map_err(anyhow::Error::new)
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
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
