//! Edge gateway with dynamically loaded, hot-reloaded request filters.
//!
//! # Architecture Overview
//!
//! ```text
//!   Admin API / filter-cli ──▶ RevisionStore ──events──▶ StorePoller ─┐
//!                                                                     │
//!   filter directories ──────────────────────────────▶ SourcePoller ──┤
//!                                                                     ▼
//!                                                FilterLoader (compile cache)
//!                                                                     │
//!                                                                     ▼
//!   Client ──▶ HttpServer ──▶ Pre ──▶ Route ──▶ upstream ──▶ Post ◀── FilterRegistry
//!                               (FilterChainExecutor, snapshot per chain)
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use edge_gateway::admin::{setup_admin_router, AdminState};
use edge_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use edge_gateway::http::HttpServer;
use edge_gateway::lifecycle::{wait_for_signal, Gateway, Shutdown};
use edge_gateway::loader::ScriptCompiler;
use edge_gateway::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "edge-gateway", version, about = "Edge gateway with hot-reloaded filters")]
struct Args {
    /// TOML configuration file; defaults are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        poll_interval_secs = config.poller.interval_secs,
        store_poller = config.store.enabled,
        source_poller = config.source.enabled,
        canary_sample_rate = config.canary.sample_rate,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = Arc::new(Gateway::bootstrap(config.clone(), Arc::new(ScriptCompiler::new())).await?);

    // Kept alive for the life of the process.
    let _config_watch = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path, config.clone());
            let live = gateway.clone();
            tokio::spawn(async move {
                while let Some(next) = updates.recv().await {
                    live.apply_live_config(&next);
                }
            });
            match watcher.run() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(AdminState {
            store: gateway.store().clone(),
            registry: gateway.registry().clone(),
            toggles: gateway.toggles().clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        });
        let mut stop = shutdown.subscribe();
        Some(tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop.wait().await })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        }))
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config, gateway.executor().clone());
    server
        .run(listener, async {
            match wait_for_signal().await {
                Ok(signal) => tracing::info!(%signal, "Shutdown signal received"),
                Err(e) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    shutdown.trigger();
    if let Some(task) = admin_task {
        let _ = task.await;
    }
    gateway.shutdown().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
