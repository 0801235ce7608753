//! Gateway daemon.
//!
//! ```text
//!     Client ──▶ http server ──▶ cache (GET) ──▶ router ──▶ forwarder ──▶ Backend
//!                                   ▲              │            │
//!                                   │       registry + health   └──▶ circuit breakers
//!                                   └── 2xx GET bodies   + breakers
//!
//!     Admin ───▶ admin server ──▶ registry / health / breakers / cache
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use gateway_core::admin::{setup_admin_router, AdminState};
use gateway_core::config::{load_config, ProxyConfig};
use gateway_core::lifecycle::{trigger_on_signal, Components, Shutdown, StartupError};
use gateway_core::observability::{init_logging, init_metrics};
use gateway_core::HttpServer;

#[derive(Parser)]
#[command(name = "gateway")]
#[command(about = "Dynamic reverse proxy with health checks, circuit breakers and caching", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path).map_err(StartupError::from)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.registry.services.len(),
        cache_enabled = config.cache.enabled,
        health_checks = config.health_check.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let components = Components::build(&config)?;
    let shutdown = Shutdown::new();
    trigger_on_signal(shutdown.clone());

    let admin_task = if config.admin.enabled {
        let listener = bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(AdminState::from(&components));
        let stop = shutdown.wait();
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(stop).await {
                tracing::error!(error = %e, "Admin server failed");
            }
        }))
    } else {
        None
    };

    let listener = bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::with_components(config, components);
    let result = server.run(listener, shutdown.clone()).await;
    shutdown.trigger();

    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Admin task failed");
        }
    }

    result?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn bind(address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.to_string(),
            source,
        })
}
