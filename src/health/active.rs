//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every registered backend
//! - Update backend health state based on results
//!
//! # Design Decisions
//! - Probes of one tick run concurrently; the tick ends when all have returned
//! - Ticks never overlap; a slow tick delays the next one
//! - Every probe carries its own timeout
//! - Stopping waits for the loop to exit, so no probe runs afterwards

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request};
use futures_util::future::join_all;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::HealthCheckConfig;
use crate::health::state::HealthTable;
use crate::lifecycle::Shutdown;
use crate::registry::{Server, ServiceRegistry};
use crate::resilience::with_deadline;

pub struct HealthMonitor {
    registry: Arc<dyn ServiceRegistry>,
    table: Arc<HealthTable>,
    config: HealthCheckConfig,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        table: Arc<HealthTable>,
        config: HealthCheckConfig,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            registry,
            table,
            config,
            client,
        }
    }

    /// Start the monitor loop on the runtime, stopping on `shutdown`.
    pub fn spawn(self, shutdown: &Shutdown) -> HealthMonitorHandle {
        let receiver = shutdown.subscribe();
        let task = tokio::spawn(self.run(receiver));
        HealthMonitorHandle {
            shutdown: shutdown.clone(),
            task,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval = ?self.config.interval(),
            timeout = ?self.config.timeout(),
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every registered backend once and wait for all results.
    pub async fn check_all(&self) {
        let servers = self.registry.list();
        self.table
            .retain(|name| servers.iter().any(|server| server.name == name));
        if servers.is_empty() {
            return;
        }

        tracing::debug!(server_count = servers.len(), "Performing health checks");

        let results = join_all(servers.iter().map(|server| self.probe(server))).await;
        for (server, (healthy, latency)) in servers.iter().zip(results) {
            self.table.record(&server.name, healthy, latency);
        }
    }

    async fn probe(&self, server: &Server) -> (bool, Duration) {
        let start = Instant::now();
        let uri = format!(
            "{}{}",
            server.base_url.trim_end_matches('/'),
            self.config.path
        );

        let request = match Request::builder()
            .method(Method::GET)
            .uri(&uri)
            .header(header::USER_AGENT, "gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(server = %server.name, uri = %uri, error = %e, "Failed to build health check request");
                return (false, start.elapsed());
            }
        };

        let healthy = match with_deadline(self.config.timeout(), self.client.request(request)).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    tracing::debug!(server = %server.name, status = %status, "Health check passed");
                    true
                } else {
                    tracing::warn!(server = %server.name, status = %status, "Health check failed: non-success status");
                    false
                }
            }
            Ok(Err(e)) => {
                tracing::debug!(server = %server.name, error = %e, "Health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(server = %server.name, "Health check failed: timeout");
                false
            }
        };

        (healthy, start.elapsed())
    }
}

/// A running monitor loop.
pub struct HealthMonitorHandle {
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl HealthMonitorHandle {
    /// Signal shutdown and wait until the loop has exited.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.join().await;
    }

    /// Wait for the loop to exit after shutdown was signalled elsewhere.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Health monitor task failed");
        }
    }
}
