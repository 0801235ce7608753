//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every shared table from configuration
//! - Seed the registry with configured services
//! - Start and stop the background tasks (health monitor, cache sweeper)
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Each table is built once and handed to its consumers explicitly
//! - Background tasks share one shutdown signal and are joined on stop

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;

use crate::cache::{spawn_sweeper, ResponseCache};
use crate::config::{ConfigError, ProxyConfig, ServiceConfig};
use crate::error::RegistryError;
use crate::health::{HealthMonitor, HealthMonitorHandle, HealthTable};
use crate::http::RequestForwarder;
use crate::lifecycle::Shutdown;
use crate::registry::{FileRegistry, InMemoryRegistry, Server, ServiceRegistry};
use crate::resilience::CircuitBreakerManager;
use crate::routing::ResilientRouter;
use crate::security::RateLimiter;

#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },
}

/// The shared state of a running gateway.
#[derive(Clone)]
pub struct Components {
    pub registry: Arc<dyn ServiceRegistry>,
    pub health: Arc<HealthTable>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub cache: Option<Arc<ResponseCache>>,
    pub router: Arc<ResilientRouter>,
    pub forwarder: Arc<RequestForwarder>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

impl Components {
    /// Open the configured registry, seed it, and build everything on top.
    pub fn build(config: &ProxyConfig) -> Result<Self, StartupError> {
        let registry: Arc<dyn ServiceRegistry> = match &config.registry.persistence_path {
            Some(path) => Arc::new(FileRegistry::open(path)?),
            None => Arc::new(InMemoryRegistry::new()),
        };
        seed_services(registry.as_ref(), &config.registry.services)?;
        Ok(Self::with_registry(config, registry))
    }

    pub fn with_registry(config: &ProxyConfig, registry: Arc<dyn ServiceRegistry>) -> Self {
        let health = Arc::new(if config.health_check.enabled {
            HealthTable::new(config.health_check.unhealthy_threshold)
        } else {
            HealthTable::unmonitored()
        });
        let breakers = Arc::new(CircuitBreakerManager::from_config(&config.circuit_breaker));
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(ResponseCache::from_config(&config.cache)));
        let router = Arc::new(ResilientRouter::new(
            registry.clone(),
            health.clone(),
            breakers.clone(),
        ));
        let forwarder = Arc::new(RequestForwarder::from_config(config, breakers.clone()));
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::from_config(&config.rate_limit)));

        Self {
            registry,
            health,
            breakers,
            cache,
            router,
            forwarder,
            rate_limiter,
        }
    }

    /// Start the health monitor and cache sweeper as configured.
    pub fn spawn_background(&self, config: &ProxyConfig, shutdown: &Shutdown) -> BackgroundTasks {
        let monitor = config.health_check.enabled.then(|| {
            HealthMonitor::new(
                self.registry.clone(),
                self.health.clone(),
                config.health_check.clone(),
            )
            .spawn(shutdown)
        });
        let sweeper = self.cache.as_ref().map(|cache| {
            spawn_sweeper(
                cache.clone(),
                config.cache.sweep_interval(),
                shutdown.subscribe(),
            )
        });

        BackgroundTasks {
            shutdown: shutdown.clone(),
            monitor,
            sweeper,
        }
    }
}

/// Register configured services, leaving identical persisted rows untouched.
fn seed_services(registry: &dyn ServiceRegistry, services: &[ServiceConfig]) -> Result<(), RegistryError> {
    for service in services {
        let server = Server::new(&service.name, &service.base_url, service.prefixes.iter().cloned())?;
        let unchanged = registry
            .get(&server.name)
            .is_some_and(|existing| existing.base_url == server.base_url && existing.prefixes == server.prefixes);
        if unchanged {
            continue;
        }
        registry.upsert(server)?;
    }
    tracing::info!(services = services.len(), "Registry seeded from configuration");
    Ok(())
}

/// Handles to the running background tasks.
pub struct BackgroundTasks {
    shutdown: Shutdown,
    monitor: Option<HealthMonitorHandle>,
    sweeper: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    /// Signal shutdown and wait for every task to exit.
    pub async fn stop(self) {
        self.shutdown.trigger();
        if let Some(monitor) = self.monitor {
            monitor.join().await;
        }
        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                tracing::error!(error = %e, "Cache sweeper task failed");
            }
        }
        tracing::info!("Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, base_url: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            base_url: base_url.to_string(),
            prefixes: vec![format!("/{name}")],
        }
    }

    #[test]
    fn test_build_seeds_registry() {
        let mut config = ProxyConfig::default();
        config.registry.services = vec![
            service("s1", "http://127.0.0.1:4200"),
            service("s2", "http://127.0.0.1:2200"),
        ];
        config.cache.enabled = false;

        let components = Components::build(&config).unwrap();
        assert_eq!(components.registry.list().len(), 2);
        assert!(components.cache.is_none());
        assert!(components.rate_limiter.is_some());
        // Monitored table: unknown backends start unhealthy.
        assert!(!components.health.is_healthy("s1"));
    }

    #[test]
    fn test_reseed_keeps_persisted_registration_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ProxyConfig::default();
        config.registry.persistence_path = Some(dir.path().join("registry.json").display().to_string());
        config.registry.services = vec![service("s1", "http://127.0.0.1:4200")];

        {
            let registry = FileRegistry::open(dir.path().join("registry.json")).unwrap();
            let mut server = Server::new("s1", "http://127.0.0.1:4200", ["/s1"]).unwrap();
            server.registered_at = 1;
            registry.register(server).unwrap();
        }

        let seeded = Components::build(&config).unwrap().registry.get("s1").unwrap();
        assert_eq!(seeded.registered_at, 1);
    }

    #[test]
    fn test_invalid_seed_fails_startup() {
        let mut config = ProxyConfig::default();
        config.registry.services = vec![service("bad", "ftp://example.com")];
        assert!(matches!(
            Components::build(&config),
            Err(StartupError::Registry(RegistryError::InvalidServer(_)))
        ));
    }

    #[tokio::test]
    async fn test_background_tasks_stop() {
        let config = ProxyConfig::default();
        let components = Components::build(&config).unwrap();
        let shutdown = Shutdown::new();

        let tasks = components.spawn_background(&config, &shutdown);
        assert_eq!(shutdown.receiver_count(), 2);
        tasks.stop().await;
        assert_eq!(shutdown.receiver_count(), 0);
    }
}
