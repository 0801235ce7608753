//! Registry admin surface.
//!
//! # Endpoints
//! - `GET /registry`: list registered servers
//! - `POST /registry`: register or replace a server
//! - `DELETE /registry/{name}`: deregister a server
//! - `GET /admin/status`: health, breaker and cache snapshots
//!
//! Served on its own listener, separate from proxied traffic.

pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get},
    Router,
};

use crate::cache::ResponseCache;
use crate::health::HealthTable;
use crate::lifecycle::Components;
use crate::registry::ServiceRegistry;
use crate::resilience::CircuitBreakerManager;

use self::handlers::*;

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<dyn ServiceRegistry>,
    pub health: Arc<HealthTable>,
    pub breakers: Arc<CircuitBreakerManager>,
    pub cache: Option<Arc<ResponseCache>>,
}

impl From<&Components> for AdminState {
    fn from(components: &Components) -> Self {
        Self {
            registry: components.registry.clone(),
            health: components.health.clone(),
            breakers: components.breakers.clone(),
            cache: components.cache.clone(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/registry", get(list_servers).post(register_server))
        .route("/registry/{name}", delete(deregister_server))
        .route("/admin/status", get(get_status))
        .with_state(state)
}
