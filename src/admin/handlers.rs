use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::error::RegistryError;
use crate::health::HealthStatus;
use crate::registry::Server;
use crate::resilience::BreakerSnapshot;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub base_url: String,
    pub prefixes: Vec<String>,
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub servers: usize,
    pub health: HashMap<String, HealthStatus>,
    pub breakers: HashMap<String, BreakerSnapshot>,
    pub cache: Option<CacheStats>,
}

pub async fn list_servers(State(state): State<AdminState>) -> Json<Vec<Server>> {
    Json(state.registry.list())
}

/// Register or replace a server.
pub async fn register_server(
    State(state): State<AdminState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Server>), RegistryError> {
    let server = Server::new(request.name, request.base_url, request.prefixes)?;
    state.registry.upsert(server.clone())?;
    tracing::info!(server = %server.name, base_url = %server.base_url, prefixes = ?server.prefixes, "Server registered via admin");
    Ok((StatusCode::CREATED, Json(server)))
}

/// Remove a server and forget its health and breaker state.
pub async fn deregister_server(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<StatusCode, RegistryError> {
    state.registry.deregister(&name)?;
    state.health.remove(&name);
    state.breakers.remove(&name);
    tracing::info!(server = %name, "Server deregistered via admin");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        servers: state.registry.list().len(),
        health: state.health.snapshot_all(),
        breakers: state.breakers.snapshot_all(),
        cache: state.cache.as_ref().map(|cache| cache.stats()),
    })
}
