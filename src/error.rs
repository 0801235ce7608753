//! Error taxonomy for the gateway.
//!
//! Registry errors go back to the administrative caller; routing and
//! forwarding errors become the status code returned to the proxied client.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Errors from mutating or loading the service registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A server with this name is already registered.
    #[error("server '{0}' already registered")]
    DuplicateName(String),

    /// No server with this name is registered.
    #[error("server '{0}' does not exist")]
    NotFound(String),

    /// The record is malformed (bad URL, empty name, bad prefix).
    #[error("invalid server record: {0}")]
    InvalidServer(String),

    /// The persistence collaborator failed.
    #[error("registry persistence failed: {0}")]
    Persistence(String),
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegistryError::DuplicateName(_) => StatusCode::CONFLICT,
            RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
            RegistryError::InvalidServer(_) => StatusCode::BAD_REQUEST,
            RegistryError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Errors from picking a backend for a request path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// No registered prefix matches the path.
    #[error("no route for path '{path}'")]
    NoRoute { path: String },

    /// A prefix matched but every candidate is unhealthy or tripped.
    #[error("no healthy backend for prefix '{prefix}' ({candidates} candidates)")]
    NoHealthyBackend { prefix: String, candidates: usize },
}

/// Errors from executing the outbound call.
#[derive(Error, Debug)]
pub enum ForwardError {
    /// Connection or protocol failure talking to the backend.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The attempt did not complete within its deadline.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The computed target URL could not be turned into a request.
    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    /// The backend response body could not be read.
    #[error("failed to read backend body: {0}")]
    BodyRead(String),
}

/// Everything a proxied request can fail with.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Forward(#[from] ForwardError),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("method {0} is not supported")]
    MethodNotAllowed(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Route(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Forward(ForwardError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Forward(_) => StatusCode::BAD_GATEWAY,
            ProxyError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ProxyError::Route(_) => "Service Unavailable".to_string(),
            other => other.to_string(),
        };
        (status, message).into_response()
    }
}
