//! HTTP server setup and proxy handlers.
//!
//! # Responsibilities
//! - Create the Axum router with the proxy handler and middleware
//! - Serve GET from the response cache, or resolve, forward and cache 2xx
//! - Forward POST with a buffered body, never cached
//! - Run background tasks for the lifetime of the listener
//!
//! # Design Decisions
//! - The cache key is the request path; the query is forwarded but not keyed
//! - Only GET and POST are proxied; everything else is 405
//! - Non-cacheable responses stream straight back to the client

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper::body::Incoming;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::cache::ResponseCache;
use crate::config::ProxyConfig;
use crate::error::{ForwardError, ProxyError};
use crate::http::forwarder::RequestForwarder;
use crate::http::request::{buffer_body, propagate_request_id_layer, request_id, set_request_id_layer};
use crate::http::response::strip_hop_by_hop;
use crate::lifecycle::{Components, Shutdown, StartupError};
use crate::observability::metrics;
use crate::routing::ResilientRouter;
use crate::security::rate_limit_middleware;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ResilientRouter>,
    pub forwarder: Arc<RequestForwarder>,
    pub cache: Option<Arc<ResponseCache>>,
    pub max_body_bytes: usize,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    components: Components,
}

impl HttpServer {
    /// Build all components from `config`.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let components = Components::build(&config)?;
        Ok(Self::with_components(config, components))
    }

    pub fn with_components(config: ProxyConfig, components: Components) -> Self {
        let router = Self::build_router(&config, &components);
        Self {
            router,
            config,
            components,
        }
    }

    fn build_router(config: &ProxyConfig, components: &Components) -> Router {
        let state = AppState {
            router: components.router.clone(),
            forwarder: components.forwarder.clone(),
            cache: components.cache.clone(),
            max_body_bytes: config.listener.max_body_bytes,
        };

        let mut router = Router::new()
            .route("/", any(proxy_handler))
            .route("/{*path}", any(proxy_handler))
            .with_state(state);

        if let Some(limiter) = &components.rate_limiter {
            router = router.layer(middleware::from_fn_with_state(
                limiter.clone(),
                rate_limit_middleware,
            ));
        }

        router
            .layer(propagate_request_id_layer())
            .layer(TraceLayer::new_for_http())
            .layer(set_request_id_layer())
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve on `listener` until `shutdown` fires, then stop background tasks.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let background = self.components.spawn_background(&self.config, &shutdown);

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await;

        background.stop().await;
        tracing::info!("HTTP server stopped");
        result
    }
}

/// Main proxy handler: dispatch on method and record the outcome.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let id = request_id(request.headers()).to_string();

    tracing::debug!(
        request_id = %id,
        method = %method,
        path = %request.uri().path(),
        "Proxying request"
    );

    let result = match method {
        Method::GET => handle_get(&state, request).await,
        Method::POST => handle_post(&state, request).await,
        ref other => Err(ProxyError::MethodNotAllowed(other.to_string())),
    };

    match result {
        Ok((response, backend)) => {
            metrics::record_request(method.as_str(), response.status().as_u16(), &backend, start);
            response
        }
        Err(e) => {
            tracing::debug!(request_id = %id, error = %e, "Request failed");
            metrics::record_request(method.as_str(), e.status().as_u16(), "none", start);
            e.into_response()
        }
    }
}

/// GET: cache, else resolve + forward + cache successful bodies.
async fn handle_get(state: &AppState, request: Request<Body>) -> Result<(Response, String), ProxyError> {
    let path = request.uri().path().to_string();

    if let Some(cache) = &state.cache {
        if let Some(body) = cache.get(&path) {
            tracing::debug!(path = %path, bytes = body.len(), "Serving from cache");
            return Ok(((StatusCode::OK, body).into_response(), "cache".to_string()));
        }
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| path.clone(), |pq| pq.as_str().to_string());
    let backend = state.router.resolve_backend(&path_and_query)?;
    let name = backend.name().to_string();

    let (parts, _body) = request.into_parts();
    let response = state
        .forwarder
        .forward(backend, Method::GET, &parts.headers, Bytes::new())
        .await?;

    let cache = match &state.cache {
        Some(cache) if response.status().is_success() => cache,
        _ => return Ok((stream_back(response), name)),
    };

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    let bytes = axum::body::to_bytes(Body::new(body), usize::MAX)
        .await
        .map_err(|e| ForwardError::BodyRead(e.to_string()))?;
    cache.store(&path, &bytes);

    Ok((Response::from_parts(parts, Body::from(bytes)), name))
}

/// POST: buffer the body, resolve + forward. Never cached.
async fn handle_post(state: &AppState, request: Request<Body>) -> Result<(Response, String), ProxyError> {
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| request.uri().path().to_string(), |pq| pq.as_str().to_string());

    let (parts, body) = request.into_parts();
    let body = buffer_body(&parts.headers, body, state.max_body_bytes).await?;

    let backend = state.router.resolve_backend(&path_and_query)?;
    let name = backend.name().to_string();
    let response = state
        .forwarder
        .forward(backend, Method::POST, &parts.headers, body)
        .await?;

    Ok((stream_back(response), name))
}

fn stream_back(response: hyper::Response<Incoming>) -> Response {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
