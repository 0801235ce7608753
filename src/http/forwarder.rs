//! Outbound call execution.
//!
//! # Responsibilities
//! - Send the request to the resolved backend with method, headers and body
//! - Retry transport failures and retryable statuses on a fixed schedule
//! - Report exactly one outcome per logical request to the circuit breaker
//!
//! # Design Decisions
//! - The body arrives fully buffered; every attempt rebuilds the request from it
//! - Each attempt has its own deadline
//! - A 5xx that is returned to the caller counts as a breaker failure
//! - The half-open probe permit is released after the report, never before
//! - A forward dropped mid-flight still reports, as a failure

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::config::ProxyConfig;
use crate::error::ForwardError;
use crate::http::response::upstream_headers;
use crate::observability::metrics;
use crate::resilience::{with_deadline, CircuitBreakerManager, RetryPolicy};
use crate::routing::ResolvedBackend;

pub struct RequestForwarder {
    client: Client<HttpConnector, Body>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    breakers: Arc<CircuitBreakerManager>,
}

impl RequestForwarder {
    pub fn new(policy: RetryPolicy, attempt_timeout: Duration, breakers: Arc<CircuitBreakerManager>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            policy,
            attempt_timeout,
            breakers,
        }
    }

    pub fn from_config(config: &ProxyConfig, breakers: Arc<CircuitBreakerManager>) -> Self {
        Self::new(
            RetryPolicy::from_config(&config.retries),
            config.timeouts.request(),
            breakers,
        )
    }

    /// Forward one logical request, consuming the resolution.
    ///
    /// Returns the last response once it is not retryable or attempts run
    /// out, or the last transport error. A target that cannot be turned into
    /// a request is returned without touching the breaker.
    pub async fn forward(
        &self,
        backend: ResolvedBackend,
        method: Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Incoming>, ForwardError> {
        let uri: Uri = backend
            .target_url
            .parse()
            .map_err(|_| ForwardError::InvalidTarget(backend.target_url.clone()))?;

        let mut report = TerminalReport::new(&self.breakers, backend);
        let outcome = self.attempts(report.backend(), &uri, &method, headers, body).await;

        match &outcome {
            Ok(response) if !response.status().is_server_error() => report.success(),
            Ok(response) => {
                tracing::warn!(
                    server = %report.backend().name(),
                    status = %response.status(),
                    "Backend answered with server error"
                );
                report.failure();
            }
            Err(ForwardError::InvalidTarget(_)) => report.dismiss(),
            Err(e) => {
                tracing::error!(server = %report.backend().name(), error = %e, "Backend request failed");
                report.failure();
            }
        }

        outcome
    }

    async fn attempts(
        &self,
        backend: &ResolvedBackend,
        uri: &Uri,
        method: &Method,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<Response<Incoming>, ForwardError> {
        let headers = upstream_headers(headers);
        let mut attempt = 1;

        loop {
            let mut request = Request::builder()
                .method(method.clone())
                .uri(uri.clone())
                .body(Body::from(body.clone()))
                .map_err(|e| ForwardError::InvalidTarget(e.to_string()))?;
            *request.headers_mut() = headers.clone();

            tracing::debug!(
                server = %backend.name(),
                target_url = %backend.target_url,
                attempt,
                "Forwarding request"
            );

            match with_deadline(self.attempt_timeout, self.client.request(request)).await {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if !self.policy.is_retryable_status(status) || !self.policy.has_attempts_left(attempt) {
                        return Ok(response);
                    }
                    tracing::info!(server = %backend.name(), attempt, status = %status, "Retrying request");
                    metrics::record_retry(backend.name(), "status");
                }
                Ok(Err(e)) => {
                    let error = ForwardError::Transport(e.to_string());
                    if !self.policy.has_attempts_left(attempt) {
                        return Err(error);
                    }
                    tracing::info!(server = %backend.name(), attempt, error = %error, "Retrying after transport error");
                    metrics::record_retry(backend.name(), "transport");
                }
                Err(timeout) => {
                    if !self.policy.has_attempts_left(attempt) {
                        return Err(timeout);
                    }
                    tracing::info!(server = %backend.name(), attempt, "Retrying after timeout");
                    metrics::record_retry(backend.name(), "timeout");
                }
            }

            tokio::time::sleep(self.policy.delay_after(attempt)).await;
            attempt += 1;
        }
    }
}

/// The single breaker report for one forwarded request.
///
/// Dropping it unresolved (the handler future was cancelled mid-flight)
/// records a failure. The probe permit inside the backend is released after
/// the report in every case.
struct TerminalReport<'a> {
    breakers: &'a CircuitBreakerManager,
    backend: ResolvedBackend,
    resolved: bool,
}

impl<'a> TerminalReport<'a> {
    fn new(breakers: &'a CircuitBreakerManager, backend: ResolvedBackend) -> Self {
        Self {
            breakers,
            backend,
            resolved: false,
        }
    }

    fn backend(&self) -> &ResolvedBackend {
        &self.backend
    }

    fn success(&mut self) {
        self.resolved = true;
        self.breakers.on_success(self.backend.name());
    }

    fn failure(&mut self) {
        self.resolved = true;
        self.breakers.on_failure(self.backend.name());
    }

    /// Resolve without reporting; the backend was never contacted.
    fn dismiss(&mut self) {
        self.resolved = true;
    }
}

impl Drop for TerminalReport<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(server = %self.backend.name(), "Forward cancelled before completion");
            self.breakers.on_failure(self.backend.name());
        }
    }
}
