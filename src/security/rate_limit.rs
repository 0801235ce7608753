//! Per-client rate limiting middleware.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    /// Whether the bucket has refilled to capacity, which makes it
    /// indistinguishable from a fresh one.
    fn is_full_at(&self, now: Instant, capacity: f64, refill_rate: f64) -> bool {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens + elapsed * refill_rate >= capacity
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Buckets are pruned once the table grows past this many clients.
const PRUNE_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct Buckets {
    clients: HashMap<Option<IpAddr>, TokenBucket>,
    /// Table size that triggers the next pruning pass.
    prune_at: usize,
}

/// Token buckets keyed by client IP.
///
/// Requests without connection info share a single bucket. Buckets that
/// have refilled completely are dropped whenever the table outgrows its
/// high-water mark, so memory follows the number of recently active clients.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<Buckets>,
    rps: f64,
    burst: f64,
    prune_threshold: usize,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32, burst_size: u32) -> Self {
        Self {
            buckets: Mutex::new(Buckets {
                clients: HashMap::new(),
                prune_at: PRUNE_THRESHOLD,
            }),
            rps: f64::from(requests_per_second),
            burst: f64::from(burst_size),
            prune_threshold: PRUNE_THRESHOLD,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second, config.burst_size)
    }

    /// Take one token for `client`.
    pub fn check(&self, client: Option<IpAddr>) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        if buckets.clients.len() >= buckets.prune_at && !buckets.clients.contains_key(&client) {
            let removed = self.prune(&mut buckets);
            tracing::debug!(removed, remaining = buckets.clients.len(), "Pruned idle rate limit buckets");
        }
        let bucket = buckets
            .clients
            .entry(client)
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }

    /// Drop every bucket that has refilled to capacity. Returns how many went.
    pub fn prune_idle(&self) -> usize {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        self.prune(&mut buckets)
    }

    fn prune(&self, buckets: &mut Buckets) -> usize {
        let now = Instant::now();
        let before = buckets.clients.len();
        buckets
            .clients
            .retain(|_, bucket| !bucket.is_full_at(now, self.burst, self.rps));
        buckets.prune_at = (buckets.clients.len() * 2).max(self.prune_threshold);
        before - buckets.clients.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clients
            .len()
    }
}

/// Reject with 429 once the client's bucket is empty.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if limiter.check(client) {
        next.run(request).await
    } else {
        tracing::warn!(client = ?client, "Rate limit exceeded");
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }
}
