//! Circuit breaker for backend protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: backend assumed down, requests fail fast
//! - Half-Open: testing if backend recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: first admission check after the cooldown (admitted as the probe)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-backend circuit breaker (not global), created lazily in Closed
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering backend)
//! - Each operation runs under the table's per-key lock, so transitions are atomic

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::observability::metrics;

/// Breaker state for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerRecord {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
    in_flight: u32,
}

impl Default for BreakerRecord {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            opened_at: None,
            in_flight: 0,
        }
    }
}

/// Copy of a breaker record for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failures: u32,
    pub in_flight: u32,
    /// Milliseconds since the breaker last opened.
    pub opened_ms_ago: Option<u64>,
}

/// How an admission check was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Denied,
    Admitted,
    Probe,
}

/// Outcome of [`CircuitBreakerManager::try_admit`].
#[derive(Debug)]
pub enum Admission {
    /// The breaker is open or a probe is already in flight.
    Denied,
    /// The breaker is closed.
    Admitted,
    /// The caller holds the single half-open probe slot.
    Probe(ProbePermit),
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Admission::Denied)
    }
}

/// The half-open probe slot. Dropping it reports the probe complete.
#[derive(Debug)]
pub struct ProbePermit {
    manager: Arc<CircuitBreakerManager>,
    backend: String,
}

impl ProbePermit {
    pub fn backend(&self) -> &str {
        &self.backend
    }
}

impl Drop for ProbePermit {
    fn drop(&mut self) {
        self.manager.on_request_complete(&self.backend);
    }
}

/// Table of per-backend circuit breakers.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    breakers: DashMap<String, BreakerRecord>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreakerManager {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            cooldown,
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.failure_threshold, config.cooldown())
    }

    /// Run `f` on the record for `name`, creating it in Closed if needed.
    fn with_record<R>(&self, name: &str, f: impl FnOnce(&mut BreakerRecord) -> R) -> R {
        if let Some(mut record) = self.breakers.get_mut(name) {
            return f(&mut record);
        }
        let mut record = self.breakers.entry(name.to_string()).or_default();
        f(&mut record)
    }

    fn admit(&self, name: &str) -> Verdict {
        self.with_record(name, |breaker| match breaker.state {
            BreakerState::Closed => Verdict::Admitted,
            BreakerState::Open => {
                let elapsed = breaker.opened_at.map_or(Duration::MAX, |t| t.elapsed());
                if elapsed >= self.cooldown {
                    breaker.state = BreakerState::HalfOpen;
                    breaker.in_flight = 1;
                    tracing::info!(server = %name, cooldown_elapsed = ?elapsed, "Breaker half-open, admitting probe");
                    metrics::record_breaker_state(name, BreakerState::HalfOpen);
                    Verdict::Probe
                } else {
                    tracing::debug!(server = %name, remaining = ?(self.cooldown - elapsed), "Breaker open, blocking request");
                    Verdict::Denied
                }
            }
            BreakerState::HalfOpen => {
                if breaker.in_flight == 0 {
                    breaker.in_flight = 1;
                    tracing::debug!(server = %name, "Admitting half-open probe");
                    Verdict::Probe
                } else {
                    tracing::debug!(server = %name, "Probe already in flight, blocking");
                    Verdict::Denied
                }
            }
        })
    }

    /// Whether a request to `name` may proceed.
    ///
    /// A `true` answer in half-open occupies the probe slot; the caller must
    /// follow up with exactly one [`on_request_complete`](Self::on_request_complete).
    pub fn allow_request(&self, name: &str) -> bool {
        self.admit(name) != Verdict::Denied
    }

    /// Like [`allow_request`](Self::allow_request), but a half-open admission
    /// comes back as a [`ProbePermit`] that releases the slot on drop.
    pub fn try_admit(self: &Arc<Self>, name: &str) -> Admission {
        match self.admit(name) {
            Verdict::Denied => Admission::Denied,
            Verdict::Admitted => Admission::Admitted,
            Verdict::Probe => Admission::Probe(ProbePermit {
                manager: Arc::clone(self),
                backend: name.to_string(),
            }),
        }
    }

    /// Record a successful request.
    pub fn on_success(&self, name: &str) {
        self.with_record(name, |breaker| {
            breaker.failures = 0;
            match breaker.state {
                BreakerState::HalfOpen => {
                    breaker.state = BreakerState::Closed;
                    breaker.in_flight = 0;
                    tracing::info!(server = %name, "Breaker closed after successful probe");
                    metrics::record_breaker_state(name, BreakerState::Closed);
                }
                BreakerState::Open => {
                    tracing::warn!(server = %name, "Success recorded for open breaker");
                }
                BreakerState::Closed => {}
            }
        });
    }

    /// Record a failed request.
    pub fn on_failure(&self, name: &str) {
        let threshold = self.failure_threshold;
        self.with_record(name, |breaker| {
            breaker.failures = breaker.failures.saturating_add(1);
            match breaker.state {
                BreakerState::HalfOpen => {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                    breaker.in_flight = 0;
                    tracing::warn!(server = %name, failures = breaker.failures, "Probe failed, breaker opened");
                    metrics::record_breaker_state(name, BreakerState::Open);
                }
                BreakerState::Closed if breaker.failures >= threshold => {
                    breaker.state = BreakerState::Open;
                    breaker.opened_at = Some(Instant::now());
                    tracing::warn!(server = %name, failures = breaker.failures, threshold, "Breaker opened due to failures");
                    metrics::record_breaker_state(name, BreakerState::Open);
                }
                BreakerState::Closed => {
                    tracing::debug!(server = %name, failures = breaker.failures, threshold, "Failure recorded");
                }
                BreakerState::Open => {
                    tracing::debug!(server = %name, failures = breaker.failures, "Additional failure on open breaker");
                }
            }
        });
    }

    /// Release a half-open probe slot. Never drops below zero.
    pub fn on_request_complete(&self, name: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(name) {
            if breaker.state == BreakerState::HalfOpen && breaker.in_flight > 0 {
                breaker.in_flight -= 1;
                tracing::debug!(server = %name, in_flight = breaker.in_flight, "Half-open request completed");
            }
        }
    }

    /// Current state; unknown backends read as Closed.
    pub fn state(&self, name: &str) -> BreakerState {
        self.breakers
            .get(name)
            .map_or(BreakerState::Closed, |b| b.state)
    }

    pub fn snapshot(&self, name: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(name).map(|b| snapshot_of(&b))
    }

    pub fn snapshot_all(&self) -> HashMap<String, BreakerSnapshot> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), snapshot_of(entry.value())))
            .collect()
    }

    /// Forget a backend (e.g. after deregistration).
    pub fn remove(&self, name: &str) {
        if self.breakers.remove(name).is_some() {
            tracing::info!(server = %name, "Removed circuit breaker");
        }
    }

    /// Force a breaker back to Closed.
    pub fn reset(&self, name: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(name) {
            let old_state = breaker.state;
            *breaker = BreakerRecord::default();
            tracing::info!(server = %name, old_state = ?old_state, "Manually reset circuit breaker");
            metrics::record_breaker_state(name, BreakerState::Closed);
        }
    }
}

fn snapshot_of(record: &BreakerRecord) -> BreakerSnapshot {
    BreakerSnapshot {
        state: record.state,
        failures: record.failures,
        in_flight: record.in_flight,
        opened_ms_ago: record
            .opened_at
            .map(|t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(30);

    fn tripped(manager: &CircuitBreakerManager, name: &str) {
        for _ in 0..5 {
            manager.on_failure(name);
        }
    }

    #[test]
    fn test_unknown_backend_is_closed() {
        let manager = CircuitBreakerManager::new(5, COOLDOWN);
        assert_eq!(manager.state("new"), BreakerState::Closed);
        assert!(manager.allow_request("new"));
        assert_eq!(manager.snapshot("new").unwrap().failures, 0);
    }

    #[test]
    fn test_success_resets_failures() {
        let manager = CircuitBreakerManager::new(3, COOLDOWN);
        manager.on_failure("b");
        manager.on_failure("b");
        manager.on_success("b");
        manager.on_failure("b");
        manager.on_failure("b");
        assert_eq!(manager.state("b"), BreakerState::Closed);
        manager.on_failure("b");
        assert_eq!(manager.state("b"), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_then_half_opens_after_cooldown() {
        let manager = CircuitBreakerManager::new(5, COOLDOWN);
        tripped(&manager, "b");
        assert_eq!(manager.state("b"), BreakerState::Open);
        assert!(!manager.allow_request("b"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(!manager.allow_request("b"));
        assert_eq!(manager.state("b"), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(manager.allow_request("b"));
        assert_eq!(manager.state("b"), BreakerState::HalfOpen);
        assert_eq!(manager.snapshot("b").unwrap().in_flight, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_in_half_open() {
        let manager = CircuitBreakerManager::new(5, COOLDOWN);
        tripped(&manager, "b");
        tokio::time::advance(COOLDOWN).await;

        assert!(manager.allow_request("b"));
        assert!(!manager.allow_request("b"));
        assert!(!manager.allow_request("b"));

        manager.on_request_complete("b");
        assert!(manager.allow_request("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_outcomes() {
        let manager = CircuitBreakerManager::new(5, COOLDOWN);
        tripped(&manager, "b");
        tokio::time::advance(COOLDOWN).await;

        assert!(manager.allow_request("b"));
        manager.on_failure("b");
        manager.on_request_complete("b");
        assert_eq!(manager.state("b"), BreakerState::Open);
        assert!(!manager.allow_request("b"));

        tokio::time::advance(COOLDOWN).await;
        assert!(manager.allow_request("b"));
        manager.on_success("b");
        manager.on_request_complete("b");
        let snapshot = manager.snapshot("b").unwrap();
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failures, 0);
        assert_eq!(snapshot.in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_permit_releases_on_drop() {
        let manager = Arc::new(CircuitBreakerManager::new(5, COOLDOWN));
        tripped(&manager, "b");
        tokio::time::advance(COOLDOWN).await;

        let permit = match manager.try_admit("b") {
            Admission::Probe(permit) => permit,
            other => panic!("expected probe admission, got {:?}", other),
        };
        assert!(!manager.try_admit("b").is_allowed());
        drop(permit);
        assert!(matches!(manager.try_admit("b"), Admission::Probe(_)));
    }

    #[test]
    fn test_complete_never_underflows() {
        let manager = CircuitBreakerManager::new(5, COOLDOWN);
        manager.on_request_complete("ghost");
        manager.on_request_complete("b");
        assert!(manager.allow_request("b"));
        manager.on_request_complete("b");
        assert_eq!(manager.snapshot("b").unwrap().in_flight, 0);
    }

    #[test]
    fn test_reset_and_remove() {
        let manager = CircuitBreakerManager::new(2, COOLDOWN);
        manager.on_failure("b");
        manager.on_failure("b");
        assert_eq!(manager.state("b"), BreakerState::Open);

        manager.reset("b");
        assert_eq!(manager.state("b"), BreakerState::Closed);
        assert!(manager.allow_request("b"));

        manager.remove("b");
        assert!(manager.snapshot("b").is_none());
        assert_eq!(manager.snapshot_all().len(), 0);
    }

    #[test]
    fn test_concurrent_probe_admission() {
        let manager = Arc::new(CircuitBreakerManager::new(1, Duration::ZERO));
        manager.on_failure("b");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || manager.allow_request("b")));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();
        assert_eq!(admitted, 1);
    }
}
