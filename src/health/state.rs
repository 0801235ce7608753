//! Backend health state machine.
//!
//! # States
//! - Healthy: backend receives traffic
//! - Unhealthy: backend excluded from load balancing
//!
//! # State Transitions
//! ```text
//! Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unhealthy → Healthy: first success
//! ```
//!
//! # Design Decisions
//! - Slow condemnation, fast recovery
//! - Unknown backends read as unhealthy until a probe succeeds
//! - State changes logged for observability
//! - Readers get copies; only the monitor writes

use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::observability::metrics;

#[derive(Debug)]
struct HealthRecord {
    healthy: bool,
    consecutive_failures: u32,
    last_checked: Instant,
    last_latency: Duration,
}

/// Copy of a backend's health record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub consecutive_failures: u32,
    /// Milliseconds since the last probe finished.
    pub checked_ms_ago: u64,
    /// Latency of the last probe in milliseconds.
    pub last_latency_ms: u64,
}

/// Per-backend liveness table.
#[derive(Debug)]
pub struct HealthTable {
    records: DashMap<String, HealthRecord>,
    unhealthy_threshold: u32,
    monitored: bool,
}

impl HealthTable {
    /// A table fed by active probes. Unknown backends are unhealthy.
    pub fn new(unhealthy_threshold: u32) -> Self {
        Self {
            records: DashMap::new(),
            unhealthy_threshold: unhealthy_threshold.max(1),
            monitored: true,
        }
    }

    /// A table for deployments without active checks: every backend is
    /// considered healthy.
    pub fn unmonitored() -> Self {
        Self {
            monitored: false,
            ..Self::new(1)
        }
    }

    /// Apply one probe result.
    pub fn record(&self, name: &str, success: bool, latency: Duration) {
        let mut record = self.records.entry(name.to_string()).or_insert_with(|| HealthRecord {
            healthy: false,
            consecutive_failures: 0,
            last_checked: Instant::now(),
            last_latency: Duration::ZERO,
        });
        record.last_checked = Instant::now();
        record.last_latency = latency;

        if success {
            record.consecutive_failures = 0;
            if !record.healthy {
                record.healthy = true;
                tracing::info!(server = %name, latency = ?latency, "Server recovered");
            }
        } else {
            record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            if record.healthy && record.consecutive_failures >= self.unhealthy_threshold {
                record.healthy = false;
                tracing::warn!(
                    server = %name,
                    consecutive_failures = record.consecutive_failures,
                    "Server marked unhealthy"
                );
            }
        }

        tracing::debug!(
            server = %name,
            healthy = record.healthy,
            failures = record.consecutive_failures,
            latency = ?latency,
            "Health status updated"
        );
        metrics::record_backend_health(name, record.healthy);
    }

    /// Whether `name` should receive traffic.
    pub fn is_healthy(&self, name: &str) -> bool {
        if !self.monitored {
            return true;
        }
        self.records.get(name).is_some_and(|r| r.healthy)
    }

    pub fn status(&self, name: &str) -> Option<HealthStatus> {
        self.records.get(name).map(|r| status_of(&r))
    }

    pub fn snapshot_all(&self) -> HashMap<String, HealthStatus> {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), status_of(entry.value())))
            .collect()
    }

    pub fn remove(&self, name: &str) {
        if self.records.remove(name).is_some() {
            tracing::info!(server = %name, "Removed health tracking for server");
        }
    }

    /// Drop records for backends that `keep` rejects.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        self.records.retain(|name, _| keep(name));
    }
}

fn status_of(record: &HealthRecord) -> HealthStatus {
    HealthStatus {
        healthy: record.healthy,
        consecutive_failures: record.consecutive_failures,
        checked_ms_ago: millis(record.last_checked.elapsed()),
        last_latency_ms: millis(record.last_latency),
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LATENCY: Duration = Duration::from_millis(5);

    #[test]
    fn test_unknown_is_unhealthy() {
        let table = HealthTable::new(3);
        assert!(!table.is_healthy("ghost"));
        assert!(table.status("ghost").is_none());
    }

    #[test]
    fn test_unmonitored_is_always_healthy() {
        let table = HealthTable::unmonitored();
        assert!(table.is_healthy("anything"));
    }

    #[test]
    fn test_first_failure_keeps_new_backend_unhealthy() {
        let table = HealthTable::new(3);
        table.record("b", false, LATENCY);
        assert!(!table.is_healthy("b"));
        assert_eq!(table.status("b").unwrap().consecutive_failures, 1);
    }

    #[test]
    fn test_slow_condemnation_fast_recovery() {
        let table = HealthTable::new(3);
        table.record("b", true, LATENCY);
        assert!(table.is_healthy("b"));

        table.record("b", false, LATENCY);
        table.record("b", false, LATENCY);
        assert!(table.is_healthy("b"));

        table.record("b", false, LATENCY);
        assert!(!table.is_healthy("b"));

        table.record("b", true, LATENCY);
        assert!(table.is_healthy("b"));
        assert_eq!(table.status("b").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_flaky_failure_is_forgiven() {
        let table = HealthTable::new(3);
        table.record("b", true, LATENCY);
        table.record("b", false, LATENCY);
        table.record("b", false, LATENCY);
        table.record("b", true, LATENCY);
        table.record("b", false, LATENCY);
        table.record("b", false, LATENCY);
        assert!(table.is_healthy("b"));
    }

    #[test]
    fn test_retain_and_remove() {
        let table = HealthTable::new(1);
        table.record("a", true, LATENCY);
        table.record("b", true, LATENCY);
        table.record("c", true, LATENCY);

        table.retain(|name| name != "b");
        table.remove("c");
        let names: Vec<_> = table.snapshot_all().into_keys().collect();
        assert_eq!(names, vec!["a".to_string()]);
    }
}
