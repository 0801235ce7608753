//! Backend resolution.
//!
//! # Responsibilities
//! - Find the longest registered prefix for a request path
//! - Filter its candidates by health and breaker admission
//! - Rotate among the eligible ones per prefix
//! - Build the outbound target URL
//!
//! # Design Decisions
//! - Registry, health table, breaker table and counters are separate lock
//!   domains; resolution never holds two at once
//! - Admission is checked for every healthy candidate; half-open permits of
//!   candidates that are not chosen are dropped right away, releasing the slot

use std::sync::Arc;

use crate::error::RouteError;
use crate::health::HealthTable;
use crate::load_balancer::PrefixRoundRobin;
use crate::registry::{PrefixMatch, Server, ServiceRegistry};
use crate::resilience::{Admission, CircuitBreakerManager, ProbePermit};

/// The backend picked for one request.
#[derive(Debug)]
pub struct ResolvedBackend {
    pub server: Server,
    pub target_url: String,
    pub prefix: String,
    /// Held when this request is the breaker's half-open probe.
    pub permit: Option<ProbePermit>,
}

impl ResolvedBackend {
    pub fn name(&self) -> &str {
        &self.server.name
    }

    pub fn is_probe(&self) -> bool {
        self.permit.is_some()
    }
}

pub struct ResilientRouter {
    registry: Arc<dyn ServiceRegistry>,
    health: Arc<HealthTable>,
    breakers: Arc<CircuitBreakerManager>,
    round_robin: PrefixRoundRobin,
}

impl ResilientRouter {
    pub fn new(
        registry: Arc<dyn ServiceRegistry>,
        health: Arc<HealthTable>,
        breakers: Arc<CircuitBreakerManager>,
    ) -> Self {
        Self {
            registry,
            health,
            breakers,
            round_robin: PrefixRoundRobin::new(),
        }
    }

    /// Pick a backend for `path_and_query` (path plus optional `?query`).
    pub fn resolve_backend(&self, path_and_query: &str) -> Result<ResolvedBackend, RouteError> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let matched = self.registry.servers_for_path(path);
        let prefix = match matched.prefix() {
            Some(prefix) => prefix.to_string(),
            None => {
                tracing::debug!(path = %path, "No route found");
                return Err(RouteError::NoRoute {
                    path: path.to_string(),
                });
            }
        };
        let candidates = match matched {
            PrefixMatch::NoMatch => Vec::new(),
            PrefixMatch::Single { server, .. } => vec![server],
            PrefixMatch::Multiple { servers, .. } => servers,
        };
        let total = candidates.len();

        let mut eligible: Vec<(Server, Admission)> = Vec::with_capacity(total);
        for server in candidates {
            let healthy = self.health.is_healthy(&server.name);
            // Unhealthy servers never touch the breaker, so no probe slot is taken.
            let admission = if healthy {
                self.breakers.try_admit(&server.name)
            } else {
                Admission::Denied
            };

            if admission.is_allowed() {
                tracing::debug!(server = %server.name, "Server eligible");
                eligible.push((server, admission));
            } else {
                tracing::debug!(
                    server = %server.name,
                    healthy,
                    breaker_allowed = false,
                    "Server filtered out"
                );
            }
        }

        let index = match self.round_robin.next_index(&prefix, eligible.len()) {
            Some(index) => index,
            None => {
                tracing::warn!(
                    path = %path,
                    prefix = %prefix,
                    total_candidates = total,
                    "No healthy backends available"
                );
                return Err(RouteError::NoHealthyBackend {
                    prefix,
                    candidates: total,
                });
            }
        };

        let eligible_count = eligible.len();
        // The other admissions drop here; any permits among them are released.
        let (server, admission) = eligible.swap_remove(index);
        drop(eligible);

        let permit = match admission {
            Admission::Probe(permit) => Some(permit),
            Admission::Admitted | Admission::Denied => None,
        };
        let target_url = target_url(&server.base_url, &path[prefix.len()..], query);

        tracing::info!(
            path = %path,
            prefix = %prefix,
            server = %server.name,
            target_url = %target_url,
            healthy_count = eligible_count,
            total_count = total,
            probe = permit.is_some(),
            "Backend selected"
        );

        Ok(ResolvedBackend {
            server,
            target_url,
            prefix,
            permit,
        })
    }
}

/// Join a base URL with the path remainder after the matched prefix.
///
/// Exactly one `/` separates the two; a remainder that does not start with
/// one (prefix `/s1`, path `/s1foo`) still lands under the base URL's path.
pub fn target_url(base_url: &str, remainder: &str, query: Option<&str>) -> String {
    let mut url = if remainder.is_empty() {
        base_url.to_string()
    } else {
        let base = base_url.trim_end_matches('/');
        let remainder = remainder.trim_start_matches('/');
        format!("{base}/{remainder}")
    };
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use crate::resilience::BreakerState;
    use std::time::Duration;

    fn router(servers: Vec<Server>) -> (ResilientRouter, Arc<HealthTable>, Arc<CircuitBreakerManager>) {
        let registry = Arc::new(InMemoryRegistry::with_servers(servers).unwrap());
        let health = Arc::new(HealthTable::new(1));
        let breakers = Arc::new(CircuitBreakerManager::new(1, Duration::ZERO));
        let router = ResilientRouter::new(registry, health.clone(), breakers.clone());
        (router, health, breakers)
    }

    fn healthy(health: &HealthTable, names: &[&str]) {
        for name in names {
            health.record(name, true, Duration::from_millis(1));
        }
    }

    fn pair() -> Vec<Server> {
        vec![
            Server::new("a", "http://127.0.0.1:7001", ["/svc"]).unwrap(),
            Server::new("b", "http://127.0.0.1:7002", ["/svc"]).unwrap(),
        ]
    }

    #[test]
    fn test_no_route() {
        let (router, _, _) = router(pair());
        let err = router.resolve_backend("/other").unwrap_err();
        assert_eq!(err, RouteError::NoRoute { path: "/other".into() });
    }

    #[test]
    fn test_unknown_health_is_fail_closed() {
        let (router, _, _) = router(pair());
        let err = router.resolve_backend("/svc/x").unwrap_err();
        assert_eq!(
            err,
            RouteError::NoHealthyBackend {
                prefix: "/svc".into(),
                candidates: 2
            }
        );
    }

    #[test]
    fn test_round_robin_alternates_then_sticks_to_survivor() {
        let (router, health, _) = router(pair());
        healthy(&health, &["a", "b"]);

        let picks: Vec<String> = (0..4)
            .map(|_| router.resolve_backend("/svc/x").unwrap().server.name)
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);

        health.record("a", false, Duration::from_millis(1));
        for _ in 0..3 {
            assert_eq!(router.resolve_backend("/svc/x").unwrap().name(), "b");
        }
    }

    #[test]
    fn test_open_breaker_excludes_candidate() {
        let registry = Arc::new(InMemoryRegistry::with_servers(pair()).unwrap());
        let health = Arc::new(HealthTable::new(1));
        let breakers = Arc::new(CircuitBreakerManager::new(1, Duration::from_secs(60)));
        let router = ResilientRouter::new(registry, health.clone(), breakers.clone());
        healthy(&health, &["a", "b"]);

        breakers.on_failure("a");
        assert_eq!(breakers.state("a"), BreakerState::Open);
        for _ in 0..3 {
            assert_eq!(router.resolve_backend("/svc").unwrap().name(), "b");
        }
    }

    #[test]
    fn test_unchosen_probe_permit_is_released() {
        let (router, health, breakers) = router(pair());
        healthy(&health, &["a", "b"]);

        // Zero cooldown: both breakers go half-open on the next admission.
        breakers.on_failure("a");
        breakers.on_failure("b");

        let resolved = router.resolve_backend("/svc").unwrap();
        assert!(resolved.is_probe());
        let other = if resolved.name() == "a" { "b" } else { "a" };
        assert_eq!(breakers.snapshot(other).unwrap().in_flight, 0);
        assert_eq!(breakers.snapshot(resolved.name()).unwrap().in_flight, 1);

        let chosen = resolved.name().to_string();
        drop(resolved);
        assert_eq!(breakers.snapshot(&chosen).unwrap().in_flight, 0);
    }

    #[test]
    fn test_target_url_construction() {
        let servers = vec![Server::new("a", "http://127.0.0.1:7001/", ["/svc"]).unwrap()];
        let (router, health, _) = router(servers);
        healthy(&health, &["a"]);

        let resolved = router.resolve_backend("/svc/items/7?limit=2").unwrap();
        assert_eq!(resolved.prefix, "/svc");
        assert_eq!(resolved.target_url, "http://127.0.0.1:7001/items/7?limit=2");

        assert_eq!(target_url("http://h", "", None), "http://h");
        assert_eq!(target_url("http://h/", "/x", Some("")), "http://h/x");
        assert_eq!(target_url("http://h", "x", Some("a=1")), "http://h/x?a=1");
        assert_eq!(target_url("http://h/api/", "x", None), "http://h/api/x");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let servers = vec![
            Server::new("short", "http://127.0.0.1:7001", ["/s1"]).unwrap(),
            Server::new("long", "http://127.0.0.1:7002", ["/s1/a"]).unwrap(),
        ];
        let (router, health, _) = router(servers);
        healthy(&health, &["short", "long"]);

        let resolved = router.resolve_backend("/s1/a/x").unwrap();
        assert_eq!(resolved.name(), "long");
        assert_eq!(resolved.target_url, "http://127.0.0.1:7002/x");
    }

    #[test]
    fn test_unseparated_remainder_stays_on_backend_host() {
        let servers = vec![Server::new("a", "http://127.0.0.1:4200", ["/s1"]).unwrap()];
        let (router, health, _) = router(servers);
        healthy(&health, &["a"]);

        let resolved = router.resolve_backend("/s1foo?x=1").unwrap();
        assert_eq!(resolved.target_url, "http://127.0.0.1:4200/foo?x=1");
        assert!(resolved.target_url.parse::<axum::http::Uri>().is_ok());
    }
}
