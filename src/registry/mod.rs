//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! Admin API / startup config
//!     → Server::new (validate name, base URL, prefixes)
//!     → ServiceRegistry::register / upsert / deregister
//!
//! Request path
//!     → ServiceRegistry::servers_for_path
//!     → PrefixMatch { NoMatch | Single | Multiple }
//!     → routing (health + breaker filtering, round robin)
//! ```
//!
//! # Design Decisions
//! - Longest string prefix wins; every server that registered exactly that
//!   prefix is a candidate
//! - Readers receive owned snapshots, never references into the table
//! - Storage is behind the `ServiceRegistry` trait so persistence can be swapped

pub mod file;
pub mod memory;

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RegistryError;

pub use file::FileRegistry;
pub use memory::InMemoryRegistry;

/// A registered backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Unique key.
    pub name: String,
    /// Base URL the matched prefix is rewritten onto. Must be `http://`;
    /// the outbound client does not speak TLS.
    pub base_url: String,
    /// Path prefixes in registration order, without duplicates.
    pub prefixes: Vec<String>,
    /// Registration time, seconds since the Unix epoch.
    pub registered_at: u64,
}

impl Server {
    /// Build a validated record stamped with the current time.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        prefixes: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        let base_url = base_url.into();

        if name.trim().is_empty() {
            return Err(RegistryError::InvalidServer("name must not be empty".into()));
        }
        let parsed = Url::parse(&base_url)
            .map_err(|e| RegistryError::InvalidServer(format!("base_url '{}': {}", base_url, e)))?;
        if parsed.scheme() != "http" {
            return Err(RegistryError::InvalidServer(format!(
                "base_url '{}': scheme '{}' is not supported; backends must use plain http:// (no outbound TLS)",
                base_url,
                parsed.scheme()
            )));
        }

        let mut ordered: Vec<String> = Vec::new();
        for prefix in prefixes {
            let prefix = prefix.into();
            if !prefix.starts_with('/') {
                return Err(RegistryError::InvalidServer(format!(
                    "prefix '{}' must start with '/'",
                    prefix
                )));
            }
            if !ordered.contains(&prefix) {
                ordered.push(prefix);
            }
        }
        if ordered.is_empty() {
            return Err(RegistryError::InvalidServer("at least one prefix is required".into()));
        }

        Ok(Self {
            name,
            base_url,
            prefixes: ordered,
            registered_at: unix_now(),
        })
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Result of a longest-prefix lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefixMatch {
    /// No registered prefix is a prefix of the path.
    NoMatch,
    /// Exactly one server registered the longest matching prefix.
    Single { prefix: String, server: Server },
    /// Several servers registered the same longest prefix, ordered by name.
    Multiple { prefix: String, servers: Vec<Server> },
}

impl PrefixMatch {
    fn from_candidates(prefix: String, mut servers: Vec<Server>) -> Self {
        match servers.len() {
            0 => PrefixMatch::NoMatch,
            1 => PrefixMatch::Single {
                prefix,
                server: servers.remove(0),
            },
            _ => PrefixMatch::Multiple { prefix, servers },
        }
    }

    /// The matched prefix, if any.
    pub fn prefix(&self) -> Option<&str> {
        match self {
            PrefixMatch::NoMatch => None,
            PrefixMatch::Single { prefix, .. } | PrefixMatch::Multiple { prefix, .. } => Some(prefix),
        }
    }

    /// Candidate servers, empty for `NoMatch`.
    pub fn candidates(&self) -> &[Server] {
        match self {
            PrefixMatch::NoMatch => &[],
            PrefixMatch::Single { server, .. } => std::slice::from_ref(server),
            PrefixMatch::Multiple { servers, .. } => servers,
        }
    }
}

/// Find the longest registered prefix of `path` and every server that
/// registered exactly that prefix.
pub fn longest_prefix_match<'a>(
    servers: impl Iterator<Item = &'a Server> + Clone,
    path: &str,
) -> PrefixMatch {
    let longest = servers
        .clone()
        .flat_map(|s| s.prefixes.iter())
        .filter(|p| path.starts_with(p.as_str()))
        .max_by_key(|p| p.len());

    let Some(longest) = longest else {
        return PrefixMatch::NoMatch;
    };

    let candidates = servers
        .filter(|s| s.prefixes.iter().any(|p| p == longest))
        .cloned()
        .collect();

    PrefixMatch::from_candidates(longest.clone(), candidates)
}

/// Directory of backend services.
///
/// Implementations must be safe for many concurrent readers; mutations are
/// serialized. All reads return owned copies.
pub trait ServiceRegistry: Send + Sync {
    /// Add a server. Fails with `DuplicateName` if the name is taken.
    fn register(&self, server: Server) -> Result<(), RegistryError>;

    /// Add or replace a server by name.
    fn upsert(&self, server: Server) -> Result<(), RegistryError>;

    /// Remove a server. Fails with `NotFound` if absent.
    fn deregister(&self, name: &str) -> Result<(), RegistryError>;

    /// Snapshot of every registered server, ordered by name.
    fn list(&self) -> Vec<Server>;

    /// Look up one server by name.
    fn get(&self, name: &str) -> Option<Server>;

    /// Longest-prefix lookup for a request path.
    fn servers_for_path(&self, path: &str) -> PrefixMatch;
}
