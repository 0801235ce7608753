//! In-memory service registry.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::RegistryError;
use crate::registry::{longest_prefix_match, PrefixMatch, Server, ServiceRegistry};

/// Registry table guarded by a reader/writer lock.
///
/// Keyed by name in a `BTreeMap` so snapshots and candidate lists come out
/// in a stable order, which keeps round robin rotation deterministic.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    servers: RwLock<BTreeMap<String, Server>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `servers`.
    pub fn with_servers(servers: impl IntoIterator<Item = Server>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for server in servers {
            registry.register(server)?;
        }
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Server>> {
        self.servers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Server>> {
        self.servers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn register(&self, server: Server) -> Result<(), RegistryError> {
        let mut servers = self.write();
        if servers.contains_key(&server.name) {
            return Err(RegistryError::DuplicateName(server.name));
        }
        tracing::info!(
            server = %server.name,
            base_url = %server.base_url,
            prefixes = ?server.prefixes,
            "Server registered"
        );
        servers.insert(server.name.clone(), server);
        Ok(())
    }

    fn upsert(&self, server: Server) -> Result<(), RegistryError> {
        let mut servers = self.write();
        let replaced = servers.insert(server.name.clone(), server.clone()).is_some();
        tracing::info!(
            server = %server.name,
            base_url = %server.base_url,
            prefixes = ?server.prefixes,
            replaced,
            "Server upserted"
        );
        Ok(())
    }

    fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut servers = self.write();
        if servers.remove(name).is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        tracing::info!(server = %name, "Server deregistered");
        Ok(())
    }

    fn list(&self) -> Vec<Server> {
        self.read().values().cloned().collect()
    }

    fn get(&self, name: &str) -> Option<Server> {
        self.read().get(name).cloned()
    }

    fn servers_for_path(&self, path: &str) -> PrefixMatch {
        let servers = self.read();
        longest_prefix_match(servers.values(), path)
    }
}
