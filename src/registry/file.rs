//! Registry persisted to a JSON file.
//!
//! # Responsibilities
//! - Load the registered servers from disk at startup
//! - Write a full snapshot after every successful mutation
//!
//! # Design Decisions
//! - Reads are served from an in-memory table with identical semantics
//! - The snapshot is written before the in-memory table changes, so a failed
//!   write leaves both sides untouched
//! - Writes go to a sibling temp file and are renamed into place

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::error::RegistryError;
use crate::registry::{InMemoryRegistry, PrefixMatch, Server, ServiceRegistry};

/// A `ServiceRegistry` that survives restarts.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    inner: InMemoryRegistry,
    /// Serializes snapshot + apply so files never land out of order.
    write_lock: Mutex<()>,
}

impl FileRegistry {
    /// Open the registry at `path`, loading it if the file exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let inner = InMemoryRegistry::new();

        if path.exists() {
            let file = File::open(&path).map_err(persistence)?;
            let servers: Vec<Server> =
                serde_json::from_reader(BufReader::new(file)).map_err(persistence)?;
            for server in servers {
                inner.register(server)?;
            }
            tracing::info!(path = %path.display(), servers = inner.len(), "Loaded registry from file");
        }

        Ok(Self {
            path,
            inner,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, servers: &[Server]) -> Result<(), RegistryError> {
        let tmp = self.path.with_extension("json.tmp");
        {
            let file = File::create(&tmp).map_err(persistence)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, servers).map_err(persistence)?;
            writer.flush().map_err(persistence)?;
        }
        fs::rename(&tmp, &self.path).map_err(persistence)?;
        tracing::debug!(path = %self.path.display(), servers = servers.len(), "Registry snapshot written");
        Ok(())
    }
}

fn persistence(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Persistence(e.to_string())
}

impl ServiceRegistry for FileRegistry {
    fn register(&self, server: Server) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.inner.get(&server.name).is_some() {
            return Err(RegistryError::DuplicateName(server.name));
        }
        let mut next = self.inner.list();
        next.push(server.clone());
        self.save(&next)?;
        self.inner.register(server)
    }

    fn upsert(&self, server: Server) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next: Vec<Server> = self
            .inner
            .list()
            .into_iter()
            .filter(|s| s.name != server.name)
            .collect();
        next.push(server.clone());
        self.save(&next)?;
        self.inner.upsert(server)
    }

    fn deregister(&self, name: &str) -> Result<(), RegistryError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.inner.get(name).is_none() {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        let next: Vec<Server> = self
            .inner
            .list()
            .into_iter()
            .filter(|s| s.name != name)
            .collect();
        self.save(&next)?;
        self.inner.deregister(name)
    }

    fn list(&self) -> Vec<Server> {
        self.inner.list()
    }

    fn get(&self, name: &str) -> Option<Server> {
        self.inner.get(name)
    }

    fn servers_for_path(&self, path: &str) -> PrefixMatch {
        self.inner.servers_for_path(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        {
            let registry = FileRegistry::open(&path).unwrap();
            registry
                .register(Server::new("s1", "http://127.0.0.1:4200", ["/s1"]).unwrap())
                .unwrap();
            registry
                .register(Server::new("s2", "http://127.0.0.1:2200", ["/s2"]).unwrap())
                .unwrap();
            registry.deregister("s2").unwrap();
        }

        let reopened = FileRegistry::open(&path).unwrap();
        let names: Vec<_> = reopened.list().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["s1".to_string()]);
        assert_eq!(reopened.servers_for_path("/s1/x").prefix(), Some("/s1"));
    }

    #[test]
    fn test_same_errors_as_in_memory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = FileRegistry::open(dir.path().join("registry.json")).unwrap();
        let server = Server::new("s1", "http://127.0.0.1:4200", ["/s1"]).unwrap();

        registry.register(server.clone()).unwrap();
        assert!(matches!(registry.register(server), Err(RegistryError::DuplicateName(_))));
        assert!(matches!(registry.deregister("nope"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_failed_write_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("registry.json");
        let registry = FileRegistry::open(&path).unwrap();

        let err = registry
            .register(Server::new("s1", "http://127.0.0.1:4200", ["/s1"]).unwrap())
            .unwrap_err();
        assert!(matches!(err, RegistryError::Persistence(_)));
        assert!(registry.list().is_empty());
    }
}
