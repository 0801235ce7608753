//! Dynamic reverse proxy core: service registry, resilient routing,
//! circuit breaking, health monitoring, retrying forwarder and a
//! byte-bounded LRU+TTL response cache.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::{Components, Shutdown};
