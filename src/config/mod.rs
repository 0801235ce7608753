//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → sections handed to the subsystems that own them
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; registry changes go through the admin API
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, CircuitBreakerConfig, HealthCheckConfig, ListenerConfig,
    ObservabilityConfig, ProxyConfig, RateLimitConfig, RegistryConfig, RetryConfig,
    ServiceConfig, TimeoutConfig,
};
