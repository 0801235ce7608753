//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request path
//!     → registry longest-prefix match (NoMatch | Single | Multiple)
//!     → filter: healthy AND breaker admits
//!     → per-prefix round robin over the eligible set
//!     → ResolvedBackend { server, target_url, prefix, permit }
//! ```

pub mod router;

pub use router::{target_url, ResilientRouter, ResolvedBackend};
