//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → prefix + eligible candidates
//!     → round_robin.rs (per-prefix counter modulo eligible count)
//!     → chosen backend
//! ```
//!
//! # Design Decisions
//! - Counter state is its own lock domain, separate from registry and health
//! - Unhealthy backends are excluded before selection, not skipped during it

pub mod round_robin;

pub use round_robin::PrefixRoundRobin;
