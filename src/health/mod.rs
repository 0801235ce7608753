//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Snapshot registry
//!     → Probe each backend concurrently (bounded by timeout)
//!     → Update state.rs
//!
//! State machine (state.rs):
//!     Healthy ←→ Unhealthy
//!     Consecutive-failure threshold to condemn, single success to recover
//! ```
//!
//! # Design Decisions
//! - Health state is per-backend, keyed by server name
//! - Routing reads health through `HealthTable::is_healthy` only

pub mod active;
pub mod state;

pub use active::{HealthMonitor, HealthMonitorHandle};
pub use state::{HealthStatus, HealthTable};
