//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to backend:
//!     → circuit_breaker.rs (admission during backend selection)
//!     → timeouts.rs (enforce per-attempt deadline)
//!     → On failure: retries.rs (check if retryable, wait per backoff.rs)
//!     → circuit_breaker.rs (one terminal success/failure report)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Circuit breaker prevents cascading failures
//! - Backoff follows a fixed escalating schedule

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffSchedule;
pub use circuit_breaker::{Admission, BreakerSnapshot, BreakerState, CircuitBreakerManager, ProbePermit};
pub use retries::RetryPolicy;
pub use timeouts::with_deadline;
