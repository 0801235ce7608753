//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Build tables → Seed registry → Start tasks
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Join tasks
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, drain, stop background tasks

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::trigger_on_signal;
pub use startup::{BackgroundTasks, Components, StartupError};
