//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request
//!     → store.rs (lookup by path; expired = miss)
//!     → on miss: route + forward, store 2xx body
//!     → store.rs evicts from the LRU end while over budget
//!
//! sweeper.rs
//!     Periodic timer → sweep_expired (tail to head)
//! ```
//!
//! # Design Decisions
//! - lru.rs keeps nodes in an arena addressed by `NodeId`, so splicing is
//!   O(1) without shared mutable references
//! - Capacity is measured in bytes, not entries
//! - TTL and capacity eviction are independent

pub mod lru;
pub mod store;
pub mod sweeper;

pub use store::{CacheStats, ResponseCache, DEFAULT_ENTRY_OVERHEAD};
pub use sweeper::spawn_sweeper;
