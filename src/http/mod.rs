//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, rate limit)
//!     → GET: response cache lookup by path
//!     → routing (resolve backend)
//!     → forwarder.rs (attempts, backoff, breaker report)
//!     → response.rs (strip hop-by-hop headers)
//!     → Send to client (GET 2xx bodies also stored in the cache)
//! ```

pub mod forwarder;
pub mod request;
pub mod response;
pub mod server;

pub use forwarder::RequestForwarder;
pub use request::{request_id, MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
