//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap backend calls and health probes with a deadline
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are distinct from other errors
//! - Timed-out requests return 504 Gateway Timeout

use std::future::Future;
use std::time::Duration;

use crate::error::ForwardError;

/// Run `fut`, failing with [`ForwardError::Timeout`] after `limit`.
pub async fn with_deadline<F: Future>(limit: Duration, fut: F) -> Result<F::Output, ForwardError> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ForwardError::Timeout(limit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let slow = tokio::time::sleep(Duration::from_secs(5));
        let result = with_deadline(Duration::from_secs(1), slow).await;
        assert!(matches!(result, Err(ForwardError::Timeout(d)) if d == Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn test_fast_future_passes_through() {
        let result = with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(result.unwrap(), 7);
    }
}
