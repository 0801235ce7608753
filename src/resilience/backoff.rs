//! Escalating retry delays.

use std::time::Duration;

/// Fixed schedule of delays between attempts.
///
/// The delay after the n-th failed attempt is the n-th entry; attempts past
/// the end reuse the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<Duration>,
}

impl BackoffSchedule {
    pub fn new(steps: Vec<Duration>) -> Self {
        Self { steps }
    }

    pub fn from_millis(steps: &[u64]) -> Self {
        Self::new(steps.iter().copied().map(Duration::from_millis).collect())
    }

    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let index = (attempt as usize - 1).min(self.steps.len().saturating_sub(1));
        self.steps.get(index).copied().unwrap_or(Duration::ZERO)
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::from_millis(&[100, 500, 2000])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_escalates_then_holds() {
        let schedule = BackoffSchedule::default();
        assert_eq!(schedule.delay_for(0), Duration::ZERO);
        assert_eq!(schedule.delay_for(1), Duration::from_millis(100));
        assert_eq!(schedule.delay_for(2), Duration::from_millis(500));
        assert_eq!(schedule.delay_for(3), Duration::from_millis(2000));
        assert_eq!(schedule.delay_for(9), Duration::from_millis(2000));
    }

    #[test]
    fn test_empty_schedule_never_waits() {
        let schedule = BackoffSchedule::new(Vec::new());
        assert_eq!(schedule.delay_for(1), Duration::ZERO);
    }
}
