//! Round-robin load balancing strategy.

use dashmap::DashMap;

/// Round-robin selector with one counter per route prefix.
///
/// The counter only ever grows; it is taken modulo the length of whatever
/// slice is offered, so when the eligible set shrinks or grows between calls
/// the rotation continues from the same counter over the new set.
#[derive(Debug, Default)]
pub struct PrefixRoundRobin {
    counters: DashMap<String, usize>,
}

impl PrefixRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter for `prefix` and map it onto `0..len`.
    pub fn next_index(&self, prefix: &str, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        let mut counter = match self.counters.get_mut(prefix) {
            Some(counter) => counter,
            None => self.counters.entry(prefix.to_string()).or_insert(0),
        };
        let index = *counter % len;
        *counter = counter.wrapping_add(1);
        Some(index)
    }

    /// Pick the next item for `prefix`.
    pub fn select<'a, T>(&self, prefix: &str, items: &'a [T]) -> Option<&'a T> {
        self.next_index(prefix, items.len()).map(|i| &items[i])
    }

    /// Number of prefixes with a counter. Counters are never reclaimed.
    pub fn tracked_prefixes(&self) -> usize {
        self.counters.len()
    }
}
