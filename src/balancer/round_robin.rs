//! Round-robin selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use super::Selector;
use crate::models::ProxyRecord;

/// Cycles through candidates in input order
///
/// Uses atomic operations for lock-free cursor tracking.
pub struct RoundRobinSelector {
    cursor: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    /// Current cursor value
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl Selector for RoundRobinSelector {
    fn pick(&self, candidates: &[ProxyRecord]) -> usize {
        // Atomically increment and get the previous value, then wrap around
        self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len()
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record;
    use std::sync::Arc;

    #[test]
    fn test_round_robin_order() {
        let selector = RoundRobinSelector::new();
        let candidates = vec![test_record(1, 50), test_record(2, 50), test_record(3, 50)];

        // Should cycle through 1, 2, 3, 1, 2, 3...
        let picked: Vec<i64> = (0..6)
            .map(|_| candidates[selector.pick(&candidates)].id)
            .collect();
        assert_eq!(picked, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_round_robin_cursor_survives_list_changes() {
        let selector = RoundRobinSelector::new();
        let three = vec![test_record(1, 50), test_record(2, 50), test_record(3, 50)];
        let two = vec![test_record(10, 50), test_record(20, 50)];

        assert_eq!(selector.pick(&three), 0);
        assert_eq!(selector.pick(&three), 1);
        // Cursor is 2 now; 2 % 2 == 0.
        assert_eq!(two[selector.pick(&two)].id, 10);
        assert_eq!(selector.position(), 3);
    }

    #[test]
    fn test_round_robin_concurrent_callers_never_skip() {
        let selector = Arc::new(RoundRobinSelector::new());
        let candidates = Arc::new(vec![test_record(1, 50), test_record(2, 50)]);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let selector = selector.clone();
                let candidates = candidates.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        selector.pick(&candidates);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(selector.position(), 8000);
    }
}
