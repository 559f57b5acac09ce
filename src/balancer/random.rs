//! Uniform and reputation-weighted random selection

use rand::seq::SliceRandom;
use rand::Rng;

use super::Selector;
use crate::models::ProxyRecord;

/// Picks a candidate uniformly at random
pub struct RandomSelector;

impl Selector for RandomSelector {
    fn pick(&self, candidates: &[ProxyRecord]) -> usize {
        rand::thread_rng().gen_range(0..candidates.len())
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}

/// Picks a candidate with probability proportional to its reputation
///
/// Weight is `max(reputation, 1)` so zero-reputation records stay reachable.
pub struct WeightedRandomSelector;

impl WeightedRandomSelector {
    fn weight(record: &ProxyRecord) -> u64 {
        u64::from(record.reputation_score.max(1))
    }

    /// Pick using a caller-supplied draw in `1..=total_weight`
    fn pick_with(candidates: &[ProxyRecord], draw: u64) -> usize {
        let mut cumulative = 0u64;
        for (idx, record) in candidates.iter().enumerate() {
            cumulative += Self::weight(record);
            if cumulative >= draw {
                return idx;
            }
        }
        candidates.len() - 1
    }
}

impl Selector for WeightedRandomSelector {
    fn pick(&self, candidates: &[ProxyRecord]) -> usize {
        let total: u64 = candidates.iter().map(Self::weight).sum();
        let draw = rand::thread_rng().gen_range(1..=total);
        Self::pick_with(candidates, draw)
    }

    fn strategy_name(&self) -> &'static str {
        "weighted_random"
    }
}

/// Uniform pick among a subset of indexes
pub(super) fn pick_uniform(indexes: &[usize]) -> Option<usize> {
    indexes.choose(&mut rand::thread_rng()).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record;

    #[test]
    fn test_random_selector_stays_in_bounds() {
        let candidates = vec![test_record(1, 10), test_record(2, 20), test_record(3, 30)];
        for _ in 0..100 {
            assert!(RandomSelector.pick(&candidates) < 3);
        }
    }

    #[test]
    fn test_weighted_cumulative_boundaries() {
        let candidates = vec![test_record(1, 90), test_record(2, 60), test_record(3, 30)];

        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 1), 0);
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 90), 0);
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 91), 1);
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 150), 1);
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 151), 2);
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 180), 2);
    }

    #[test]
    fn test_weighted_zero_reputation_has_floor_weight() {
        let candidates = vec![test_record(1, 0), test_record(2, 0)];
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 1), 0);
        assert_eq!(WeightedRandomSelector::pick_with(&candidates, 2), 1);
    }

    #[test]
    fn test_weighted_distribution_matches_reputation() {
        let candidates = vec![test_record(1, 90), test_record(2, 60), test_record(3, 30)];
        let mut counts = [0usize; 3];
        let draws = 10_000;

        for _ in 0..draws {
            counts[WeightedRandomSelector.pick(&candidates)] += 1;
        }

        let expected = [90.0 / 180.0, 60.0 / 180.0, 30.0 / 180.0];
        for (count, want) in counts.iter().zip(expected) {
            let observed = *count as f64 / draws as f64;
            assert!(
                (observed - want).abs() < 0.05,
                "observed {:.3}, expected {:.3}",
                observed,
                want
            );
        }
    }
}
