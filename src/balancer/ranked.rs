//! Deterministic selection by a per-record ranking

use super::random::pick_uniform;
use super::Selector;
use crate::models::ProxyRecord;

/// Prefers the record handed out longest ago; never-used records come first
pub struct LeastRecentlyUsedSelector;

impl Selector for LeastRecentlyUsedSelector {
    fn pick(&self, candidates: &[ProxyRecord]) -> usize {
        // `None < Some(_)`, and min_by_key keeps the first of equal keys.
        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, record)| record.last_used_at)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn strategy_name(&self) -> &'static str {
        "least_recently_used"
    }
}

/// Picks the highest reputation; ties go to the earliest candidate
pub struct BestReputationSelector;

impl Selector for BestReputationSelector {
    fn pick(&self, candidates: &[ProxyRecord]) -> usize {
        let mut best = 0;
        for (idx, record) in candidates.iter().enumerate().skip(1) {
            if record.reputation_score > candidates[best].reputation_score {
                best = idx;
            }
        }
        best
    }

    fn strategy_name(&self) -> &'static str {
        "best_reputation"
    }
}

/// Picks the lowest average response time among measured candidates
///
/// Falls back to a uniform pick when nothing has been measured yet.
pub struct FastestResponseSelector;

impl Selector for FastestResponseSelector {
    fn pick(&self, candidates: &[ProxyRecord]) -> usize {
        let mut fastest: Option<(usize, f64)> = None;
        for (idx, record) in candidates.iter().enumerate() {
            if let Some(rt) = record.response_time_avg {
                match fastest {
                    Some((_, best)) if rt >= best => {}
                    _ => fastest = Some((idx, rt)),
                }
            }
        }

        match fastest {
            Some((idx, _)) => idx,
            None => {
                let all: Vec<usize> = (0..candidates.len()).collect();
                pick_uniform(&all).unwrap_or(0)
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "fastest_response"
    }
}
