//! Load-balancing strategies
//!
//! Pure selection over an in-memory candidate list. The only state kept
//! between calls is the round-robin cursor, owned by each [`LoadBalancer`].

mod random;
mod ranked;
mod round_robin;

pub use random::{RandomSelector, WeightedRandomSelector};
pub use ranked::{BestReputationSelector, FastestResponseSelector, LeastRecentlyUsedSelector};
pub use round_robin::RoundRobinSelector;

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::{PoolError, Result};
use crate::models::ProxyRecord;

/// Strategy used to pick one record from a filtered candidate list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "&'static str")]
pub enum Strategy {
    RoundRobin,
    LeastRecentlyUsed,
    WeightedRandom,
    BestReputation,
    FastestResponse,
    #[default]
    Random,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Self::RoundRobin,
        Self::LeastRecentlyUsed,
        Self::WeightedRandom,
        Self::BestReputation,
        Self::FastestResponse,
        Self::Random,
    ];

    /// Parse a strategy name, returning `None` when it is not recognised
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Some(Self::RoundRobin),
            "least_recently_used" | "leastrecentlyused" | "lru" => Some(Self::LeastRecentlyUsed),
            "weighted_random" | "weightedrandom" | "weighted" => Some(Self::WeightedRandom),
            "best_reputation" | "bestreputation" | "reputation" => Some(Self::BestReputation),
            "fastest_response" | "fastestresponse" | "fastest" => Some(Self::FastestResponse),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    /// Parse a strategy name; unknown names become `Random` with a warning
    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or_else(|| {
            warn!(strategy = %s, "Unknown selection strategy, falling back to random");
            Self::Random
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::LeastRecentlyUsed => "least_recently_used",
            Self::WeightedRandom => "weighted_random",
            Self::BestReputation => "best_reputation",
            Self::FastestResponse => "fastest_response",
            Self::Random => "random",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for Strategy {
    fn from(value: String) -> Self {
        Strategy::from_str(&value)
    }
}

impl From<Strategy> for &'static str {
    fn from(value: Strategy) -> Self {
        value.as_str()
    }
}

/// A selection algorithm over a non-empty candidate slice
pub trait Selector: Send + Sync {
    /// Pick the index of one candidate; `candidates` is never empty
    fn pick(&self, candidates: &[ProxyRecord]) -> usize;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Dispatches selection to the selector registered for each strategy.
///
/// Holds one selector per strategy, so a round-robin cursor is shared by
/// every caller of the same balancer but never across balancers.
pub struct LoadBalancer {
    round_robin: RoundRobinSelector,
    least_recently_used: LeastRecentlyUsedSelector,
    weighted_random: WeightedRandomSelector,
    best_reputation: BestReputationSelector,
    fastest_response: FastestResponseSelector,
    random: RandomSelector,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            round_robin: RoundRobinSelector::new(),
            least_recently_used: LeastRecentlyUsedSelector,
            weighted_random: WeightedRandomSelector,
            best_reputation: BestReputationSelector,
            fastest_response: FastestResponseSelector,
            random: RandomSelector,
        }
    }

    fn selector(&self, strategy: Strategy) -> &dyn Selector {
        match strategy {
            Strategy::RoundRobin => &self.round_robin,
            Strategy::LeastRecentlyUsed => &self.least_recently_used,
            Strategy::WeightedRandom => &self.weighted_random,
            Strategy::BestReputation => &self.best_reputation,
            Strategy::FastestResponse => &self.fastest_response,
            Strategy::Random => &self.random,
        }
    }

    /// Select one record from `candidates` using `strategy`
    ///
    /// Returns `NoProxyAvailable` if `candidates` is empty.
    pub fn select<'a>(
        &self,
        candidates: &'a [ProxyRecord],
        strategy: Strategy,
    ) -> Result<&'a ProxyRecord> {
        if candidates.is_empty() {
            return Err(PoolError::NoProxyAvailable);
        }

        let selector = self.selector(strategy);
        let idx = selector.pick(candidates);
        trace!(
            strategy = selector.strategy_name(),
            index = idx,
            candidates = candidates.len(),
            "Balancer pick"
        );
        candidates.get(idx).ok_or(PoolError::NoProxyAvailable)
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}
