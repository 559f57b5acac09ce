//! Per-operation proxy selection
//!
//! Loads the active pool from the store, applies the operation's policy and
//! hands the surviving candidates to the load balancer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::balancer::{LoadBalancer, Strategy};
use crate::config::SelectionConfig;
use crate::error::{PoolError, Result};
use crate::models::{OperationType, PolicyTable, ProxyConfig, ProxyRecord, SelectionPolicy};
use crate::repository::{ProxyFilter, ProxyStore};

/// Reputation change applied by an advisory success report
const REPORT_SUCCESS_DELTA: i16 = 1;
/// Reputation change applied by an advisory failure report
const REPORT_FAILURE_DELTA: i16 = -3;

/// A proxy handed out for one operation
#[derive(Debug, Clone, Serialize)]
pub struct Selection {
    pub proxy_id: i64,
    pub operation: OperationType,
    pub strategy: Strategy,
    pub config: ProxyConfig,
    /// Reputation floor the record was checked against
    pub min_reputation: u8,
    /// The policy floor left nothing and the relaxed floor was used
    pub relaxed: bool,
    /// The requested country was honoured
    pub country_matched: bool,
    #[serde(skip)]
    pub record: ProxyRecord,
}

/// Selection orchestrator
pub struct ProxyManager {
    store: Arc<dyn ProxyStore>,
    balancer: Arc<LoadBalancer>,
    policies: RwLock<PolicyTable>,
    selection: SelectionConfig,
}

impl ProxyManager {
    /// Create a manager; provider restriction without trusted providers is rejected
    pub fn new(
        store: Arc<dyn ProxyStore>,
        balancer: Arc<LoadBalancer>,
        policies: PolicyTable,
        selection: SelectionConfig,
    ) -> Result<Self> {
        if selection.provider_restriction && selection.trusted_providers.is_empty() {
            return Err(PoolError::Configuration(
                "provider restriction is enabled but no trusted providers are configured".into(),
            ));
        }

        Ok(Self {
            store,
            balancer,
            policies: RwLock::new(policies),
            selection,
        })
    }

    /// Pick a proxy for `operation`, preferring `country` when the policy asks for it
    pub async fn get_proxy_for_operation(
        &self,
        operation: OperationType,
        country: Option<&str>,
    ) -> Result<ProxyConfig> {
        self.select(operation, country).await.map(|s| s.config)
    }

    /// Full selection, including the record and how it was chosen
    #[instrument(skip(self), fields(operation = %operation))]
    pub async fn select(&self, operation: OperationType, country: Option<&str>) -> Result<Selection> {
        let policy = self.policy(operation);

        let filter = ProxyFilter {
            providers: self
                .selection
                .provider_restriction
                .then(|| self.selection.trusted_providers.clone()),
            protocols: Some(policy.allowed_protocols.clone()),
        };
        let pool = self.store.list_active(&filter).await?;

        if pool.is_empty() {
            debug!(
                restricted = self.selection.provider_restriction,
                "No active proxies of an allowed provider and protocol"
            );
            return Err(PoolError::NoProxyAvailable);
        }

        let mut min_reputation = policy.min_reputation;
        let mut candidates = eligible(&pool, &policy, min_reputation);
        let mut relaxed = false;

        if candidates.is_empty() {
            min_reputation = self.selection.relaxed_min_reputation.min(policy.min_reputation);
            candidates = eligible(&pool, &policy, min_reputation);
            relaxed = true;
            info!(
                floor = policy.min_reputation,
                relaxed_floor = min_reputation,
                found = candidates.len(),
                "No proxy met the reputation floor, retried with relaxed floor"
            );
        }

        if candidates.is_empty() {
            debug!("No proxy matched the operation policy");
            return Err(PoolError::NoProxyAvailable);
        }

        let mut country_matched = false;
        if let (true, Some(country)) = (policy.country_match_required, country) {
            let local: Vec<ProxyRecord> = candidates
                .iter()
                .filter(|r| {
                    r.country_code
                        .as_deref()
                        .is_some_and(|c| c.eq_ignore_ascii_case(country))
                })
                .cloned()
                .collect();

            if local.is_empty() {
                info!(
                    country = %country,
                    candidates = candidates.len(),
                    "No proxy in requested country, using wider pool"
                );
            } else {
                candidates = local;
                country_matched = true;
            }
        }

        let record = self.balancer.select(&candidates, policy.strategy)?.clone();
        self.touch(record.id);

        debug!(
            proxy_id = record.id,
            endpoint = %record.endpoint(),
            strategy = %policy.strategy,
            "Selected proxy"
        );

        Ok(Selection {
            proxy_id: record.id,
            operation,
            strategy: policy.strategy,
            config: record.to_config(),
            min_reputation,
            relaxed,
            country_matched,
            record,
        })
    }

    /// Record `last_used_at` without making the caller wait for it
    fn touch(&self, id: i64) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.touch_last_used(id, Utc::now()).await {
                warn!(proxy_id = id, error = %e, "Failed to record proxy use");
            }
        });
    }

    /// Advisory usage feedback from a calling operation.
    ///
    /// Only nudges reputation; failure streaks and deactivation stay with
    /// the health monitor.
    pub async fn report_outcome(&self, id: i64, success: bool) -> Result<ProxyRecord> {
        let delta = if success {
            REPORT_SUCCESS_DELTA
        } else {
            REPORT_FAILURE_DELTA
        };

        let updated = self
            .store
            .adjust_reputation(id, delta)
            .await?
            .ok_or(PoolError::ProxyNotFound { id })?;
        debug!(
            proxy_id = id,
            success,
            reputation = updated.reputation_score,
            "Recorded usage outcome"
        );
        Ok(updated)
    }

    /// Change the strategy used for one operation type
    pub fn set_strategy(&self, operation: OperationType, strategy_name: &str) -> Strategy {
        let strategy = Strategy::from_str(strategy_name);
        self.policies.write().set_strategy(operation, strategy);
        info!(operation = %operation, strategy = %strategy, "Selection strategy changed");
        strategy
    }

    pub fn policy(&self, operation: OperationType) -> SelectionPolicy {
        self.policies.read().get(operation)
    }

    pub fn policies(&self) -> PolicyTable {
        self.policies.read().clone()
    }

    /// Active proxies per country
    pub async fn country_counts(&self) -> Result<HashMap<String, i64>> {
        self.store.count_by_country().await
    }
}

/// Records allowed by the policy's protocol set at the given reputation floor
fn eligible(pool: &[ProxyRecord], policy: &SelectionPolicy, min_reputation: u8) -> Vec<ProxyRecord> {
    pool.iter()
        .filter(|r| r.is_active)
        .filter(|r| policy.allows(r.protocol_class))
        .filter(|r| r.reputation_score >= min_reputation)
        .cloned()
        .collect()
}
