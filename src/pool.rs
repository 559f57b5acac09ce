//! Engine entry point wiring selection, monitoring and rotation around one store

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::balancer::{LoadBalancer, Strategy};
use crate::config::{Config, HealthConfig, RotationConfig, SelectionConfig};
use crate::error::{PoolError, Result};
use crate::models::{HealthReport, OperationType, PolicyTable, ProxyConfig, ProxyRecord, RotationReport};
use crate::repository::ProxyStore;
use crate::services::{
    HealthMonitor, Prober, ProxyManager, ProxySource, RotationScheduler, Selection, ServiceHandle,
    SourceAggregator, TcpProber,
};

/// A proxy pool and the services that maintain it
pub struct ProxyPool {
    store: Arc<dyn ProxyStore>,
    manager: ProxyManager,
    health: Arc<HealthMonitor>,
    rotation: Arc<RotationScheduler>,
}

impl ProxyPool {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        prober: Arc<dyn Prober>,
        sources: Vec<Arc<dyn ProxySource>>,
        policies: PolicyTable,
        selection: SelectionConfig,
        health: HealthConfig,
        rotation: RotationConfig,
    ) -> Result<Self> {
        let aggregator = Arc::new(SourceAggregator::new(store.clone(), sources));
        Self::assemble(store, prober, aggregator, policies, selection, health, rotation)
    }

    /// Build the pool described by `config`: TCP probes, HTTP list sources
    /// and the default policies merged with the optional policy file
    pub fn from_config(store: Arc<dyn ProxyStore>, config: &Config) -> Result<Self> {
        let policies = load_policies(config.selection.policy_file.as_deref())?;
        let aggregator = Arc::new(SourceAggregator::from_config(store.clone(), &config.sources)?);

        info!(
            sources = aggregator.source_count(),
            restricted = config.selection.provider_restriction,
            "Building proxy pool"
        );

        Self::assemble(
            store,
            Arc::new(TcpProber),
            aggregator,
            policies,
            config.selection.clone(),
            config.health.clone(),
            config.rotation.clone(),
        )
    }

    fn assemble(
        store: Arc<dyn ProxyStore>,
        prober: Arc<dyn Prober>,
        aggregator: Arc<SourceAggregator>,
        policies: PolicyTable,
        selection: SelectionConfig,
        health: HealthConfig,
        rotation: RotationConfig,
    ) -> Result<Self> {
        let manager = ProxyManager::new(store.clone(), Arc::new(LoadBalancer::new()), policies, selection)?;
        let health = Arc::new(HealthMonitor::new(store.clone(), prober, health));
        let rotation = Arc::new(RotationScheduler::new(
            store.clone(),
            aggregator,
            health.clone(),
            rotation,
        ));

        Ok(Self {
            store,
            manager,
            health,
            rotation,
        })
    }

    /// Start the health, rotation and deep-purge loops
    pub fn spawn_background(&self, handle: &ServiceHandle) -> Vec<JoinHandle<()>> {
        let health = self.health.clone();
        let health_rx = handle.subscribe();
        let rotation = self.rotation.clone();
        let rotation_rx = handle.subscribe();
        let purge = self.rotation.clone();
        let purge_rx = handle.subscribe();

        vec![
            tokio::spawn(async move { health.run(health_rx).await }),
            tokio::spawn(async move { rotation.run(rotation_rx).await }),
            tokio::spawn(async move { purge.run_deep_purge(purge_rx).await }),
        ]
    }

    pub async fn get_proxy_for_operation(
        &self,
        operation: OperationType,
        country: Option<&str>,
    ) -> Result<ProxyConfig> {
        self.manager.get_proxy_for_operation(operation, country).await
    }

    pub async fn select(&self, operation: OperationType, country: Option<&str>) -> Result<Selection> {
        self.manager.select(operation, country).await
    }

    pub async fn report_outcome(&self, id: i64, success: bool) -> Result<ProxyRecord> {
        self.manager.report_outcome(id, success).await
    }

    pub fn set_strategy(&self, operation: OperationType, strategy_name: &str) -> Strategy {
        self.manager.set_strategy(operation, strategy_name)
    }

    pub fn health_report(&self) -> HealthReport {
        self.health.health_report()
    }

    pub fn unhealthy_ids(&self) -> Vec<i64> {
        self.health.unhealthy_ids()
    }

    pub async fn force_rotation_now(&self) -> Result<RotationReport> {
        self.rotation.force_rotation_now().await
    }

    pub fn policies(&self) -> PolicyTable {
        self.manager.policies()
    }

    pub async fn country_counts(&self) -> Result<HashMap<String, i64>> {
        self.manager.country_counts().await
    }

    pub fn manager(&self) -> &ProxyManager {
        &self.manager
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn rotation(&self) -> &RotationScheduler {
        &self.rotation
    }

    pub fn store(&self) -> &Arc<dyn ProxyStore> {
        &self.store
    }
}

/// Default policies, merged with the JSON file at `path` when given
pub fn load_policies(path: Option<&str>) -> Result<PolicyTable> {
    let Some(path) = path else {
        return Ok(PolicyTable::default());
    };

    let raw = std::fs::read_to_string(path)
        .map_err(|e| PoolError::Configuration(format!("cannot read policy file {}: {}", path, e)))?;
    let table = PolicyTable::from_json(&raw)?;
    info!(path, "Loaded selection policy overrides");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{test_record, ProbeOutcome};
    use crate::repository::MemoryProxyStore;
    use async_trait::async_trait;
    use std::io::Write;
    use std::time::Duration;

    struct AlwaysUp;

    #[async_trait]
    impl Prober for AlwaysUp {
        async fn probe(&self, _address: &str, _port: u16) -> ProbeOutcome {
            ProbeOutcome::Reachable {
                latency: Duration::from_millis(80),
            }
        }
    }

    fn pool(store: Arc<MemoryProxyStore>) -> ProxyPool {
        ProxyPool::new(
            store,
            Arc::new(AlwaysUp),
            Vec::new(),
            PolicyTable::default(),
            SelectionConfig::default(),
            HealthConfig::default(),
            RotationConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_select_report_and_sweep() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 80));
        let pool = pool(store);

        let selection = pool.select(OperationType::Login, Some("US")).await.unwrap();
        assert_eq!(selection.proxy_id, 1);

        let record = pool.report_outcome(selection.proxy_id, false).await.unwrap();
        assert_eq!(record.reputation_score, 77);

        pool.health().sweep().await.unwrap();
        assert_eq!(pool.health_report().summary.healthy, 1);
        assert!(pool.unhealthy_ids().is_empty());

        assert!(!pool.force_rotation_now().await.unwrap().is_skipped());
        assert_eq!(pool.rotation().status().total_runs, 1);
    }

    #[tokio::test]
    async fn test_background_loops_stop_on_shutdown() {
        let pool = pool(Arc::new(MemoryProxyStore::new()));
        let (handle, _rx) = ServiceHandle::new();

        let tasks = pool.spawn_background(&handle);
        assert_eq!(tasks.len(), 3);

        handle.shutdown();
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[test]
    fn test_load_policies_defaults_without_file() {
        let table = load_policies(None).unwrap();
        assert_eq!(table.get(OperationType::Login).min_reputation, 60);
    }

    #[test]
    fn test_load_policies_from_file() {
        let path = std::env::temp_dir().join(format!("relaypool-policies-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"login": {{"strategy": "round_robin", "min_reputation": 10}}}}"#).unwrap();
        drop(file);

        let table = load_policies(path.to_str()).unwrap();
        std::fs::remove_file(&path).unwrap();

        let login = table.get(OperationType::Login);
        assert_eq!(login.strategy, Strategy::RoundRobin);
        assert_eq!(login.min_reputation, 10);
        assert_eq!(table.get(OperationType::Testing).min_reputation, 0);
    }

    #[test]
    fn test_load_policies_missing_file_is_configuration_error() {
        let result = load_policies(Some("/nonexistent/relaypool/policies.json"));
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }
}
