//! Reachability monitoring for pooled proxies
//!
//! Periodically probes every active record, keeps a rolling window of
//! outcomes per record and deactivates records whose failure streak reaches
//! the configured limit. Probe failures are state, never errors.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::HealthConfig;
use crate::error::Result;
use crate::models::{
    HealthReport, HealthStatus, HealthSummary, ProbeOutcome, ProbeUpdate, ProxyHealth, ProxyRecord,
};
use crate::repository::{ProxyFilter, ProxyStore};

const PROBE_SUCCESS_DELTA: i16 = 2;
const PROBE_FAILURE_DELTA: i16 = -10;

/// Reachability check for a single endpoint
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, port: u16) -> ProbeOutcome;
}

/// Plain TCP connect; no protocol handshake
#[derive(Debug, Clone, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, port: u16) -> ProbeOutcome {
        let start = Instant::now();
        match TcpStream::connect((address, port)).await {
            Ok(_stream) => ProbeOutcome::Reachable {
                latency: start.elapsed(),
            },
            Err(e) => ProbeOutcome::Unreachable {
                reason: format!("connect failed: {}", e),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ProbeSample {
    reachable: bool,
    latency: Option<Duration>,
}

/// Health monitor
pub struct HealthMonitor {
    store: Arc<dyn ProxyStore>,
    prober: Arc<dyn Prober>,
    config: HealthConfig,
    limiter: Arc<Semaphore>,
    windows: DashMap<i64, VecDeque<ProbeSample>>,
    statuses: DashMap<i64, ProxyHealth>,
    last_sweep_at: RwLock<Option<DateTime<Utc>>>,
    sweep_lock: Mutex<()>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn ProxyStore>, prober: Arc<dyn Prober>, config: HealthConfig) -> Self {
        let permits = config.max_concurrent_probes.max(1);
        Self {
            store,
            prober,
            config,
            limiter: Arc::new(Semaphore::new(permits)),
            windows: DashMap::new(),
            statuses: DashMap::new(),
            last_sweep_at: RwLock::new(None),
            sweep_lock: Mutex::new(()),
        }
    }

    /// Run the monitor loop until shutdown (call in a spawned task)
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting health monitor with {}s interval",
            self.config.check_interval.as_secs()
        );

        let mut check_interval = interval(self.config.check_interval);
        check_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = check_interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Health sweep failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Health monitor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Probe every active record once.
    ///
    /// Only loading the active set can fail; individual probes and their
    /// bookkeeping writes are contained here. The monitor loop and rotation
    /// runs both sweep; a second caller waits for the running sweep to finish.
    pub async fn sweep(&self) -> Result<HealthSummary> {
        let _sweeping = self.sweep_lock.lock().await;
        let records = self.store.list_active(&ProxyFilter::default()).await?;
        info!("Checking health of {} proxies", records.len());

        let swept: HashSet<i64> = records.iter().map(|r| r.id).collect();
        let entries: Vec<ProxyHealth> =
            futures::future::join_all(records.into_iter().map(|record| self.check(record)))
                .await
                .into_iter()
                .flatten()
                .collect();

        // Forget records that left the active set by any path other than this monitor.
        self.windows.retain(|id, _| swept.contains(id));
        self.statuses
            .retain(|id, entry| swept.contains(id) || entry.status == HealthStatus::Deactivated);
        *self.last_sweep_at.write() = Some(Utc::now());

        let summary = HealthSummary::from_entries(&entries);
        info!(
            "Health sweep complete: {} healthy, {} unhealthy, {} deactivated",
            summary.healthy, summary.unhealthy, summary.deactivated
        );
        Ok(summary)
    }

    #[instrument(skip(self, record), fields(proxy_id = record.id, endpoint = %record.endpoint()))]
    async fn check(&self, record: ProxyRecord) -> Option<ProxyHealth> {
        let outcome = self.probe(&record).await;
        let update = self.fold_sample(record.id, &outcome);

        // Single relative write, so usage reports and touches made during the probe are kept.
        let fresh = match self.store.record_probe(record.id, &update).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                debug!("Record left the active set during probe");
                self.windows.remove(&record.id);
                return None;
            }
            Err(e) => {
                warn!("Failed to record probe outcome: {}", e);
                return None;
            }
        };

        let last_error = match &outcome {
            ProbeOutcome::Reachable { latency } => {
                debug!(latency_ms = latency.as_millis() as u64, "Proxy is reachable");
                None
            }
            ProbeOutcome::Unreachable { reason } => {
                if fresh.is_active {
                    debug!(failures = fresh.consecutive_failures, "Proxy is unreachable: {}", reason);
                } else {
                    warn!(failures = fresh.consecutive_failures, "Deactivated proxy: {}", reason);
                }
                Some(reason.clone())
            }
        };

        let status = if !fresh.is_active {
            HealthStatus::Deactivated
        } else if outcome.is_reachable() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        let entry = ProxyHealth {
            proxy_id: fresh.id,
            endpoint: fresh.endpoint(),
            status,
            consecutive_failures: fresh.consecutive_failures,
            success_rate: fresh.success_rate,
            reputation_score: fresh.reputation_score,
            response_time_avg: fresh.response_time_avg,
            last_error,
            last_checked: Utc::now(),
        };
        self.statuses.insert(fresh.id, entry.clone());
        Some(entry)
    }

    /// Probe under the concurrency limit with a hard timeout
    async fn probe(&self, record: &ProxyRecord) -> ProbeOutcome {
        let _permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return ProbeOutcome::Unreachable {
                    reason: "probe limiter closed".to_string(),
                }
            }
        };

        match timeout(
            self.config.probe_timeout,
            self.prober.probe(&record.address, record.port),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::Unreachable {
                reason: "connect timed out".to_string(),
            },
        }
    }

    /// Push one sample into the record's rolling window and build the store write
    fn fold_sample(&self, id: i64, outcome: &ProbeOutcome) -> ProbeUpdate {
        let sample = match outcome {
            ProbeOutcome::Reachable { latency } => ProbeSample {
                reachable: true,
                latency: Some(*latency),
            },
            ProbeOutcome::Unreachable { .. } => ProbeSample {
                reachable: false,
                latency: None,
            },
        };

        let window_size = self.config.window_size.max(1);
        let mut window = self.windows.entry(id).or_default();
        window.push_back(sample);
        while window.len() > window_size {
            window.pop_front();
        }

        let successes = window.iter().filter(|s| s.reachable).count();
        let success_rate = successes as f64 / window.len() as f64;

        let latencies: Vec<f64> = window
            .iter()
            .filter_map(|s| s.latency)
            .map(|l| l.as_secs_f64())
            .collect();
        let response_time_avg = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        let (reputation_delta, failure_reason) = match outcome {
            ProbeOutcome::Reachable { .. } => (PROBE_SUCCESS_DELTA, None),
            ProbeOutcome::Unreachable { reason } => (PROBE_FAILURE_DELTA, Some(reason.clone())),
        };

        ProbeUpdate {
            reachable: sample.reachable,
            success_rate,
            response_time_avg,
            reputation_delta,
            max_consecutive_failures: self.config.max_consecutive_failures,
            failure_reason,
        }
    }

    /// Latest known state of every monitored record
    pub fn health_report(&self) -> HealthReport {
        let mut proxies: Vec<ProxyHealth> = self.statuses.iter().map(|e| e.value().clone()).collect();
        proxies.sort_by_key(|p| p.proxy_id);

        HealthReport {
            generated_at: Utc::now(),
            last_sweep_at: *self.last_sweep_at.read(),
            summary: HealthSummary::from_entries(&proxies),
            proxies,
        }
    }

    /// Ids of records whose last probe failed, including ones just deactivated
    pub fn unhealthy_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .statuses
            .iter()
            .filter(|e| e.status != HealthStatus::Healthy)
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record;
    use crate::repository::MemoryProxyStore;
    use parking_lot::Mutex;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Reachability decided per address; unknown addresses are reachable
    #[derive(Default)]
    struct ScriptedProber {
        down: Mutex<HashMap<String, bool>>,
    }

    impl ScriptedProber {
        fn set_down(&self, address: &str, down: bool) {
            self.down.lock().insert(address.to_string(), down);
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, address: &str, _port: u16) -> ProbeOutcome {
            if self.down.lock().get(address).copied().unwrap_or(false) {
                ProbeOutcome::Unreachable {
                    reason: "connection refused".to_string(),
                }
            } else {
                ProbeOutcome::Reachable {
                    latency: Duration::from_millis(200),
                }
            }
        }
    }

    fn monitor(store: Arc<MemoryProxyStore>, prober: Arc<dyn Prober>) -> HealthMonitor {
        HealthMonitor::new(store, prober, HealthConfig::default())
    }

    #[tokio::test]
    async fn test_three_failures_deactivate() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 50));
        let prober = Arc::new(ScriptedProber::default());
        prober.set_down("10.0.0.1", true);
        let monitor = monitor(store.clone(), prober);

        monitor.sweep().await.unwrap();
        monitor.sweep().await.unwrap();
        let record = store.get(1).await.unwrap().unwrap();
        assert!(record.is_active);
        assert_eq!(record.consecutive_failures, 2);

        let summary = monitor.sweep().await.unwrap();
        assert_eq!(summary.deactivated, 1);

        let record = store.get(1).await.unwrap().unwrap();
        assert!(!record.is_active);
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.success_rate, 0.0);
        assert_eq!(record.reputation_score, 20);
        assert!(record
            .deactivation_reason
            .as_deref()
            .unwrap()
            .contains("connection refused"));

        // Deactivated records are no longer probed.
        let summary = monitor.sweep().await.unwrap();
        assert_eq!(summary.checked, 0);
        assert_eq!(store.get(1).await.unwrap().unwrap().consecutive_failures, 3);
    }

    #[tokio::test]
    async fn test_success_resets_streak() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 50));
        let prober = Arc::new(ScriptedProber::default());
        let monitor = monitor(store.clone(), prober.clone());

        prober.set_down("10.0.0.1", true);
        monitor.sweep().await.unwrap();
        monitor.sweep().await.unwrap();
        prober.set_down("10.0.0.1", false);
        monitor.sweep().await.unwrap();

        let record = store.get(1).await.unwrap().unwrap();
        assert!(record.is_active);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.reputation_score, 32);
        assert!((record.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((record.response_time_avg.unwrap() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_rolling_window_drops_old_samples() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 50));
        let prober = Arc::new(ScriptedProber::default());
        let config = HealthConfig {
            window_size: 4,
            max_consecutive_failures: 10,
            ..HealthConfig::default()
        };
        let monitor = HealthMonitor::new(store.clone(), prober.clone(), config);

        prober.set_down("10.0.0.1", true);
        for _ in 0..4 {
            monitor.sweep().await.unwrap();
        }
        prober.set_down("10.0.0.1", false);
        for _ in 0..3 {
            monitor.sweep().await.unwrap();
        }

        let record = store.get(1).await.unwrap().unwrap();
        assert!((record.success_rate - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_streak_limit_holds_for_random_sequences() {
        let store = Arc::new(MemoryProxyStore::new());
        for id in 1..=8 {
            store.put(test_record(id, 50));
        }
        let prober = Arc::new(ScriptedProber::default());
        let monitor = monitor(store.clone(), prober.clone());
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..30 {
            for id in 1..=8 {
                prober.set_down(&format!("10.0.0.{}", id), rng.gen_bool(0.5));
            }
            monitor.sweep().await.unwrap();

            for record in store.list_all().await.unwrap() {
                if record.consecutive_failures >= 3 {
                    assert!(!record.is_active);
                }
                assert!(record.reputation_score <= 100);
            }
        }
    }

    struct HangingProber;

    #[async_trait]
    impl Prober for HangingProber {
        async fn probe(&self, _address: &str, _port: u16) -> ProbeOutcome {
            tokio::time::sleep(Duration::from_secs(30)).await;
            ProbeOutcome::Reachable {
                latency: Duration::from_secs(30),
            }
        }
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_failure() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 50));
        let config = HealthConfig {
            probe_timeout: Duration::from_millis(20),
            ..HealthConfig::default()
        };
        let monitor = HealthMonitor::new(store.clone(), Arc::new(HangingProber), config);

        let summary = monitor.sweep().await.unwrap();
        assert_eq!(summary.unhealthy, 1);

        let report = monitor.health_report();
        assert_eq!(report.proxies[0].last_error.as_deref(), Some("connect timed out"));
        assert_eq!(store.get(1).await.unwrap().unwrap().consecutive_failures, 1);
    }

    struct CountingProber {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        reachable: bool,
    }

    #[async_trait]
    impl Prober for CountingProber {
        async fn probe(&self, _address: &str, _port: u16) -> ProbeOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.reachable {
                ProbeOutcome::Reachable {
                    latency: Duration::from_millis(10),
                }
            } else {
                ProbeOutcome::Unreachable {
                    reason: "connection refused".to_string(),
                }
            }
        }
    }

    #[tokio::test]
    async fn test_probe_concurrency_is_bounded() {
        let store = Arc::new(MemoryProxyStore::new());
        for id in 1..=12 {
            store.put(test_record(id, 50));
        }
        let prober = Arc::new(CountingProber {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            reachable: true,
        });
        let config = HealthConfig {
            max_concurrent_probes: 3,
            ..HealthConfig::default()
        };
        let monitor = HealthMonitor::new(store, prober.clone(), config);

        let summary = monitor.sweep().await.unwrap();
        assert_eq!(summary.healthy, 12);
        assert!(prober.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_overlapping_sweeps_count_every_failure() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 50));
        let prober = Arc::new(CountingProber {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            reachable: false,
        });
        let config = HealthConfig {
            max_consecutive_failures: 5,
            ..HealthConfig::default()
        };
        let monitor = HealthMonitor::new(store.clone(), prober.clone(), config);

        let (a, b) = tokio::join!(monitor.sweep(), monitor.sweep());
        a.unwrap();
        b.unwrap();

        assert_eq!(prober.peak.load(Ordering::SeqCst), 1);
        let record = store.get(1).await.unwrap().unwrap();
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(record.reputation_score, 30);
        assert!(record.is_active);
    }

    /// Reports a usage outcome while the probe is in flight
    struct ReportingProber {
        store: Arc<MemoryProxyStore>,
    }

    #[async_trait]
    impl Prober for ReportingProber {
        async fn probe(&self, _address: &str, _port: u16) -> ProbeOutcome {
            self.store.adjust_reputation(1, -3).await.unwrap();
            ProbeOutcome::Unreachable {
                reason: "connection refused".to_string(),
            }
        }
    }

    #[tokio::test]
    async fn test_health_write_keeps_concurrent_reputation_change() {
        let store = Arc::new(MemoryProxyStore::new());
        let mut record = test_record(1, 50);
        record.consecutive_failures = 2;
        store.put(record);
        let monitor = monitor(
            store.clone(),
            Arc::new(ReportingProber {
                store: store.clone(),
            }),
        );

        let summary = monitor.sweep().await.unwrap();
        assert_eq!(summary.deactivated, 1);

        let record = store.get(1).await.unwrap().unwrap();
        assert!(!record.is_active);
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.reputation_score, 37);
        assert_eq!(monitor.unhealthy_ids(), vec![1]);
    }

    #[tokio::test]
    async fn test_report_and_unhealthy_ids() {
        let store = Arc::new(MemoryProxyStore::new());
        for id in 1..=3 {
            store.put(test_record(id, 50));
        }
        let prober = Arc::new(ScriptedProber::default());
        prober.set_down("10.0.0.2", true);
        let monitor = monitor(store, prober);

        assert!(monitor.health_report().last_sweep_at.is_none());
        monitor.sweep().await.unwrap();

        let report = monitor.health_report();
        assert!(report.last_sweep_at.is_some());
        assert_eq!(report.summary.checked, 3);
        assert_eq!(report.summary.healthy, 2);
        assert_eq!(report.summary.unhealthy, 1);
        assert!((report.summary.average_success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(monitor.unhealthy_ids(), vec![2]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let store = Arc::new(MemoryProxyStore::new());
        store.put(test_record(1, 50));
        let monitor = Arc::new(monitor(store, Arc::new(ScriptedProber::default())));
        let (tx, rx) = watch::channel(false);

        let task = {
            let monitor = monitor.clone();
            tokio::spawn(async move { monitor.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(monitor.health_report().summary.checked, 1);
    }
}
