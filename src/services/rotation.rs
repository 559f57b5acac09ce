//! Daily pool rotation
//!
//! A rotation run cleans stale inactive records, refreshes the pool from the
//! configured sources and finishes with a health sweep. Runs never overlap;
//! a trigger that arrives while one is in progress is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::config::RotationConfig;
use crate::error::{PoolError, Result};
use crate::models::{
    HealthSummary, RotationReport, RotationRun, RotationState, RotationStatus, RotationTrigger,
};
use crate::repository::ProxyStore;

use super::health::HealthMonitor;
use super::sources::SourceAggregator;

/// Next `hour:00` UTC strictly after `now`
pub fn next_daily_boundary(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
    let today = now.date_naive().and_time(time).and_utc();
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

fn until(target: DateTime<Utc>) -> Duration {
    (target - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

/// Clears the running flag however the run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Rotation scheduler
pub struct RotationScheduler {
    store: Arc<dyn ProxyStore>,
    aggregator: Arc<SourceAggregator>,
    health: Arc<HealthMonitor>,
    config: RotationConfig,
    running: AtomicBool,
    last_rotation: RwLock<Option<DateTime<Utc>>>,
    total_runs: AtomicU64,
    successful_runs: AtomicU64,
    failed_runs: AtomicU64,
}

impl RotationScheduler {
    pub fn new(
        store: Arc<dyn ProxyStore>,
        aggregator: Arc<SourceAggregator>,
        health: Arc<HealthMonitor>,
        config: RotationConfig,
    ) -> Self {
        Self {
            store,
            aggregator,
            health,
            config,
            running: AtomicBool::new(false),
            last_rotation: RwLock::new(None),
            total_runs: AtomicU64::new(0),
            successful_runs: AtomicU64::new(0),
            failed_runs: AtomicU64::new(0),
        }
    }

    /// Rotate at every UTC midnight until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting rotation scheduler");

        loop {
            let next = next_daily_boundary(Utc::now(), 0);
            info!(next_rotation = %next, "Next rotation scheduled");

            tokio::select! {
                _ = tokio::time::sleep(until(next)) => {
                    self.rotate(RotationTrigger::Scheduled).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Rotation scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Purge long-unused inactive records once a day until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run_deep_purge(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting deep purge at {:02}:00 UTC ({} days)",
            self.config.deep_purge_hour_utc, self.config.deep_purge_after_days
        );

        loop {
            let next = next_daily_boundary(Utc::now(), self.config.deep_purge_hour_utc);

            tokio::select! {
                _ = tokio::time::sleep(until(next)) => {
                    if let Err(e) = self.deep_purge().await {
                        error!("Deep purge failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Deep purge shutting down");
                        break;
                    }
                }
            }
        }
    }

    pub async fn deep_purge(&self) -> Result<u64> {
        let deleted = self
            .store
            .cleanup_stale(self.config.deep_purge_after_days)
            .await?;
        info!(
            "Deep purge removed {} proxies unused for {} days",
            deleted, self.config.deep_purge_after_days
        );
        Ok(deleted)
    }

    /// Rotate immediately; skipped rather than queued if a run is in progress.
    ///
    /// The run is spawned, so dropping the returned future (a client
    /// disconnect or request timeout) does not cut it short.
    pub async fn force_rotation_now(self: &Arc<Self>) -> Result<RotationReport> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.rotate(RotationTrigger::Manual).await })
            .await
            .map_err(|e| PoolError::Internal(format!("rotation task failed: {}", e)))
    }

    async fn rotate(&self, trigger: RotationTrigger) -> RotationReport {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(?trigger, "Rotation already running, skipping");
            return RotationReport::Skipped {
                reason: "rotation already running".to_string(),
            };
        }
        let _guard = RunGuard(&self.running);

        let started_at = Utc::now();
        let mut errors = Vec::new();
        info!(?trigger, "Rotation started");

        let cleaned = match self.store.cleanup_stale(self.config.cleanup_after_days).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Rotation cleanup failed: {}", e);
                errors.push(format!("cleanup: {}", e));
                0
            }
        };

        let refresh = self.aggregator.refresh().await;

        let health = match self.health.sweep().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Rotation health sweep failed: {}", e);
                errors.push(format!("health sweep: {}", e));
                HealthSummary::default()
            }
        };

        let run = RotationRun {
            trigger,
            started_at,
            finished_at: Utc::now(),
            cleaned,
            refresh,
            health,
            errors,
        };

        self.total_runs.fetch_add(1, Ordering::Relaxed);
        if run.succeeded() {
            self.successful_runs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_runs.fetch_add(1, Ordering::Relaxed);
        }
        *self.last_rotation.write() = Some(run.finished_at);

        info!(
            cleaned = run.cleaned,
            inserted = run.refresh.inserted,
            updated = run.refresh.updated,
            healthy = run.health.healthy,
            errors = run.errors.len(),
            "Rotation finished"
        );
        RotationReport::Completed(run)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> RotationStatus {
        RotationStatus {
            state: if self.is_running() {
                RotationState::Running
            } else {
                RotationState::Idle
            },
            last_rotation: *self.last_rotation.read(),
            next_rotation: next_daily_boundary(Utc::now(), 0),
            total_runs: self.total_runs.load(Ordering::Relaxed),
            successful_runs: self.successful_runs.load(Ordering::Relaxed),
            failed_runs: self.failed_runs.load(Ordering::Relaxed),
        }
    }
}
