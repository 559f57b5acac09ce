use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ProxyRecord;

/// Result of a single reachability probe
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Reachable { latency: Duration },
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable { .. })
    }
}

/// Bookkeeping from one probe, written to the store in a single update.
///
/// The streak and reputation are applied relative to the stored values, so
/// concurrent writers never overwrite each other's counts.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeUpdate {
    pub reachable: bool,
    /// Rolling-window success fraction
    pub success_rate: f64,
    /// Mean latency over the window in seconds; `None` keeps the stored value
    pub response_time_avg: Option<f64>,
    pub reputation_delta: i16,
    pub max_consecutive_failures: u32,
    /// Reason of the failed probe, used in the deactivation message
    pub failure_reason: Option<String>,
}

impl ProbeUpdate {
    /// Apply to a record exactly as the stores do
    pub fn apply_to(&self, record: &mut ProxyRecord) {
        record.success_rate = self.success_rate;
        if self.response_time_avg.is_some() {
            record.response_time_avg = self.response_time_avg;
        }
        record.adjust_reputation(self.reputation_delta);

        if self.reachable {
            record.consecutive_failures = 0;
            return;
        }

        record.consecutive_failures += 1;
        if record.consecutive_failures >= self.max_consecutive_failures {
            record.deactivate(deactivation_reason(
                record.consecutive_failures,
                self.failure_reason.as_deref().unwrap_or(UNREACHABLE),
            ));
        }
    }
}

/// Fallback failure reason when a probe carries none
pub const UNREACHABLE: &str = "unreachable";

pub fn deactivation_reason(failures: u32, last_error: &str) -> String {
    format!("{} consecutive probe failures (last: {})", failures, last_error)
}

/// Current health state of a record as seen by the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Deactivated,
}

/// Per-record health entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyHealth {
    pub proxy_id: i64,
    pub endpoint: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub success_rate: f64,
    pub reputation_score: u8,
    pub response_time_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub last_checked: DateTime<Utc>,
}

/// Aggregate health numbers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub checked: usize,
    pub healthy: usize,
    pub unhealthy: usize,
    pub deactivated: usize,
    pub average_success_rate: f64,
}

impl HealthSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ProxyHealth>) -> Self {
        let mut summary = HealthSummary::default();
        let mut rate_sum = 0.0;

        for entry in entries {
            summary.checked += 1;
            rate_sum += entry.success_rate;
            match entry.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Deactivated => {
                    summary.unhealthy += 1;
                    summary.deactivated += 1;
                }
            }
        }

        if summary.checked > 0 {
            summary.average_success_rate = rate_sum / summary.checked as f64;
        }
        summary
    }
}

/// Health report served to the admin layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub generated_at: DateTime<Utc>,
    pub last_sweep_at: Option<DateTime<Utc>>,
    pub summary: HealthSummary,
    pub proxies: Vec<ProxyHealth>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_record;

    fn failure(max: u32) -> ProbeUpdate {
        ProbeUpdate {
            reachable: false,
            success_rate: 0.0,
            response_time_avg: None,
            reputation_delta: -10,
            max_consecutive_failures: max,
            failure_reason: Some("connection refused".to_string()),
        }
    }

    #[test]
    fn test_failed_check_counts_from_stored_streak() {
        let mut record = test_record(1, 50);
        record.consecutive_failures = 2;
        record.response_time_avg = Some(0.2);

        failure(3).apply_to(&mut record);
        assert!(!record.is_active);
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.reputation_score, 40);
        assert_eq!(record.response_time_avg, Some(0.2));
        assert_eq!(
            record.deactivation_reason.as_deref(),
            Some("3 consecutive probe failures (last: connection refused)")
        );

        let mut record = test_record(2, 99);
        record.consecutive_failures = 2;
        ProbeUpdate {
            reachable: true,
            success_rate: 0.5,
            response_time_avg: Some(0.1),
            reputation_delta: 2,
            max_consecutive_failures: 3,
            failure_reason: None,
        }
        .apply_to(&mut record);
        assert!(record.is_active);
        assert_eq!(record.consecutive_failures, 0);
        assert_eq!(record.reputation_score, 100);
        assert_eq!(record.success_rate, 0.5);
    }

    fn entry(id: i64, status: HealthStatus, success_rate: f64) -> ProxyHealth {
        ProxyHealth {
            proxy_id: id,
            endpoint: format!("10.0.0.{}:8080", id),
            status,
            consecutive_failures: 0,
            success_rate,
            reputation_score: 50,
            response_time_avg: None,
            last_error: None,
            last_checked: Utc::now(),
        }
    }

    #[test]
    fn test_summary_counts_and_average() {
        let entries = vec![
            entry(1, HealthStatus::Healthy, 1.0),
            entry(2, HealthStatus::Unhealthy, 0.5),
            entry(3, HealthStatus::Deactivated, 0.0),
        ];
        let summary = HealthSummary::from_entries(&entries);

        assert_eq!(summary.checked, 3);
        assert_eq!(summary.healthy, 1);
        assert_eq!(summary.unhealthy, 2);
        assert_eq!(summary.deactivated, 1);
        assert!((summary.average_success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_summary_of_nothing_is_zero() {
        let summary = HealthSummary::from_entries(&[]);
        assert_eq!(summary, HealthSummary::default());
    }
}
