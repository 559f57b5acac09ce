use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::HealthSummary;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationState {
    Idle,
    Running,
}

/// What started a rotation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationTrigger {
    Scheduled,
    Manual,
}

/// Per-source outcome of a refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub success: bool,
    pub fetched: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one refresh from all sources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Candidates that could not be written to the store
    pub rejected: usize,
    pub sources: Vec<SourceResult>,
}

impl RefreshSummary {
    pub fn failed_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| !s.success)
            .map(|s| s.source.as_str())
            .collect()
    }
}

/// Result of a rotation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RotationReport {
    Completed(RotationRun),
    /// Another run held the scheduler; nothing was done
    Skipped { reason: String },
}

impl RotationReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self, RotationReport::Skipped { .. })
    }
}

/// Details of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationRun {
    pub trigger: RotationTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cleaned: u64,
    pub refresh: RefreshSummary,
    pub health: HealthSummary,
    /// Step-level failures that were contained during the run
    pub errors: Vec<String>,
}

impl RotationRun {
    pub fn succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Observable scheduler status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationStatus {
    pub state: RotationState,
    pub last_rotation: Option<DateTime<Utc>>,
    pub next_rotation: DateTime<Utc>,
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
}
