//! Rolling per-source health classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcomes considered by the rolling success-rate window.
pub const HEALTH_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failure,
}

/// Rolling health record for one source, reclassified after every download
/// attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealthRecord {
    pub source_id: String,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub last_status: AttemptStatus,
    pub last_checked_at: DateTime<Utc>,
    /// Trailing attempt outcomes, oldest first, capped at [`HEALTH_WINDOW`].
    pub recent: Vec<bool>,
    pub status: HealthStatus,
}

impl SourceHealthRecord {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            consecutive_failures: 0,
            total_attempts: 0,
            total_successes: 0,
            last_status: AttemptStatus::Success,
            last_checked_at: Utc::now(),
            recent: Vec::new(),
            status: HealthStatus::Healthy,
        }
    }

    /// Fold one attempt outcome into the record and reclassify.
    pub fn record_attempt(&mut self, success: bool) {
        self.total_attempts += 1;
        if success {
            self.total_successes += 1;
            self.consecutive_failures = 0;
            self.last_status = AttemptStatus::Success;
        } else {
            self.consecutive_failures += 1;
            self.last_status = AttemptStatus::Failure;
        }
        self.last_checked_at = Utc::now();

        self.recent.push(success);
        if self.recent.len() > HEALTH_WINDOW {
            let excess = self.recent.len() - HEALTH_WINDOW;
            self.recent.drain(..excess);
        }

        self.status = self.classify();
    }

    /// Success rate in percent over the trailing window. An empty window
    /// counts as fully successful.
    pub fn success_rate(&self) -> f64 {
        if self.recent.is_empty() {
            return 100.0;
        }
        let successes = self.recent.iter().filter(|s| **s).count();
        100.0 * successes as f64 / self.recent.len() as f64
    }

    /// Classification thresholds:
    ///
    /// - Healthy: rate >= 95% and no consecutive failures
    /// - Degraded: rate in [80%, 95%) or 1-2 consecutive failures
    /// - Unhealthy: rate < 80% or >= 3 consecutive failures
    pub fn classify(&self) -> HealthStatus {
        let rate = self.success_rate();
        if rate < 80.0 || self.consecutive_failures >= 3 {
            HealthStatus::Unhealthy
        } else if rate < 95.0 || self.consecutive_failures >= 1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}
