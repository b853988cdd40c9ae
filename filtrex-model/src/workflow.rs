//! Durable workflow records: instances, step logs, retry policies, and the
//! progress event stream.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowKind {
    Compilation,
    Batch,
    CacheWarming,
    HealthMonitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Queued,
    Running,
    Complete,
    Errored,
    Terminated,
}

impl WorkflowStatus {
    /// Terminal statuses are immutable; the engine refuses further writes.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Complete | WorkflowStatus::Errored | WorkflowStatus::Terminated
        )
    }
}

/// Durable log entry for one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    /// Recorded output; a step with an output is replayed, never re-run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Durable state of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub instance_id: Uuid,
    pub kind: WorkflowKind,
    pub params: Value,
    pub steps: Vec<StepRecord>,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Percent complete, monotonically non-decreasing.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowInstance {
    pub fn new(kind: WorkflowKind, params: Value) -> Self {
        let now = Utc::now();
        Self {
            instance_id: Uuid::new_v4(),
            kind,
            params,
            steps: Vec::new(),
            status: WorkflowStatus::Queued,
            current_step: None,
            progress: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|step| step.name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|step| step.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Constant,
    Linear,
    Exponential,
}

/// Per-step retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Number of retries after the first attempt.
    pub limit: u32,
    pub delay_ms: u64,
    pub backoff: BackoffKind,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 2,
            delay_ms: 1_000,
            backoff: BackoffKind::Exponential,
        }
    }
}

impl RetryPolicy {
    pub const fn none() -> Self {
        Self {
            limit: 0,
            delay_ms: 0,
            backoff: BackoffKind::Constant,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.delay_ms;
        let ms = match self.backoff {
            BackoffKind::Constant => base,
            BackoffKind::Linear => base.saturating_mul(retry as u64),
            BackoffKind::Exponential => {
                base.saturating_mul(1u64 << (retry.saturating_sub(1)).min(16))
            }
        };
        Duration::from_millis(ms)
    }
}

/// Retry budget plus a hard per-attempt timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepConfig {
    pub retries: RetryPolicy,
    pub timeout_ms: u64,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            retries: RetryPolicy::default(),
            timeout_ms: 60_000,
        }
    }
}

impl StepConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Progress event emitted while a workflow executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WorkflowEvent {
    #[serde(rename = "workflow:started", rename_all = "camelCase")]
    WorkflowStarted { kind: WorkflowKind },

    #[serde(rename = "step:started", rename_all = "camelCase")]
    StepStarted { step: String, attempt: u32 },

    #[serde(rename = "step:completed", rename_all = "camelCase")]
    StepCompleted { step: String, duration_ms: u64 },

    #[serde(rename = "step:failed", rename_all = "camelCase")]
    StepFailed {
        step: String,
        attempt: u32,
        error: String,
        will_retry: bool,
    },

    #[serde(rename = "workflow:progress", rename_all = "camelCase")]
    Progress { percent: u8, message: String },

    #[serde(rename = "workflow:completed")]
    WorkflowCompleted {},

    #[serde(rename = "workflow:failed", rename_all = "camelCase")]
    WorkflowFailed { error: String },
}

/// Persisted event-log entry under `workflow/events/<instance-id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!WorkflowStatus::Queued.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Complete.is_terminal());
        assert!(WorkflowStatus::Errored.is_terminal());
        assert!(WorkflowStatus::Terminated.is_terminal());
    }

    #[test]
    fn constant_backoff_is_flat() {
        let policy = RetryPolicy {
            limit: 3,
            delay_ms: 250,
            backoff: BackoffKind::Constant,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[test]
    fn linear_backoff_scales_with_attempt() {
        let policy = RetryPolicy {
            limit: 3,
            delay_ms: 100,
            backoff: BackoffKind::Linear,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn exponential_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
    }

    #[test]
    fn workflow_event_names_are_stable() {
        let event = WorkflowEvent::Progress {
            percent: 40,
            message: "compiling".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "workflow:progress");
        assert_eq!(value["percent"], 40);
    }
}
