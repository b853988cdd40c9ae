//! Durable stepwise execution.
//!
//! Workflows persist every step's attempts and output in the key-value
//! store; on restart, a step with a recorded output is replayed by
//! returning the stored output without re-executing its body. Step
//! persistence happens-before the step's declared completion, so a step is
//! never observed complete unless its output is durable.

pub mod runs;

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use filtrex_model::workflow::{
    StepConfig, StepRecord, WorkflowEvent, WorkflowEventRecord, WorkflowInstance, WorkflowKind,
    WorkflowStatus,
};

use crate::error::{CompilerError, Result};
use crate::kv::Kv;

const DEFAULT_EVENT_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_MAX_EVENTS: usize = 100;
/// How long terminal instances stay queryable.
const DEFAULT_INSTANCE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

fn instance_key(instance_id: Uuid) -> String {
    format!("workflow/instances/{instance_id}")
}

fn events_key(instance_id: Uuid) -> String {
    format!("workflow/events/{instance_id}")
}

#[derive(Debug, Clone)]
pub struct WorkflowEngine {
    kv: Kv,
    event_ttl: Duration,
    max_events: usize,
    instance_retention: Duration,
}

impl WorkflowEngine {
    pub fn new(kv: Kv) -> Self {
        Self {
            kv,
            event_ttl: DEFAULT_EVENT_TTL,
            max_events: DEFAULT_MAX_EVENTS,
            instance_retention: DEFAULT_INSTANCE_RETENTION,
        }
    }

    pub fn with_event_retention(mut self, ttl: Duration, max_events: usize) -> Self {
        self.event_ttl = ttl;
        self.max_events = max_events;
        self
    }

    /// Create and persist a queued instance.
    pub async fn create(&self, kind: WorkflowKind, params: Value) -> Result<WorkflowInstance> {
        let instance = WorkflowInstance::new(kind, params);
        self.persist(&instance).await?;
        Ok(instance)
    }

    pub async fn load(&self, instance_id: Uuid) -> Result<Option<WorkflowInstance>> {
        self.kv.get_json(&instance_key(instance_id)).await
    }

    pub async fn events(&self, instance_id: Uuid) -> Result<Vec<WorkflowEventRecord>> {
        Ok(self
            .kv
            .get_json(&events_key(instance_id))
            .await?
            .unwrap_or_default())
    }

    /// Resume handle for an instance: replayed steps come from its log.
    pub fn ctx(&self, instance: WorkflowInstance, cancel: CancellationToken) -> WorkflowCtx {
        WorkflowCtx {
            engine: self.clone(),
            instance_id: instance.instance_id,
            instance: Mutex::new(instance),
            cancel,
        }
    }

    async fn persist(&self, instance: &WorkflowInstance) -> Result<()> {
        let ttl = instance
            .status
            .is_terminal()
            .then_some(self.instance_retention);
        self.kv
            .put_json(&instance_key(instance.instance_id), instance, ttl)
            .await
    }

    /// Append to the bounded event log. Read-modify-write and deliberately
    /// not linearizable: concurrent emitters may lose events, which is
    /// acceptable for progress tracking.
    pub async fn emit(&self, instance_id: Uuid, event: WorkflowEvent) {
        let key = events_key(instance_id);
        let mut events: Vec<WorkflowEventRecord> = match self.kv.get_json(&key).await {
            Ok(events) => events.unwrap_or_default(),
            Err(err) => {
                warn!(%instance_id, error = %err, "failed to read workflow event log");
                Vec::new()
            }
        };
        events.push(WorkflowEventRecord {
            timestamp: Utc::now(),
            event,
        });
        if events.len() > self.max_events {
            let excess = events.len() - self.max_events;
            events.drain(..excess);
        }
        if let Err(err) = self
            .kv
            .put_json(&key, &events, Some(self.event_ttl))
            .await
        {
            warn!(%instance_id, error = %err, "failed to persist workflow event log");
        }
    }
}

/// Execution context for one workflow run.
pub struct WorkflowCtx {
    engine: WorkflowEngine,
    instance_id: Uuid,
    instance: Mutex<WorkflowInstance>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for WorkflowCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowCtx")
            .field("instance_id", &self.instance_id)
            .finish()
    }
}

impl WorkflowCtx {
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub async fn snapshot(&self) -> WorkflowInstance {
        self.instance.lock().await.clone()
    }

    /// Mark the workflow running and announce it.
    pub async fn start(&self) -> Result<()> {
        {
            let mut instance = self.instance.lock().await;
            if instance.status.is_terminal() {
                return Ok(());
            }
            let kind = instance.kind;
            instance.status = WorkflowStatus::Running;
            instance.updated_at = Utc::now();
            self.engine.persist(&instance).await?;
            self.engine
                .emit(self.instance_id, WorkflowEvent::WorkflowStarted { kind })
                .await;
        }
        Ok(())
    }

    /// Execute (or replay) one named step.
    ///
    /// The body runs under the step's timeout and retry budget. A recorded
    /// output short-circuits the body entirely.
    pub async fn step<T, F, Fut>(&self, name: &str, config: &StepConfig, body: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        // Cancellation is honored between steps, never mid-step.
        if self.cancel.is_cancelled() {
            self.terminate("cancelled before step").await;
            return Err(CompilerError::Cancelled);
        }

        // Replay: a step with durable output never re-executes. Outputs are
        // stored under a wrapper key so a recorded `null` value stays
        // distinguishable from "no output yet".
        {
            let instance = self.instance.lock().await;
            if let Some(record) = instance.step(name)
                && let Some(output) = &record.output
            {
                debug!(instance = %self.instance_id, step = name, "replaying recorded step output");
                let value = output.get("value").cloned().unwrap_or(Value::Null);
                return Ok(serde_json::from_value(value)?);
            }
        }

        {
            let mut instance = self.instance.lock().await;
            instance.current_step = Some(name.to_string());
            if instance.step(name).is_none() {
                instance.steps.push(StepRecord {
                    name: name.to_string(),
                    started_at: Utc::now(),
                    completed_at: None,
                    attempts: 0,
                    output: None,
                    error: None,
                });
            }
            instance.updated_at = Utc::now();
            self.engine.persist(&instance).await?;
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            {
                let mut instance = self.instance.lock().await;
                if let Some(record) = instance.step_mut(name) {
                    record.attempts = attempt;
                }
                self.engine.persist(&instance).await?;
            }
            self.engine
                .emit(
                    self.instance_id,
                    WorkflowEvent::StepStarted {
                        step: name.to_string(),
                        attempt,
                    },
                )
                .await;

            let started = std::time::Instant::now();
            let outcome = match tokio::time::timeout(config.timeout(), body()).await {
                Ok(result) => result,
                Err(_) => Err(CompilerError::Workflow {
                    step: name.to_string(),
                    message: format!("step timed out after {:?}", config.timeout()),
                }),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(value) => {
                    let output = serde_json::json!({ "value": serde_json::to_value(&value)? });
                    // Durability happens-before completion: the output is
                    // persisted before the step reports success.
                    {
                        let mut instance = self.instance.lock().await;
                        if let Some(record) = instance.step_mut(name) {
                            record.completed_at = Some(Utc::now());
                            record.output = Some(output);
                            record.error = None;
                        }
                        instance.updated_at = Utc::now();
                        self.engine.persist(&instance).await?;
                    }
                    self.engine
                        .emit(
                            self.instance_id,
                            WorkflowEvent::StepCompleted {
                                step: name.to_string(),
                                duration_ms,
                            },
                        )
                        .await;
                    return Ok(value);
                }
                Err(err) => {
                    let will_retry = attempt <= config.retries.limit;
                    self.engine
                        .emit(
                            self.instance_id,
                            WorkflowEvent::StepFailed {
                                step: name.to_string(),
                                attempt,
                                error: err.to_string(),
                                will_retry,
                            },
                        )
                        .await;

                    if will_retry {
                        tokio::time::sleep(config.retries.delay_for(attempt)).await;
                        continue;
                    }

                    let message = err.to_string();
                    {
                        let mut instance = self.instance.lock().await;
                        if let Some(record) = instance.step_mut(name) {
                            record.error = Some(message.clone());
                        }
                        instance.status = WorkflowStatus::Errored;
                        instance.updated_at = Utc::now();
                        if let Err(persist_err) = self.engine.persist(&instance).await {
                            warn!(error = %persist_err, "failed to persist errored workflow");
                        }
                    }
                    self.engine
                        .emit(
                            self.instance_id,
                            WorkflowEvent::WorkflowFailed {
                                error: message.clone(),
                            },
                        )
                        .await;
                    return Err(CompilerError::Workflow {
                        step: name.to_string(),
                        message,
                    });
                }
            }
        }
    }

    /// Durable pause: records the wake-at timestamp, so a restart resumes
    /// with only the remaining sleep.
    pub async fn sleep(&self, name: &str, duration: Duration) -> Result<()> {
        #[derive(Serialize, serde::Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct WakeAt {
            wake_at: chrono::DateTime<Utc>,
        }

        let wake_at = {
            let mut instance = self.instance.lock().await;
            match instance.step(name).and_then(|r| r.output.clone()) {
                Some(output) => serde_json::from_value::<WakeAt>(output)?.wake_at,
                None => {
                    let wake_at = Utc::now()
                        + chrono::TimeDelta::milliseconds(duration.as_millis() as i64);
                    instance.steps.push(StepRecord {
                        name: name.to_string(),
                        started_at: Utc::now(),
                        completed_at: None,
                        attempts: 1,
                        output: Some(serde_json::to_value(WakeAt { wake_at })?),
                        error: None,
                    });
                    instance.updated_at = Utc::now();
                    self.engine.persist(&instance).await?;
                    wake_at
                }
            }
        };

        let remaining = (wake_at - Utc::now()).to_std().unwrap_or_default();
        if !remaining.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.terminate("cancelled during sleep").await;
                    return Err(CompilerError::Cancelled);
                }
                _ = tokio::time::sleep(remaining) => {}
            }
        }

        let mut instance = self.instance.lock().await;
        if let Some(record) = instance.step_mut(name)
            && record.completed_at.is_none()
        {
            record.completed_at = Some(Utc::now());
            instance.updated_at = Utc::now();
            self.engine.persist(&instance).await?;
        }
        Ok(())
    }

    /// Report progress; the percentage is clamped monotonic.
    pub async fn progress(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        let percent = {
            let mut instance = self.instance.lock().await;
            if instance.status.is_terminal() {
                return;
            }
            let clamped = percent.min(100).max(instance.progress);
            instance.progress = clamped;
            instance.updated_at = Utc::now();
            if let Err(err) = self.engine.persist(&instance).await {
                warn!(error = %err, "failed to persist workflow progress");
            }
            clamped
        };
        self.engine
            .emit(
                self.instance_id,
                WorkflowEvent::Progress { percent, message },
            )
            .await;
    }

    /// Mark the workflow complete. Terminal statuses are immutable, so a
    /// replayed run that is already terminal stays untouched.
    pub async fn complete(&self) -> Result<()> {
        {
            let mut instance = self.instance.lock().await;
            if instance.status.is_terminal() {
                return Ok(());
            }
            instance.status = WorkflowStatus::Complete;
            instance.progress = 100;
            instance.current_step = None;
            instance.updated_at = Utc::now();
            self.engine.persist(&instance).await?;
        }
        self.engine
            .emit(self.instance_id, WorkflowEvent::WorkflowCompleted {})
            .await;
        Ok(())
    }

    async fn terminate(&self, reason: &str) {
        let mut instance = self.instance.lock().await;
        if instance.status.is_terminal() {
            return;
        }
        instance.status = WorkflowStatus::Terminated;
        instance.updated_at = Utc::now();
        if let Err(err) = self.engine.persist(&instance).await {
            warn!(error = %err, "failed to persist terminated workflow");
        }
        drop(instance);
        self.engine
            .emit(
                self.instance_id,
                WorkflowEvent::WorkflowFailed {
                    error: reason.to_string(),
                },
            )
            .await;
    }
}
