//! The four durable workflow definitions: single compilation, batch,
//! cache warming, and source health monitoring.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use filtrex_model::api::{
    BatchCompileItem, BatchCompileResponse, BatchItemResult, CompileRequest, CompileResponse,
    MAX_BATCH_ITEMS, PreviousVersion,
};
use filtrex_model::config::{FilterListConfig, SourceConfig};
use filtrex_model::health::HealthStatus;
use filtrex_model::workflow::{RetryPolicy, StepConfig, WorkflowInstance};

use crate::analytics::AnalyticsSink;
use crate::download::{DownloadOutcome, Downloader};
use crate::error::{CompilerError, Result};
use crate::metrics::{MetricsRecorder, RequestOutcome};
use crate::pipeline::{NullEventSink, PipelineEngine};
use crate::result_cache::{ResultCache, config_fingerprint};
use crate::snapshot::SnapshotTracker;
use crate::trace::TraceContext;
use crate::workflow::WorkflowEngine;

/// Concurrent items per batch / warming chunk.
pub const CHUNK_SIZE: usize = 3;

/// Default pause between cache-warming chunks, to avoid stampeding
/// upstreams.
pub const WARMING_PAUSE: Duration = Duration::from_secs(10);

fn quick_step() -> StepConfig {
    StepConfig {
        retries: RetryPolicy::none(),
        timeout_ms: 10_000,
    }
}

fn compile_step() -> StepConfig {
    StepConfig {
        // The downloader retries transient failures itself; one extra
        // attempt at the step level covers storage hiccups.
        retries: RetryPolicy {
            limit: 1,
            delay_ms: 1_000,
            backoff: filtrex_model::workflow::BackoffKind::Exponential,
        },
        timeout_ms: 300_000,
    }
}

/// Single compilation: `validate`, `compile-sources`, `cache-result`,
/// `update-metrics`.
pub struct CompilationWorkflow {
    engine: WorkflowEngine,
    pipeline: Arc<PipelineEngine>,
    result_cache: Arc<ResultCache>,
    metrics: Arc<MetricsRecorder>,
}

impl std::fmt::Debug for CompilationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationWorkflow").finish()
    }
}

impl CompilationWorkflow {
    pub fn new(
        engine: WorkflowEngine,
        pipeline: Arc<PipelineEngine>,
        result_cache: Arc<ResultCache>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            engine,
            pipeline,
            result_cache,
            metrics,
        }
    }

    pub async fn execute(
        &self,
        instance: WorkflowInstance,
        request: &CompileRequest,
        cancel: CancellationToken,
    ) -> Result<CompileResponse> {
        let ctx = self.engine.ctx(instance, cancel.clone());
        ctx.start().await?;

        ctx.step("validate", &quick_step(), || async move {
            request
                .configuration
                .validate()
                .map_err(|err| CompilerError::Configuration(err.to_string()))?;
            Ok(true)
        })
        .await?;
        ctx.progress(10, "configuration validated").await;

        let result = ctx
            .step("compile-sources", &compile_step(), || {
                let cancel = cancel.clone();
                async move {
                    self.pipeline
                        .compile(
                            &request.configuration,
                            &request.pre_fetched_content,
                            &TraceContext::recording(),
                            &NullEventSink,
                            &cancel,
                        )
                        .await
                }
            })
            .await?;
        ctx.progress(70, "sources compiled").await;

        // Pre-fetched bodies make the result non-representative; skip the
        // shared cache for those.
        let cacheable = request.pre_fetched_content.is_empty();
        let previous: Option<PreviousVersion> = ctx
            .step("cache-result", &quick_step(), || {
                let result = result.clone();
                async move {
                    if !cacheable {
                        return Ok(None);
                    }
                    let fingerprint = config_fingerprint(&request.configuration);
                    Ok(self.result_cache.store(&fingerprint, &result).await)
                }
            })
            .await?;
        ctx.progress(90, "result cached").await;

        ctx.step("update-metrics", &quick_step(), || {
            let duration = Duration::from_millis(result.metrics.total_duration_ms);
            async move {
                self.metrics
                    .record("workflow:compilation", RequestOutcome::Success, duration);
                Ok(true)
            }
        })
        .await?;

        ctx.progress(100, "complete").await;
        ctx.complete().await?;

        let mut result = result;
        result.previous_version = previous;
        Ok(CompileResponse::from_result(result, request.benchmark))
    }
}

/// Many compilations in chunks of [`CHUNK_SIZE`]; per-item failures never
/// abort siblings, and a final step aggregates.
pub struct BatchWorkflow {
    engine: WorkflowEngine,
    pipeline: Arc<PipelineEngine>,
    result_cache: Arc<ResultCache>,
}

impl std::fmt::Debug for BatchWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWorkflow").finish()
    }
}

impl BatchWorkflow {
    pub fn new(
        engine: WorkflowEngine,
        pipeline: Arc<PipelineEngine>,
        result_cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            engine,
            pipeline,
            result_cache,
        }
    }

    /// Reject malformed batches before any work starts.
    pub fn validate_batch(items: &[BatchCompileItem]) -> Result<()> {
        if items.is_empty() {
            return Err(CompilerError::Configuration(
                "batch must contain at least one request".to_string(),
            ));
        }
        if items.len() > MAX_BATCH_ITEMS {
            return Err(CompilerError::Configuration(format!(
                "batch exceeds {MAX_BATCH_ITEMS} items"
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for item in items {
            if !seen.insert(item.id.as_str()) {
                return Err(CompilerError::Configuration(format!(
                    "duplicate batch id '{}'",
                    item.id
                )));
            }
        }
        Ok(())
    }

    pub async fn execute(
        &self,
        instance: WorkflowInstance,
        items: &[BatchCompileItem],
        cancel: CancellationToken,
    ) -> Result<BatchCompileResponse> {
        let ctx = self.engine.ctx(instance, cancel.clone());
        ctx.start().await?;

        ctx.step("validate", &quick_step(), || async move {
            Self::validate_batch(items)?;
            Ok(true)
        })
        .await?;

        let chunks: Vec<&[BatchCompileItem]> = items.chunks(CHUNK_SIZE).collect();
        let total_chunks = chunks.len();
        let mut chunk_results: Vec<Vec<BatchItemResult>> = Vec::with_capacity(total_chunks);

        for (index, chunk) in chunks.into_iter().enumerate() {
            let results = ctx
                .step(&format!("chunk-{index}"), &compile_step(), || {
                    let cancel = cancel.clone();
                    async move {
                        let compiled = futures::future::join_all(
                            chunk.iter().map(|item| self.compile_item(item, &cancel)),
                        )
                        .await;
                        Ok(compiled)
                    }
                })
                .await?;
            chunk_results.push(results);

            let percent = (((index + 1) * 90) / total_chunks.max(1)) as u8;
            ctx.progress(percent, format!("chunk {} of {total_chunks}", index + 1))
                .await;
        }

        let response = ctx
            .step("aggregate", &quick_step(), || {
                let results: Vec<BatchItemResult> =
                    chunk_results.iter().flatten().cloned().collect();
                async move {
                    Ok(BatchCompileResponse {
                        success: true,
                        results,
                    })
                }
            })
            .await?;

        ctx.progress(100, "complete").await;
        ctx.complete().await?;
        Ok(response)
    }

    /// Compile one batch item; failures become per-item error entries.
    async fn compile_item(
        &self,
        item: &BatchCompileItem,
        cancel: &CancellationToken,
    ) -> BatchItemResult {
        let outcome = self
            .pipeline
            .compile(
                &item.request.configuration,
                &item.request.pre_fetched_content,
                &TraceContext::recording(),
                &NullEventSink,
                cancel,
            )
            .await;

        let response = match outcome {
            Ok(mut result) => {
                if item.request.pre_fetched_content.is_empty() {
                    let fingerprint = config_fingerprint(&item.request.configuration);
                    result.previous_version =
                        self.result_cache.store(&fingerprint, &result).await;
                }
                CompileResponse::from_result(result, item.request.benchmark)
            }
            Err(err) => CompileResponse::failure(err.to_string()),
        };

        BatchItemResult {
            id: item.id.clone(),
            response,
        }
    }
}

/// Recompute a configured set of popular configurations in chunks, pausing
/// between chunks.
pub struct CacheWarmingWorkflow {
    engine: WorkflowEngine,
    pipeline: Arc<PipelineEngine>,
    result_cache: Arc<ResultCache>,
    pause: Duration,
}

impl std::fmt::Debug for CacheWarmingWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmingWorkflow")
            .field("pause", &self.pause)
            .finish()
    }
}

impl CacheWarmingWorkflow {
    pub fn new(
        engine: WorkflowEngine,
        pipeline: Arc<PipelineEngine>,
        result_cache: Arc<ResultCache>,
    ) -> Self {
        Self {
            engine,
            pipeline,
            result_cache,
            pause: WARMING_PAUSE,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Returns how many configurations were successfully recomputed.
    pub async fn execute(
        &self,
        instance: WorkflowInstance,
        configs: &[FilterListConfig],
        cancel: CancellationToken,
    ) -> Result<usize> {
        let ctx = self.engine.ctx(instance, cancel.clone());
        ctx.start().await?;

        let chunks: Vec<&[FilterListConfig]> = configs.chunks(CHUNK_SIZE).collect();
        let total_chunks = chunks.len();
        let mut warmed = 0usize;

        for (index, chunk) in chunks.into_iter().enumerate() {
            let count = ctx
                .step(&format!("warm-chunk-{index}"), &compile_step(), || {
                    let cancel = cancel.clone();
                    async move {
                        let mut warmed = 0usize;
                        for config in chunk {
                            match self
                                .pipeline
                                .compile(
                                    config,
                                    &Default::default(),
                                    &TraceContext::noop(),
                                    &NullEventSink,
                                    &cancel,
                                )
                                .await
                            {
                                Ok(result) => {
                                    let fingerprint = config_fingerprint(config);
                                    self.result_cache.store(&fingerprint, &result).await;
                                    warmed += 1;
                                }
                                Err(err) => {
                                    // Warming is best-effort per config.
                                    info!(name = %config.name, error = %err, "cache warming skipped config");
                                }
                            }
                        }
                        Ok(warmed)
                    }
                })
                .await?;
            warmed += count;

            let percent = (((index + 1) * 100) / total_chunks.max(1)) as u8;
            ctx.progress(percent, format!("warmed chunk {} of {total_chunks}", index + 1))
                .await;

            if index + 1 < total_chunks {
                ctx.sleep(&format!("pause-{index}"), self.pause).await?;
            }
        }

        ctx.complete().await?;
        Ok(warmed)
    }
}

/// Per-source outcome of one health-monitoring run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealthSummary {
    pub source_id: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub alerted: bool,
}

/// Poll each configured source, classify its health, and raise an alert
/// once the consecutive-failure threshold is crossed.
pub struct HealthMonitoringWorkflow {
    engine: WorkflowEngine,
    downloader: Arc<Downloader>,
    tracker: SnapshotTracker,
    analytics: Arc<dyn AnalyticsSink>,
    alert_threshold: u32,
    alert_on_failure: bool,
}

impl std::fmt::Debug for HealthMonitoringWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitoringWorkflow")
            .field("alert_threshold", &self.alert_threshold)
            .finish()
    }
}

impl HealthMonitoringWorkflow {
    pub fn new(
        engine: WorkflowEngine,
        downloader: Arc<Downloader>,
        tracker: SnapshotTracker,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            engine,
            downloader,
            tracker,
            analytics,
            alert_threshold: 3,
            alert_on_failure: true,
        }
    }

    pub fn with_alerting(mut self, enabled: bool, threshold: u32) -> Self {
        self.alert_on_failure = enabled;
        self.alert_threshold = threshold;
        self
    }

    pub async fn execute(
        &self,
        instance: WorkflowInstance,
        sources: &[SourceConfig],
        cancel: CancellationToken,
    ) -> Result<Vec<SourceHealthSummary>> {
        let ctx = self.engine.ctx(instance, cancel);
        ctx.start().await?;
        let total = sources.len().max(1);
        let mut summaries = Vec::with_capacity(sources.len());

        for (index, source) in sources.iter().enumerate() {
            let summary = ctx
                .step(&format!("check-{}", source.id()), &compile_step(), || async move {
                    Ok(self.check_source(source).await)
                })
                .await?;
            summaries.push(summary);

            let percent = (((index + 1) * 100) / total) as u8;
            ctx.progress(percent, format!("checked {}", source.id())).await;
        }

        ctx.complete().await?;
        Ok(summaries)
    }

    async fn check_source(&self, source: &SourceConfig) -> SourceHealthSummary {
        let trace = TraceContext::noop();
        let outcome = self.downloader.download(source, None, &trace).await;
        match outcome {
            Ok(DownloadOutcome::Fetched(fetched)) => {
                self.tracker
                    .record_success(source.id(), &fetched.body, fetched.etag.as_deref())
                    .await;
            }
            Ok(DownloadOutcome::Unchanged) => {
                self.tracker.record_unchanged(source.id()).await;
            }
            Err(_) => {
                self.tracker.record_failure(source.id()).await;
            }
        }

        let record = self
            .tracker
            .health(source.id())
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| filtrex_model::health::SourceHealthRecord::new(source.id()));

        let alerted = self.alert_on_failure
            && record.consecutive_failures >= self.alert_threshold
            // One alert per run: only when the threshold was crossed by
            // this attempt.
            && record.consecutive_failures == self.alert_threshold;
        if alerted {
            self.analytics.record(
                "source:alert",
                json!({
                    "sourceId": record.source_id,
                    "consecutiveFailures": record.consecutive_failures,
                    "status": record.status,
                }),
            );
        }

        SourceHealthSummary {
            source_id: record.source_id.clone(),
            status: record.status,
            consecutive_failures: record.consecutive_failures,
            alerted,
        }
    }
}
