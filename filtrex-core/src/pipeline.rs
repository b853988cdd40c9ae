//! The compilation pipeline: resolve sources, filter and transform each,
//! merge in declared order, then apply the global pass.
//!
//! Source resolution runs concurrently with bounded parallelism; everything
//! after the merge is sequential. The engine emits [`CompileEvent`]s through
//! an [`EventSink`] and honors a cooperative cancellation token at every
//! suspending boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::StreamExt;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use filtrex_model::api::{CompilationMetrics, CompilationResult, SourceMetrics};
use filtrex_model::config::{FilterListConfig, SourceConfig};
use filtrex_model::diagnostics::DiagnosticCategory;
use filtrex_model::events::CompileEvent;
use filtrex_model::transformation::TransformationKind;

use crate::download::cached::CachingDownloader;
use crate::error::{CompilerError, Result};
use crate::trace::TraceContext;
use crate::transform;
use crate::wildcard::RuleFilter;

/// Sink for pipeline progress events; the serving layer picks the framing.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: CompileEvent);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: CompileEvent) {}
}

/// Channel-backed sink for the streaming adapters.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<CompileEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CompileEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, event: CompileEvent) {
        // A dropped receiver just means nobody is streaming anymore.
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Concurrent source fetches per compilation.
    pub parallelism: usize,
    /// Concurrent compilations per engine.
    pub max_concurrent: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: 3,
            max_concurrent: 3,
        }
    }
}

/// Per-source outcome carried from the fetch stage into the merge.
struct SourceOutcome {
    id: String,
    rules: Vec<String>,
    fetched_count: usize,
    from_cache: bool,
    degraded: bool,
    error: Option<String>,
    duration_ms: u64,
}

pub struct PipelineEngine {
    fetcher: Arc<CachingDownloader>,
    config: PipelineConfig,
    compile_permits: Semaphore,
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("config", &self.config)
            .finish()
    }
}

/// Split a body into rules: line terminators split, trailing whitespace
/// trimmed. Comments and blanks stay; transformations decide their fate.
fn split_rules(body: &str) -> Vec<String> {
    body.lines().map(|line| line.trim_end().to_string()).collect()
}

impl PipelineEngine {
    pub fn new(fetcher: Arc<CachingDownloader>, config: PipelineConfig) -> Self {
        let compile_permits = Semaphore::new(config.max_concurrent.max(1));
        Self {
            fetcher,
            config,
            compile_permits,
        }
    }

    pub fn fetcher(&self) -> &Arc<CachingDownloader> {
        &self.fetcher
    }

    /// Run one compilation to completion.
    pub async fn compile(
        &self,
        config: &FilterListConfig,
        pre_fetched: &BTreeMap<String, String>,
        trace: &TraceContext,
        events: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult> {
        config
            .validate()
            .map_err(|err| CompilerError::Configuration(err.to_string()))?;

        // Independent compilations are bounded per coordinator.
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(CompilerError::Cancelled),
            permit = self.compile_permits.acquire() => permit
                .map_err(|_| CompilerError::Internal("compilation limiter closed".to_string()))?,
        };

        let global_filter = RuleFilter::compile(&config.inclusions, &config.exclusions)?;

        let op = trace.operation_start(
            DiagnosticCategory::Compilation,
            "compile",
            Some(json!({ "name": config.name, "sources": config.sources.len() })),
        );
        events.emit(CompileEvent::Log {
            message: format!(
                "compiling '{}' from {} source(s)",
                config.name,
                config.sources.len()
            ),
        });

        let total_steps = config.sources.len() + 1;
        let download_started = Instant::now();

        // Stage 1: resolve sources concurrently; `buffered` preserves the
        // declared order.
        let mut resolve_futures: Vec<
            std::pin::Pin<Box<dyn std::future::Future<Output = Result<SourceOutcome>> + Send + '_>>,
        > = Vec::with_capacity(config.sources.len());
        for (index, source) in config.sources.iter().enumerate() {
            resolve_futures.push(Box::pin(self.resolve_source(
                index,
                source,
                config.sources.len(),
                pre_fetched,
                trace,
                events,
                cancel,
            )));
        }
        let outcomes: Vec<Result<SourceOutcome>> = futures::stream::iter(resolve_futures)
            .buffered(self.config.parallelism.max(1))
            .collect()
            .await;
        let download_duration_ms = download_started.elapsed().as_millis() as u64;

        let mut resolved = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(resolved_source) => resolved.push(resolved_source),
                Err(err) => {
                    trace.operation_error(op, err.to_string());
                    return Err(err);
                }
            }
        }

        if cancel.is_cancelled() {
            trace.operation_error(op, "cancelled");
            return Err(CompilerError::Cancelled);
        }

        // A compilation where every source failed has nothing to work with.
        if resolved.iter().all(|outcome| outcome.error.is_some()) {
            let err = CompilerError::Source {
                source_id: config.name.clone(),
                message: "all sources failed".to_string(),
            };
            trace.operation_error(op, err.to_string());
            return Err(err);
        }

        // Stage 2: per-source filter and transform, sequential, in order.
        let transform_started = Instant::now();
        let mut merged: Vec<String> = Vec::new();
        let mut source_metrics = Vec::with_capacity(resolved.len());

        for (index, outcome) in resolved.into_iter().enumerate() {
            if cancel.is_cancelled() {
                trace.operation_error(op, "cancelled");
                return Err(CompilerError::Cancelled);
            }

            let source = &config.sources[index];
            let filter = RuleFilter::compile(&source.inclusions, &source.exclusions)?;
            let kept = if outcome.error.is_some() {
                Vec::new()
            } else {
                let filtered = filter.apply(outcome.rules);
                run_transformations(&source.transformations, filtered, trace, events)
            };

            events.emit(CompileEvent::SourceComplete {
                source: outcome.id.clone(),
                fetched_rules: outcome.fetched_count,
                kept_rules: kept.len(),
                from_cache: outcome.from_cache,
            });
            events.emit(CompileEvent::Progress {
                current: index + 1,
                total: total_steps,
                message: Some(format!("processed {}", outcome.id)),
            });

            source_metrics.push(SourceMetrics {
                source: outcome.id,
                fetched_rules: outcome.fetched_count,
                kept_rules: kept.len(),
                from_cache: outcome.from_cache,
                degraded: outcome.degraded,
                duration_ms: outcome.duration_ms,
                error: outcome.error,
            });

            // Stage 3: merge in declared source order.
            merged.extend(kept);
        }

        if cancel.is_cancelled() {
            trace.operation_error(op, "cancelled");
            return Err(CompilerError::Cancelled);
        }

        // Stage 4: global filter, then the global transformation list.
        let merged = global_filter.apply(merged);
        let rules = run_transformations(&config.transformations, merged, trace, events);
        let transform_duration_ms = transform_started.elapsed().as_millis() as u64;

        events.emit(CompileEvent::Progress {
            current: total_steps,
            total: total_steps,
            message: Some("finalizing".to_string()),
        });

        let rule_count = rules.len();
        let total_duration_ms = trace.elapsed_ms();
        trace.metric("rules", rule_count as f64, None);
        trace.operation_complete(
            op,
            Some(json!({ "ruleCount": rule_count, "durationMs": total_duration_ms })),
        );
        info!(
            name = %config.name,
            rule_count,
            duration_ms = total_duration_ms,
            "compilation complete"
        );

        Ok(CompilationResult {
            rules,
            rule_count,
            metrics: CompilationMetrics {
                total_duration_ms,
                download_duration_ms,
                transform_duration_ms,
                sources: source_metrics,
            },
            compiled_at: Utc::now(),
            previous_version: None,
        })
    }

    async fn resolve_source(
        &self,
        index: usize,
        source: &SourceConfig,
        total: usize,
        pre_fetched: &BTreeMap<String, String>,
        trace: &TraceContext,
        events: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<SourceOutcome> {
        let id = source.id().to_string();
        events.emit(CompileEvent::SourceStart {
            source: id.clone(),
            index,
            total,
        });
        let started = Instant::now();

        // Caller-supplied bodies bypass the cache and the downloader.
        if let Some(body) = pre_fetched.get(&id) {
            debug!(source = %id, "using pre-fetched content");
            let rules = split_rules(body);
            return Ok(SourceOutcome {
                id,
                fetched_count: rules.len(),
                rules,
                from_cache: false,
                degraded: false,
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        let downloaded = tokio::select! {
            _ = cancel.cancelled() => return Err(CompilerError::Cancelled),
            downloaded = self.fetcher.download(source, trace) => downloaded,
        };

        match downloaded {
            Ok(downloaded) => {
                let rules = split_rules(&downloaded.body);
                Ok(SourceOutcome {
                    id,
                    fetched_count: rules.len(),
                    rules,
                    from_cache: downloaded.from_cache,
                    degraded: downloaded.degraded,
                    error: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            Err(err) if source.strict => Err(CompilerError::Source {
                source_id: id,
                message: err.to_string(),
            }),
            Err(err) => {
                // Degrade: the source contributes nothing this run.
                let message = err.to_string();
                events.emit(CompileEvent::SourceError {
                    source: id.clone(),
                    error: message.clone(),
                });
                trace.warn(
                    DiagnosticCategory::Download,
                    "source",
                    format!("{id}: {message}"),
                );
                Ok(SourceOutcome {
                    id,
                    rules: Vec::new(),
                    fetched_count: 0,
                    from_cache: false,
                    degraded: true,
                    error: Some(message),
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

/// Apply a transformation list, bracketing each with stream events; the
/// per-transformation diagnostics come from [`transform::apply`].
fn run_transformations(
    kinds: &[TransformationKind],
    mut rules: Vec<String>,
    trace: &TraceContext,
    events: &dyn EventSink,
) -> Vec<String> {
    for kind in kinds {
        events.emit(CompileEvent::TransformationStart {
            name: *kind,
            input_count: rules.len(),
        });
        rules = transform::apply(*kind, rules, trace);
        events.emit(CompileEvent::TransformationComplete {
            name: *kind,
            output_count: rules.len(),
        });
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::download::cached::{CacheOptions, CachingDownloader};
    use crate::download::{Downloader, DownloaderConfig, FetchResponse};
    use crate::kv::Kv;
    use crate::snapshot::SnapshotTracker;
    use crate::testutil::ScriptedTransport;

    fn body(text: &str) -> crate::error::Result<FetchResponse> {
        Ok(FetchResponse::Body {
            body: text.to_string(),
            etag: None,
            status: 200,
        })
    }

    fn engine(responses: Vec<crate::error::Result<FetchResponse>>) -> PipelineEngine {
        let transport = Arc::new(ScriptedTransport::new(responses));
        let downloader = Arc::new(Downloader::new(
            transport,
            DownloaderConfig {
                timeout: Duration::from_secs(5),
                max_retries: 0,
                backoff_base: Duration::from_millis(1),
            },
        ));
        let kv = Kv::in_memory();
        let fetcher = Arc::new(CachingDownloader::new(
            downloader,
            kv.clone(),
            SnapshotTracker::new(kv),
            CacheOptions::default(),
        ));
        PipelineEngine::new(fetcher, PipelineConfig::default())
    }

    fn named_source(name: &str, location: &str) -> SourceConfig {
        let mut source = SourceConfig::new(location);
        source.name = Some(name.to_string());
        source
    }

    async fn compile(
        engine: &PipelineEngine,
        config: &FilterListConfig,
        pre_fetched: &BTreeMap<String, String>,
    ) -> Result<CompilationResult> {
        engine
            .compile(
                config,
                pre_fetched,
                &TraceContext::recording(),
                &NullEventSink,
                &CancellationToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn trim_empty_dedup_end_to_end() {
        let engine = engine(vec![body(" ||a.com^\n||a.com^\n\n||b.com^ \n")]);
        let mut config = FilterListConfig::new(
            "list",
            vec![named_source("s1", "https://example.com/1.txt")],
        );
        config.transformations = vec![
            TransformationKind::TrimLines,
            TransformationKind::RemoveEmptyLines,
            TransformationKind::Deduplicate,
        ];

        let result = compile(&engine, &config, &BTreeMap::new()).await.unwrap();
        assert_eq!(result.rules, vec!["||a.com^", "||b.com^"]);
        assert_eq!(result.rule_count, 2);
    }

    #[tokio::test]
    async fn merge_preserves_declared_source_order() {
        let engine = engine(vec![
            body("||first.com^\n"),
            body("||second.com^\n||third.com^\n"),
        ]);
        let config = FilterListConfig::new(
            "list",
            vec![
                named_source("s1", "https://example.com/1.txt"),
                named_source("s2", "https://example.com/2.txt"),
            ],
        );

        let result = compile(&engine, &config, &BTreeMap::new()).await.unwrap();
        assert_eq!(
            result.rules,
            vec!["||first.com^", "||second.com^", "||third.com^"]
        );
    }

    #[tokio::test]
    async fn global_exclusions_filter_the_merged_list() {
        let engine = engine(vec![body(
            "||ads.example.com^\n||cdn.example.com^\n||ads.other.com^\n",
        )]);
        let mut config = FilterListConfig::new(
            "list",
            vec![named_source("s1", "https://example.com/1.txt")],
        );
        config.exclusions = vec!["*ads*".to_string()];

        let result = compile(&engine, &config, &BTreeMap::new()).await.unwrap();
        assert_eq!(result.rules, vec!["||cdn.example.com^"]);
    }

    #[tokio::test]
    async fn pre_fetched_content_bypasses_the_downloader() {
        // No scripted responses: any origin call would error the script.
        let engine = engine(vec![]);
        let config = FilterListConfig::new(
            "list",
            vec![named_source("local", "https://example.com/1.txt")],
        );
        let mut pre_fetched = BTreeMap::new();
        pre_fetched.insert("local".to_string(), "||pre.com^\n".to_string());

        let result = compile(&engine, &config, &pre_fetched).await.unwrap();
        assert_eq!(result.rules, vec!["||pre.com^"]);
        assert!(!result.metrics.sources[0].from_cache);
    }

    #[tokio::test]
    async fn failed_source_degrades_without_aborting() {
        let engine = engine(vec![
            body("||a.com^\n"),
            Err(CompilerError::network(Some(404), "not found")),
        ]);
        let config = FilterListConfig::new(
            "list",
            vec![
                named_source("good", "https://example.com/1.txt"),
                named_source("bad", "https://example.com/2.txt"),
            ],
        );

        let result = compile(&engine, &config, &BTreeMap::new()).await.unwrap();
        assert_eq!(result.rules, vec!["||a.com^"]);
        let bad = &result.metrics.sources[1];
        assert!(bad.error.is_some());
        assert!(bad.degraded);
    }

    #[tokio::test]
    async fn strict_source_failure_is_fatal() {
        let engine = engine(vec![
            body("||a.com^\n"),
            Err(CompilerError::network(Some(404), "not found")),
        ]);
        let mut strict = named_source("bad", "https://example.com/2.txt");
        strict.strict = true;
        let config = FilterListConfig::new(
            "list",
            vec![named_source("good", "https://example.com/1.txt"), strict],
        );

        let err = compile(&engine, &config, &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, CompilerError::Source { .. }));
    }

    #[tokio::test]
    async fn all_sources_failing_is_fatal() {
        let engine = engine(vec![
            Err(CompilerError::network(Some(500), "a")),
            Err(CompilerError::network(Some(500), "b")),
        ]);
        let config = FilterListConfig::new(
            "list",
            vec![
                named_source("s1", "https://example.com/1.txt"),
                named_source("s2", "https://example.com/2.txt"),
            ],
        );

        let err = compile(&engine, &config, &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, CompilerError::Source { .. }));
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let engine = engine(vec![body("||a.com^\n")]);
        let config = FilterListConfig::new(
            "list",
            vec![named_source("s1", "https://example.com/1.txt")],
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .compile(
                &config,
                &BTreeMap::new(),
                &TraceContext::noop(),
                &NullEventSink,
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CompilerError::Cancelled));
    }

    #[tokio::test]
    async fn events_bracket_sources_and_transformations() {
        let (sink, mut rx) = ChannelEventSink::new();
        let engine = engine(vec![body("||a.com^\n||a.com^\n")]);
        let mut config = FilterListConfig::new(
            "list",
            vec![named_source("s1", "https://example.com/1.txt")],
        );
        config.transformations = vec![TransformationKind::Deduplicate];

        engine
            .compile(
                &config,
                &BTreeMap::new(),
                &TraceContext::noop(),
                &sink,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "log",
                "source:start",
                "source:complete",
                "progress",
                "transformation:start",
                "transformation:complete",
                "progress",
            ]
        );
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let engine = engine(vec![]);
        let config = FilterListConfig::new("list", vec![]);
        let err = compile(&engine, &config, &BTreeMap::new()).await.unwrap_err();
        assert!(matches!(err, CompilerError::Configuration(_)));
    }
}
