//! Shared compile orchestration for every front-end surface: result-cache
//! lookup, single-flight coalescing, pipeline invocation, and the
//! cache-store on success.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use filtrex_core::{
    AnalyticsSink, CompilerError, EventSink, InflightCoalescer, PipelineEngine, ResultCache,
    TraceContext, config_fingerprint,
};
use filtrex_model::api::{CompilationResult, CompileRequest, CompileResponse};
use filtrex_model::events::CompileEvent;

/// Outcome of a front-end compile, with the header-relevant provenance.
#[derive(Debug)]
pub struct CompileOutcome {
    pub response: CompileResponse,
    pub cache_hit: bool,
    pub coalesced: bool,
}

pub struct CompileService {
    pipeline: Arc<PipelineEngine>,
    result_cache: Arc<ResultCache>,
    coalescer: Arc<InflightCoalescer>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl std::fmt::Debug for CompileService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileService").finish()
    }
}

impl CompileService {
    pub fn new(
        pipeline: Arc<PipelineEngine>,
        result_cache: Arc<ResultCache>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            pipeline,
            result_cache,
            coalescer: Arc::new(InflightCoalescer::new()),
            analytics,
        }
    }

    /// Non-streaming compile: cache first, then coalesced pipeline run.
    ///
    /// Coalescing is skipped when pre-fetched content is present, since
    /// bodies may differ despite identical configurations.
    pub async fn compile(
        &self,
        request: &CompileRequest,
    ) -> Result<CompileOutcome, CompilerError> {
        request
            .configuration
            .validate()
            .map_err(|err| CompilerError::Configuration(err.to_string()))?;

        if !request.pre_fetched_content.is_empty() {
            let result = self.run_pipeline(request, &filtrex_core::NullEventSink, &CancellationToken::new()).await?;
            return Ok(CompileOutcome {
                response: CompileResponse::from_result(result, request.benchmark),
                cache_hit: false,
                coalesced: false,
            });
        }

        let fingerprint = config_fingerprint(&request.configuration);
        if let Some(result) = self.result_cache.get(&fingerprint).await {
            self.analytics
                .record("compile:cache-hit", serde_json::json!({ "fingerprint": fingerprint }));
            return Ok(CompileOutcome {
                response: CompileResponse::from_result(result, request.benchmark),
                cache_hit: true,
                coalesced: false,
            });
        }

        let flight = {
            let pipeline = Arc::clone(&self.pipeline);
            let result_cache = Arc::clone(&self.result_cache);
            let request = request.clone();
            let key = fingerprint.clone();
            self.coalescer.join(&fingerprint, move || async move {
                let mut result = pipeline
                    .compile(
                        &request.configuration,
                        &request.pre_fetched_content,
                        &TraceContext::recording(),
                        &filtrex_core::NullEventSink,
                        &CancellationToken::new(),
                    )
                    .await?;
                result.previous_version = result_cache.store(&key, &result).await;
                Ok(result)
            })
        };
        let coalesced = flight.coalesced;
        let result = flight.outcome().await?;

        Ok(CompileOutcome {
            response: CompileResponse::from_result(result, request.benchmark),
            cache_hit: false,
            coalesced,
        })
    }

    /// Streaming compile: events flow to the caller's sink, so the flight
    /// is never coalesced. Cache hits still short-circuit.
    pub async fn compile_streaming(
        &self,
        request: &CompileRequest,
        events: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<CompileResponse, CompilerError> {
        request
            .configuration
            .validate()
            .map_err(|err| CompilerError::Configuration(err.to_string()))?;

        let cacheable = request.pre_fetched_content.is_empty();
        let fingerprint = cacheable.then(|| config_fingerprint(&request.configuration));

        if let Some(fingerprint) = &fingerprint
            && let Some(result) = self.result_cache.get(fingerprint).await
        {
            events.emit(CompileEvent::Log {
                message: "serving cached compilation".to_string(),
            });
            return Ok(CompileResponse::from_result(result, request.benchmark));
        }

        let trace = TraceContext::recording();
        let mut result = self
            .pipeline
            .compile(
                &request.configuration,
                &request.pre_fetched_content,
                &trace,
                events,
                cancel,
            )
            .await?;
        if request.benchmark {
            for diagnostic in trace.events() {
                events.emit(CompileEvent::Diagnostic(diagnostic));
            }
        }
        if let Some(fingerprint) = &fingerprint {
            result.previous_version = self.result_cache.store(fingerprint, &result).await;
        }
        Ok(CompileResponse::from_result(result, request.benchmark))
    }

    async fn run_pipeline(
        &self,
        request: &CompileRequest,
        events: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<CompilationResult, CompilerError> {
        self.pipeline
            .compile(
                &request.configuration,
                &request.pre_fetched_content,
                &TraceContext::recording(),
                events,
                cancel,
            )
            .await
    }
}
