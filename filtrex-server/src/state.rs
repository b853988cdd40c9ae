//! Shared application state wired at startup.

use std::sync::Arc;
use std::time::Instant;

use filtrex_config::Settings;
use filtrex_core::{
    AnalyticsSink, CachingDownloader, Downloader, DownloaderConfig, Kv, MetricsRecorder,
    PipelineConfig, PipelineEngine, RateLimiter, ResultCache, SnapshotTracker, SourceTransport,
    TracingAnalytics, WorkflowEngine,
    download::cached::CacheOptions,
};
use filtrex_model::rate_limit::RateLimitRule;

use crate::compile_service::CompileService;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub kv: Kv,
    pub service: Arc<CompileService>,
    pub pipeline: Arc<PipelineEngine>,
    pub result_cache: Arc<ResultCache>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsRecorder>,
    pub workflows: WorkflowEngine,
    pub tracker: SnapshotTracker,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub started_at: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish()
    }
}

impl AppState {
    /// Production wiring: HTTP transport and the in-process store.
    pub fn new(settings: Settings) -> Self {
        let transport = Arc::new(filtrex_core::HttpTransport::new());
        Self::with_transport(settings, transport, Kv::in_memory())
    }

    /// Test seam: inject the transport and store.
    pub fn with_transport(
        settings: Settings,
        transport: Arc<dyn SourceTransport>,
        kv: Kv,
    ) -> Self {
        let downloader = Arc::new(Downloader::new(
            transport,
            DownloaderConfig {
                timeout: settings.downloader.timeout(),
                max_retries: settings.downloader.max_retries,
                ..DownloaderConfig::default()
            },
        ));
        let tracker = SnapshotTracker::new(kv.clone());
        let fetcher = Arc::new(CachingDownloader::new(
            downloader,
            kv.clone(),
            tracker.clone(),
            CacheOptions {
                enabled: settings.cache.enabled,
                ttl: settings.cache.ttl(),
                ..CacheOptions::default()
            },
        ));
        let pipeline = Arc::new(PipelineEngine::new(
            fetcher,
            PipelineConfig {
                parallelism: settings.downloader.parallelism,
                ..PipelineConfig::default()
            },
        ));
        let result_cache = Arc::new(ResultCache::new(kv.clone(), settings.cache.ttl()));
        let analytics: Arc<dyn AnalyticsSink> = Arc::new(TracingAnalytics);
        let metrics = Arc::new(MetricsRecorder::new(settings.metrics.window()));
        let limiter = Arc::new(RateLimiter::new(
            kv.clone(),
            RateLimitRule {
                max_requests: settings.rate_limit.max_requests,
                window_secs: settings.rate_limit.window_secs,
            },
        ));
        let workflows = WorkflowEngine::new(kv.clone())
            .with_event_retention(settings.workflow.event_ttl(), settings.workflow.max_events);
        let service = Arc::new(CompileService::new(
            Arc::clone(&pipeline),
            Arc::clone(&result_cache),
            Arc::clone(&analytics),
        ));

        Self {
            settings: Arc::new(settings),
            kv,
            service,
            pipeline,
            result_cache,
            limiter,
            metrics,
            workflows,
            tracker,
            analytics,
            started_at: Instant::now(),
        }
    }
}
