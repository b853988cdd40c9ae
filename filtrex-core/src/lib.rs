//! Filtrex compilation engine: source acquisition, transformation pipeline,
//! caching, single-flight coalescing, and durable workflow execution.
#![allow(missing_docs)]

pub mod analytics;
pub mod coalesce;
pub mod download;
pub mod error;
pub mod kv;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod ratelimit;
pub mod result_cache;
pub mod snapshot;
pub mod trace;
pub mod transform;
pub mod wildcard;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testutil;

pub use analytics::{AnalyticsSink, NullAnalytics, TracingAnalytics};
pub use coalesce::{CoalescedCompile, InflightCoalescer};
pub use download::{
    cached::{CacheOptions, CachingDownloader, DownloadedSource},
    DownloadOutcome, Downloader, DownloaderConfig, FetchResponse, FetchedSource,
    HttpTransport, SourceTransport, content_hash,
};
pub use error::{CompilerError, Result};
pub use kv::{Kv, KvStore, MemoryKvStore};
pub use metrics::{MetricsRecorder, RequestOutcome};
pub use pipeline::{ChannelEventSink, EventSink, NullEventSink, PipelineConfig, PipelineEngine};
pub use ratelimit::RateLimiter;
pub use result_cache::{ResultCache, config_fingerprint, fingerprint_value};
pub use snapshot::SnapshotTracker;
pub use trace::{DiagnosticsSink, NoopSink, RecordingSink, TraceContext, sanitize_url};
pub use workflow::{
    WorkflowCtx, WorkflowEngine,
    runs::{BatchWorkflow, CacheWarmingWorkflow, CompilationWorkflow, HealthMonitoringWorkflow},
};
