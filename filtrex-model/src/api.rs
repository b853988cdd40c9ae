//! Request and response payloads for the compile endpoints.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::FilterListConfig;

/// A single compilation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub configuration: FilterListConfig,

    /// Source bodies supplied by the caller, keyed by source name. A source
    /// whose name appears here is never fetched from its origin.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pre_fetched_content: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub benchmark: bool,
}

impl CompileRequest {
    pub fn new(configuration: FilterListConfig) -> Self {
        Self {
            configuration,
            pre_fetched_content: BTreeMap::new(),
            benchmark: false,
        }
    }
}

/// Timing and per-source counters for one compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationMetrics {
    pub total_duration_ms: u64,
    pub download_duration_ms: u64,
    pub transform_duration_ms: u64,
    pub sources: Vec<SourceMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetrics {
    pub source: String,
    pub fetched_rules: usize,
    pub kept_rules: usize,
    pub from_cache: bool,
    pub degraded: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary of the compiled result that previously occupied the same cache
/// slot, surfaced so clients can diff successive builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousVersion {
    pub rule_count: usize,
    pub compiled_at: DateTime<Utc>,
    pub fingerprint: String,
}

/// The engine-level outcome of a compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResult {
    pub rules: Vec<String>,
    pub rule_count: usize,
    pub metrics: CompilationMetrics,
    pub compiled_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<PreviousVersion>,
}

/// Wire response for the synchronous compile endpoint (and per-item batch
/// entries, where `success: false` carries `error` instead of rules).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileResponse {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,

    #[serde(default)]
    pub rule_count: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<CompilationMetrics>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiled_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<PreviousVersion>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompileResponse {
    pub fn from_result(result: CompilationResult, benchmark: bool) -> Self {
        Self {
            success: true,
            rule_count: result.rule_count,
            metrics: benchmark.then_some(result.metrics),
            compiled_at: Some(result.compiled_at),
            previous_version: result.previous_version,
            rules: result.rules,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            rules: Vec::new(),
            rule_count: 0,
            metrics: None,
            compiled_at: None,
            previous_version: None,
            error: Some(message.into()),
        }
    }
}

/// One entry of a batch request; `id` must be unique within the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompileItem {
    pub id: String,
    #[serde(flatten)]
    pub request: CompileRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompileRequest {
    pub requests: Vec<BatchCompileItem>,
}

/// Largest accepted batch; anything bigger is rejected up front.
pub const MAX_BATCH_ITEMS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub id: String,
    #[serde(flatten)]
    pub response: CompileResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCompileResponse {
    pub success: bool,
    pub results: Vec<BatchItemResult>,
}

/// `202 Accepted` payload for the queued compile endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedCompileAck {
    pub request_id: Uuid,
    pub status_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueResultResponse {
    pub request_id: Uuid,
    pub status: QueueStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CompileResponse>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckStatus {
    pub status: OverallHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// `/health` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: OverallHealth,
    pub version: String,
    pub uptime_secs: u64,
    pub checks: BTreeMap<String, CheckStatus>,
}

/// `/metrics` payload: trailing-window counters keyed by endpoint and
/// outcome, plus latency aggregates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointMetrics {
    pub endpoint: String,
    pub outcome: String,
    pub count: u64,
    pub avg_duration_ms: u64,
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    pub window_secs: u64,
    pub entries: Vec<EndpointMetrics>,
}
