//! Correlation-scoped diagnostic events recorded during compilation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Compilation,
    Download,
    Transformation,
    Cache,
    Validation,
    Network,
    Performance,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOperation {
    Hit,
    Miss,
    Write,
    Evict,
}

/// Variant payload of one diagnostic event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum DiagnosticPayload {
    #[serde(rename_all = "camelCase")]
    OperationStart {
        operation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    OperationComplete {
        operation: String,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    OperationError {
        operation: String,
        duration_ms: u64,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Metric {
        name: String,
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Cache { op: CacheOperation, key: String },
    #[serde(rename_all = "camelCase")]
    Network {
        method: String,
        /// Sanitized URL: query strings are never recorded verbatim.
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
    },
}

/// One recorded diagnostic, tagged with the owning trace's correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticEvent {
    pub event_id: Uuid,
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_event_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub category: DiagnosticCategory,
    pub severity: DiagnosticSeverity,
    #[serde(flatten)]
    pub payload: DiagnosticPayload,
}
