//! Core data model definitions shared across Filtrex crates.
#![allow(missing_docs)]

pub mod api;
pub mod config;
pub mod diagnostics;
pub mod events;
pub mod health;
pub mod rate_limit;
pub mod snapshot;
pub mod transformation;
pub mod workflow;

// Intentionally curated re-exports for downstream consumers.
pub use api::{
    BatchCompileRequest, BatchCompileResponse, BatchItemResult, CheckStatus,
    CompilationMetrics, CompilationResult, CompileRequest, CompileResponse,
    HealthResponse, MetricsResponse, OverallHealth, PreviousVersion,
    QueueResultResponse, QueueStatus, QueuedCompileAck, SourceMetrics,
};
pub use config::{ConfigValidationError, FilterListConfig, SourceConfig, SourceType};
pub use diagnostics::{
    CacheOperation, DiagnosticCategory, DiagnosticEvent, DiagnosticPayload,
    DiagnosticSeverity,
};
pub use events::{ClientMessage, CompileEvent, ServerMessage};
pub use health::{AttemptStatus, HealthStatus, SourceHealthRecord};
pub use rate_limit::{RateLimitDecision, RateLimitRule, WindowCounter};
pub use snapshot::{SnapshotDiff, SourceSnapshot};
pub use transformation::TransformationKind;
pub use workflow::{
    BackoffKind, RetryPolicy, StepConfig, StepRecord, WorkflowEvent,
    WorkflowEventRecord, WorkflowInstance, WorkflowKind, WorkflowStatus,
};
