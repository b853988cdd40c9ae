//! Correlation-scoped diagnostics collection.
//!
//! Every top-level operation is bracketed with `operation_start` /
//! `complete` / `fail`; child contexts share their parent's correlation id
//! and sink so related events aggregate under one id.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use filtrex_model::diagnostics::{
    CacheOperation, DiagnosticCategory, DiagnosticEvent, DiagnosticPayload, DiagnosticSeverity,
};

pub trait DiagnosticsSink: Send + Sync {
    fn record(&self, event: DiagnosticEvent);

    /// Drain-free view of everything recorded so far. The no-op sink
    /// always returns an empty list.
    fn events(&self) -> Vec<DiagnosticEvent>;
}

/// Collecting sink used when diagnostics are requested.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DiagnosticEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn record(&self, event: DiagnosticEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn events(&self) -> Vec<DiagnosticEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

/// Sink for production builds running with tracing disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl DiagnosticsSink for NoopSink {
    fn record(&self, _event: DiagnosticEvent) {}

    fn events(&self) -> Vec<DiagnosticEvent> {
        Vec::new()
    }
}

/// Replace any query string with the literal `[QUERY]` so credentials in
/// URLs never reach the event log.
pub fn sanitize_url(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?[QUERY]"),
        None => url.to_string(),
    }
}

/// Handle for one in-flight bracketed operation.
#[derive(Debug)]
pub struct Operation {
    event_id: Uuid,
    name: String,
    category: DiagnosticCategory,
    started: Instant,
}

impl Operation {
    pub fn event_id(&self) -> Uuid {
        self.event_id
    }
}

/// One compilation's tracing scope.
pub struct TraceContext {
    correlation_id: Uuid,
    parent_event_id: Option<Uuid>,
    sink: Arc<dyn DiagnosticsSink>,
    started: Instant,
}

impl std::fmt::Debug for TraceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceContext")
            .field("correlation_id", &self.correlation_id)
            .field("parent_event_id", &self.parent_event_id)
            .finish()
    }
}

impl TraceContext {
    pub fn new(sink: Arc<dyn DiagnosticsSink>) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            parent_event_id: None,
            sink,
            started: Instant::now(),
        }
    }

    pub fn recording() -> Self {
        Self::new(Arc::new(RecordingSink::new()))
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopSink))
    }

    /// Child scope: same correlation id and sink, optionally parented to a
    /// bracketing operation event.
    pub fn child(&self, parent: Option<&Operation>) -> Self {
        Self {
            correlation_id: self.correlation_id,
            parent_event_id: parent.map(|op| op.event_id).or(self.parent_event_id),
            sink: Arc::clone(&self.sink),
            started: Instant::now(),
        }
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    pub fn events(&self) -> Vec<DiagnosticEvent> {
        self.sink.events()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn emit(
        &self,
        category: DiagnosticCategory,
        severity: DiagnosticSeverity,
        payload: DiagnosticPayload,
    ) -> Uuid {
        let event_id = Uuid::new_v4();
        self.sink.record(DiagnosticEvent {
            event_id,
            correlation_id: self.correlation_id,
            parent_event_id: self.parent_event_id,
            timestamp: Utc::now(),
            category,
            severity,
            payload,
        });
        event_id
    }

    pub fn operation_start(
        &self,
        category: DiagnosticCategory,
        name: impl Into<String>,
        input: Option<Value>,
    ) -> Operation {
        let name = name.into();
        let event_id = self.emit(
            category,
            DiagnosticSeverity::Debug,
            DiagnosticPayload::OperationStart {
                operation: name.clone(),
                input,
            },
        );
        Operation {
            event_id,
            name,
            category,
            started: Instant::now(),
        }
    }

    pub fn operation_complete(&self, op: Operation, output: Option<Value>) {
        let duration_ms = op.started.elapsed().as_millis() as u64;
        self.emit_child(
            op.event_id,
            op.category,
            DiagnosticSeverity::Debug,
            DiagnosticPayload::OperationComplete {
                operation: op.name,
                duration_ms,
                output,
            },
        );
    }

    pub fn operation_error(&self, op: Operation, error: impl Into<String>) {
        let duration_ms = op.started.elapsed().as_millis() as u64;
        self.emit_child(
            op.event_id,
            op.category,
            DiagnosticSeverity::Error,
            DiagnosticPayload::OperationError {
                operation: op.name,
                duration_ms,
                error: error.into(),
            },
        );
    }

    fn emit_child(
        &self,
        parent_event_id: Uuid,
        category: DiagnosticCategory,
        severity: DiagnosticSeverity,
        payload: DiagnosticPayload,
    ) {
        self.sink.record(DiagnosticEvent {
            event_id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_event_id: Some(parent_event_id),
            timestamp: Utc::now(),
            category,
            severity,
            payload,
        });
    }

    pub fn metric(&self, name: impl Into<String>, value: f64, unit: Option<&str>) {
        self.emit(
            DiagnosticCategory::Performance,
            DiagnosticSeverity::Info,
            DiagnosticPayload::Metric {
                name: name.into(),
                value,
                unit: unit.map(str::to_string),
            },
        );
    }

    pub fn cache_op(&self, op: CacheOperation, key: impl Into<String>) {
        self.emit(
            DiagnosticCategory::Cache,
            DiagnosticSeverity::Debug,
            DiagnosticPayload::Cache {
                op,
                key: key.into(),
            },
        );
    }

    pub fn network_op(
        &self,
        method: &str,
        url: &str,
        status: Option<u16>,
        duration_ms: Option<u64>,
    ) {
        self.emit(
            DiagnosticCategory::Network,
            DiagnosticSeverity::Debug,
            DiagnosticPayload::Network {
                method: method.to_string(),
                url: sanitize_url(url),
                status,
                duration_ms,
            },
        );
    }

    pub fn warn(&self, category: DiagnosticCategory, operation: &str, message: impl Into<String>) {
        self.emit(
            category,
            DiagnosticSeverity::Warn,
            DiagnosticPayload::OperationError {
                operation: operation.to_string(),
                duration_ms: 0,
                error: message.into(),
            },
        );
    }
}
