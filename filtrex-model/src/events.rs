//! Streaming compile events and the WebSocket session message unions.
//!
//! `CompileEvent` is the single internal event shape shared by the SSE and
//! WebSocket adapters; the adapter picks the framing, the pipeline stays
//! framing-agnostic.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::{CompileResponse, CompileRequest};
use crate::diagnostics::DiagnosticEvent;
use crate::transformation::TransformationKind;

/// Ordered event stream emitted by a running compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum CompileEvent {
    #[serde(rename = "log")]
    Log { message: String },

    #[serde(rename = "source:start", rename_all = "camelCase")]
    SourceStart {
        source: String,
        index: usize,
        total: usize,
    },

    #[serde(rename = "source:complete", rename_all = "camelCase")]
    SourceComplete {
        source: String,
        fetched_rules: usize,
        kept_rules: usize,
        from_cache: bool,
    },

    #[serde(rename = "source:error", rename_all = "camelCase")]
    SourceError { source: String, error: String },

    #[serde(rename = "transformation:start", rename_all = "camelCase")]
    TransformationStart {
        name: TransformationKind,
        input_count: usize,
    },

    #[serde(rename = "transformation:complete", rename_all = "camelCase")]
    TransformationComplete {
        name: TransformationKind,
        output_count: usize,
    },

    #[serde(rename = "progress", rename_all = "camelCase")]
    Progress {
        current: usize,
        total: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "diagnostic")]
    Diagnostic(DiagnosticEvent),

    #[serde(rename = "result")]
    Result(CompileResponse),

    #[serde(rename = "done")]
    Done {},

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { message: String },
}

impl CompileEvent {
    /// Event name used by the SSE framing (`event: <name>`).
    pub fn name(&self) -> &'static str {
        match self {
            CompileEvent::Log { .. } => "log",
            CompileEvent::SourceStart { .. } => "source:start",
            CompileEvent::SourceComplete { .. } => "source:complete",
            CompileEvent::SourceError { .. } => "source:error",
            CompileEvent::TransformationStart { .. } => "transformation:start",
            CompileEvent::TransformationComplete { .. } => "transformation:complete",
            CompileEvent::Progress { .. } => "progress",
            CompileEvent::Diagnostic(_) => "diagnostic",
            CompileEvent::Result(_) => "result",
            CompileEvent::Done {} => "done",
            CompileEvent::Error { .. } => "error",
        }
    }

    /// Event payload used by the SSE framing (`data: <json>`).
    pub fn data(&self) -> Value {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.get("data").cloned().unwrap_or(json!({})),
            _ => json!({}),
        }
    }

    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompileEvent::Done {} | CompileEvent::Error { .. })
    }
}

/// Messages a WebSocket client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "compile", rename_all = "camelCase")]
    Compile {
        /// Client-chosen id echoed back in every event for this compile.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        compile_id: Option<Uuid>,
        #[serde(flatten)]
        request: CompileRequest,
    },

    #[serde(rename = "cancel", rename_all = "camelCase")]
    Cancel { compile_id: Uuid },

    #[serde(rename = "ping")]
    Ping,
}

/// Messages the session loop sends to a WebSocket client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "welcome", rename_all = "camelCase")]
    Welcome {
        session_id: Uuid,
        max_concurrent_compilations: usize,
    },

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "compile:started", rename_all = "camelCase")]
    CompileStarted { compile_id: Uuid },

    #[serde(rename = "event", rename_all = "camelCase")]
    Event {
        compile_id: Uuid,
        event: CompileEvent,
    },

    #[serde(rename = "compile:complete", rename_all = "camelCase")]
    CompileComplete {
        compile_id: Uuid,
        result: CompileResponse,
    },

    #[serde(rename = "compile:error", rename_all = "camelCase")]
    CompileError { compile_id: Uuid, error: String },

    #[serde(rename = "compile:cancelled", rename_all = "camelCase")]
    CompileCancelled { compile_id: Uuid, reason: String },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error { message: String },
}
