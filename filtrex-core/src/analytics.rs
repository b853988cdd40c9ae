//! Fire-and-forget analytics emission.
//!
//! Sinks must never propagate failures into the request path; the default
//! implementation just logs the event at debug level.

use serde_json::Value;
use tracing::debug;

pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: &str, payload: Value);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAnalytics;

impl AnalyticsSink for TracingAnalytics {
    fn record(&self, event: &str, payload: Value) {
        debug!(event, %payload, "analytics");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalytics;

impl AnalyticsSink for NullAnalytics {
    fn record(&self, _event: &str, _payload: Value) {}
}
