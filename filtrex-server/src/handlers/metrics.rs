use axum::{Json, extract::State};

use filtrex_model::api::MetricsResponse;

use crate::state::AppState;

/// `GET /api/v1/metrics` — trailing-window counters by endpoint and
/// outcome.
pub async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot())
}
