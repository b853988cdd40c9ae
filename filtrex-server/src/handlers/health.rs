//! Service health rollup from the per-source health records.

use std::collections::BTreeMap;

use axum::{Json, extract::State};

use filtrex_model::api::{CheckStatus, HealthResponse, OverallHealth};
use filtrex_model::health::{HealthStatus, SourceHealthRecord};

use crate::errors::AppResult;
use crate::state::AppState;

fn check_status(status: HealthStatus) -> OverallHealth {
    match status {
        HealthStatus::Healthy => OverallHealth::Healthy,
        HealthStatus::Degraded => OverallHealth::Degraded,
        HealthStatus::Unhealthy => OverallHealth::Unhealthy,
    }
}

/// Roll individual source classifications up into one service status: all
/// healthy reads healthy, any unhealthy source degrades the service, and a
/// majority of unhealthy sources marks it unhealthy.
fn rollup(records: &[SourceHealthRecord]) -> OverallHealth {
    if records.is_empty() {
        return OverallHealth::Healthy;
    }
    let unhealthy = records
        .iter()
        .filter(|r| r.status == HealthStatus::Unhealthy)
        .count();
    let degraded = records
        .iter()
        .filter(|r| r.status == HealthStatus::Degraded)
        .count();

    if unhealthy * 2 > records.len() {
        OverallHealth::Unhealthy
    } else if unhealthy > 0 || degraded > 0 {
        OverallHealth::Degraded
    } else {
        OverallHealth::Healthy
    }
}

/// `GET /api/v1/health`
pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let records = state.tracker.all_health().await?;

    let mut checks: BTreeMap<String, CheckStatus> = BTreeMap::new();
    for record in &records {
        checks.insert(
            format!("source:{}", record.source_id),
            CheckStatus {
                status: check_status(record.status),
                detail: Some(format!(
                    "{} consecutive failure(s), {:.1}% success",
                    record.consecutive_failures,
                    record.success_rate()
                )),
            },
        );
    }

    // Storage round-trip check.
    let storage_ok = state
        .kv
        .put(
            "health/self-check",
            b"ok".to_vec(),
            Some(std::time::Duration::from_secs(60)),
        )
        .await
        .is_ok();
    checks.insert(
        "storage".to_string(),
        CheckStatus {
            status: if storage_ok {
                OverallHealth::Healthy
            } else {
                OverallHealth::Unhealthy
            },
            detail: None,
        },
    );

    let mut status = rollup(&records);
    if !storage_ok {
        status = OverallHealth::Unhealthy;
    }

    Ok(Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        checks,
    }))
}

/// `GET /api/v1/sources/health` — the raw per-source records.
pub async fn sources_health_handler(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<SourceHealthRecord>>> {
    Ok(Json(state.tracker.all_health().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: HealthStatus) -> SourceHealthRecord {
        let mut record = SourceHealthRecord::new("s");
        record.status = status;
        record
    }

    #[test]
    fn rollup_prefers_the_worst_signal() {
        assert_eq!(rollup(&[]), OverallHealth::Healthy);
        assert_eq!(
            rollup(&[record(HealthStatus::Healthy), record(HealthStatus::Healthy)]),
            OverallHealth::Healthy
        );
        assert_eq!(
            rollup(&[record(HealthStatus::Healthy), record(HealthStatus::Degraded)]),
            OverallHealth::Degraded
        );
        assert_eq!(
            rollup(&[record(HealthStatus::Healthy), record(HealthStatus::Unhealthy)]),
            OverallHealth::Degraded
        );
        assert_eq!(
            rollup(&[
                record(HealthStatus::Unhealthy),
                record(HealthStatus::Unhealthy),
                record(HealthStatus::Healthy)
            ]),
            OverallHealth::Unhealthy
        );
    }
}
