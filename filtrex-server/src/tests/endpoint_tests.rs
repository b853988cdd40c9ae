//! Health, metrics, and session message coverage.

use axum::http::StatusCode;

use filtrex_model::api::{HealthResponse, MetricsResponse, OverallHealth};
use filtrex_model::events::{ClientMessage, ServerMessage};

use crate::routes::paths::v1;
use crate::tests::test_utils::*;

#[tokio::test]
async fn health_reports_healthy_with_no_sources() {
    let server = test_server(vec![]);
    let response = get(&server.router, v1::HEALTH).await;
    assert_status(&response, StatusCode::OK);

    let body: HealthResponse = read_json(response).await;
    assert_eq!(body.status, OverallHealth::Healthy);
    assert!(!body.version.is_empty());
    assert!(body.checks.contains_key("storage"));
}

#[tokio::test]
async fn health_degrades_when_a_source_is_failing() {
    let server = test_server(vec![
        Err(filtrex_core::CompilerError::network(Some(500), "down")),
        Err(filtrex_core::CompilerError::network(Some(500), "down")),
        Err(filtrex_core::CompilerError::network(Some(500), "down")),
    ]);

    // Three failing compiles leave the source unhealthy.
    let request = simple_request("flaky", "https://e.com/flaky.txt");
    for _ in 0..3 {
        post_json(&server.router, v1::COMPILE, &request).await;
    }

    let response = get(&server.router, v1::HEALTH).await;
    let body: HealthResponse = read_json(response).await;
    // The only known source is unhealthy, so the rollup is too.
    assert_eq!(body.status, OverallHealth::Unhealthy);
    let check = body.checks.get("source:flaky").unwrap();
    assert_eq!(check.status, OverallHealth::Unhealthy);
}

#[tokio::test]
async fn sources_health_lists_records() {
    let server = test_server(vec![ok_body("||a.com^\n")]);
    let request = simple_request("s1", "https://e.com/1.txt");
    post_json(&server.router, v1::COMPILE, &request).await;

    let response = get(&server.router, v1::SOURCES_HEALTH).await;
    assert_status(&response, StatusCode::OK);
    let records: Vec<filtrex_model::health::SourceHealthRecord> = read_json(response).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source_id, "s1");
}

#[tokio::test]
async fn metrics_reflect_recent_requests() {
    let server = test_server(vec![ok_body("||a.com^\n")]);
    let request = simple_request("s1", "https://e.com/1.txt");
    post_json(&server.router, v1::COMPILE, &request).await;
    post_json(&server.router, v1::COMPILE, &request).await;

    let response = get(&server.router, v1::METRICS).await;
    assert_status(&response, StatusCode::OK);
    let body: MetricsResponse = read_json(response).await;

    let compile_success = body
        .entries
        .iter()
        .find(|e| e.endpoint == "compile" && e.outcome == "success")
        .expect("compile success bucket present");
    assert_eq!(compile_success.count, 1);
    let cache_hits = body
        .entries
        .iter()
        .find(|e| e.endpoint == "compile" && e.outcome == "cache-hit")
        .expect("cache hit bucket present");
    assert_eq!(cache_hits.count, 1);
}

#[test]
fn session_messages_round_trip_the_wire_format() {
    let welcome = ServerMessage::Welcome {
        session_id: uuid::Uuid::new_v4(),
        max_concurrent_compilations: 3,
    };
    let json = serde_json::to_value(&welcome).unwrap();
    assert_eq!(json["type"], "welcome");

    let cancel: ClientMessage = serde_json::from_str(
        r#"{"type":"cancel","compileId":"6f2f3a24-84b5-4d2c-9f4e-0a4b4c9e2d11"}"#,
    )
    .unwrap();
    assert!(matches!(cancel, ClientMessage::Cancel { .. }));

    let event = ServerMessage::CompileStarted {
        compile_id: uuid::Uuid::new_v4(),
    };
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["type"], "compile:started");
}
