//! Shared fixtures for the server test suite.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

use filtrex_config::Settings;
use filtrex_core::{CompilerError, FetchResponse, Kv, Result, SourceTransport};
use filtrex_model::api::CompileRequest;
use filtrex_model::config::{FilterListConfig, SourceConfig};

use crate::routes::create_router;
use crate::state::AppState;

/// Transport replaying a scripted sequence of responses.
pub struct ScriptedTransport {
    responses: Mutex<Vec<Result<FetchResponse>>>,
    calls: Mutex<usize>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<FetchResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl SourceTransport for ScriptedTransport {
    async fn fetch(
        &self,
        _location: &str,
        _etag: Option<&str>,
        _timeout: Duration,
    ) -> Result<FetchResponse> {
        *self.calls.lock().unwrap() += 1;
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(CompilerError::Internal("script exhausted".to_string()));
        }
        responses.remove(0)
    }
}

pub fn ok_body(text: &str) -> Result<FetchResponse> {
    Ok(FetchResponse::Body {
        body: text.to_string(),
        etag: None,
        status: 200,
    })
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.rate_limit.max_requests = 50;
    // Scripted transports fail deterministically; retry sleeps only slow
    // the suite down.
    settings.downloader.max_retries = 0;
    settings
}

pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub transport: Arc<ScriptedTransport>,
}

pub fn test_server(responses: Vec<Result<FetchResponse>>) -> TestServer {
    test_server_with_settings(responses, test_settings())
}

pub fn test_server_with_settings(
    responses: Vec<Result<FetchResponse>>,
    settings: Settings,
) -> TestServer {
    let transport = Arc::new(ScriptedTransport::new(responses));
    let state = AppState::with_transport(settings, transport.clone(), Kv::in_memory());
    TestServer {
        router: create_router(state.clone()),
        state,
        transport,
    }
}

pub fn simple_request(source_name: &str, location: &str) -> CompileRequest {
    let mut source = SourceConfig::new(location);
    source.name = Some(source_name.to_string());
    CompileRequest::new(FilterListConfig::new("test-list", vec![source]))
}

pub async fn post_json<T: serde::Serialize>(
    router: &Router,
    path: &str,
    payload: &T,
) -> Response<Body> {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

pub async fn get(router: &Router, path: &str) -> Response<Body> {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

pub async fn read_json<T: DeserializeOwned>(response: Response<Body>) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn read_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn assert_status(response: &Response<Body>, expected: StatusCode) {
    assert_eq!(response.status(), expected);
}
