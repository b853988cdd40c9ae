//! Shared test doubles.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::download::{FetchResponse, SourceTransport};
use crate::error::{CompilerError, Result};

/// Transport that replays a scripted sequence of responses and records the
/// validator sent with each call.
pub(crate) struct ScriptedTransport {
    responses: Mutex<Vec<Result<FetchResponse>>>,
    pub calls: Mutex<Vec<Option<String>>>,
}

impl ScriptedTransport {
    pub(crate) fn new(responses: Vec<Result<FetchResponse>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SourceTransport for ScriptedTransport {
    async fn fetch(
        &self,
        _location: &str,
        etag: Option<&str>,
        _timeout: Duration,
    ) -> Result<FetchResponse> {
        self.calls.lock().unwrap().push(etag.map(str::to_string));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(CompilerError::Internal("script exhausted".to_string()));
        }
        responses.remove(0)
    }
}

/// 200 OK response with an optional ETag.
pub(crate) fn body(text: &str, etag: Option<&str>) -> FetchResponse {
    FetchResponse::Body {
        body: text.to_string(),
        etag: etag.map(str::to_string),
        status: 200,
    }
}
