use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use filtrex_core::CompilerError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl From<CompilerError> for AppError {
    fn from(err: CompilerError) -> Self {
        match &err {
            CompilerError::Configuration(_) | CompilerError::Pattern { .. } => {
                Self::bad_request(err.to_string())
            }
            CompilerError::RateLimited { retry_after } => {
                Self::rate_limited(err.to_string(), retry_after.as_secs().max(1))
            }
            CompilerError::Network { .. }
            | CompilerError::Timeout(_)
            | CompilerError::Source { .. } => Self::bad_gateway(err.to_string()),
            CompilerError::Cancelled => {
                Self::new(StatusCode::CONFLICT, "compilation cancelled")
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": {
                "message": self.message,
                "status": self.status.as_u16(),
            }
        }));

        let mut response = (self.status, body).into_response();
        if let Some(retry_after) = self.retry_after_secs
            && let Ok(value) = retry_after.to_string().parse()
        {
            response.headers_mut().insert("Retry-After", value);
        }
        response
    }
}
