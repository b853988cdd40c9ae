use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompilerError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("network error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Network {
        status: Option<u16>,
        retryable: bool,
        message: String,
    },

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    #[error("source '{source_id}' failed: {message}")]
    Source { source_id: String, message: String },

    #[error("filesystem error: {0}")]
    FileSystem(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transformation {name} failed: {message}")]
    Transformation { name: String, message: String },

    #[error("invalid wildcard pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("compilation cancelled")]
    Cancelled,

    #[error("workflow step '{step}' failed: {message}")]
    Workflow { step: String, message: String },

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

impl CompilerError {
    /// Whether the downloader may retry the failed attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompilerError::Network { retryable, .. } => *retryable,
            CompilerError::Timeout(_) => true,
            _ => false,
        }
    }

    pub fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        let retryable = match status {
            Some(code) => (500..600).contains(&code),
            // Connection-level failures carry no status and are transient.
            None => true,
        };
        CompilerError::Network {
            status,
            retryable,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for CompilerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return CompilerError::Timeout(Duration::from_secs(30));
        }
        CompilerError::network(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_xx_is_retryable_and_4xx_is_not() {
        assert!(CompilerError::network(Some(503), "upstream down").is_retryable());
        assert!(!CompilerError::network(Some(404), "gone").is_retryable());
        assert!(CompilerError::network(None, "connection reset").is_retryable());
    }

    #[test]
    fn timeouts_are_retryable() {
        assert!(CompilerError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(!CompilerError::Cancelled.is_retryable());
    }
}
