//! Source acquisition: HTTP and filesystem transports with conditional
//! GET, bounded retries, and stable content hashing.

pub mod cached;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use reqwest::header::IF_NONE_MATCH;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use filtrex_model::config::SourceConfig;

use crate::error::{CompilerError, Result};
use crate::trace::TraceContext;

/// Hex characters of the SHA-256 digest kept as the content hash.
const CONTENT_HASH_LEN: usize = 12;

/// Stable digest over a source body; identical bodies hash identically
/// across runs and processes.
pub fn content_hash(body: &str) -> String {
    let digest = Sha256::digest(body.as_bytes());
    let mut out = String::with_capacity(CONTENT_HASH_LEN);
    for byte in digest.iter() {
        if out.len() >= CONTENT_HASH_LEN {
            break;
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out.truncate(CONTENT_HASH_LEN);
    out
}

/// Short fingerprint of a source location, used in cache keys.
pub fn source_fingerprint(location: &str) -> String {
    content_hash(location)
}

/// Rule count for health checks: non-empty lines that are not comments.
/// The data path keeps the full body; this count never filters it.
pub fn count_rules(body: &str) -> usize {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('#'))
        .count()
}

/// Leading rules of a body, for snapshot samples.
pub fn sample_rules(body: &str, limit: usize) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('!') && !line.starts_with('#'))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// Raw transport response before retry handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchResponse {
    Body {
        body: String,
        etag: Option<String>,
        status: u16,
    },
    /// `304 Not Modified`; the validator still matches, no body follows.
    NotModified,
}

/// Seam between the downloader and the network, so the engine can run
/// against scripted responses in tests.
#[async_trait]
pub trait SourceTransport: Send + Sync {
    async fn fetch(
        &self,
        location: &str,
        etag: Option<&str>,
        timeout: Duration,
    ) -> Result<FetchResponse>;
}

/// Production transport over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceTransport for HttpTransport {
    async fn fetch(
        &self,
        location: &str,
        etag: Option<&str>,
        timeout: Duration,
    ) -> Result<FetchResponse> {
        let mut request = self.client.get(location).timeout(timeout);
        if let Some(etag) = etag {
            request = request.header(IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                CompilerError::Timeout(timeout)
            } else {
                CompilerError::from(err)
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(FetchResponse::NotModified);
        }
        if !status.is_success() {
            return Err(CompilerError::network(
                Some(status.as_u16()),
                format!("unexpected status fetching {location}"),
            ));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        Ok(FetchResponse::Body {
            body,
            etag,
            status: status.as_u16(),
        })
    }
}

/// A fetched source body plus its identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    pub body: String,
    pub content_hash: String,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Fetched(FetchedSource),
    /// The origin confirmed the previously-seen ETag is still current.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub timeout: Duration,
    /// Retries after the first attempt, transient failures only.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            backoff_base: Duration::from_millis(500),
        }
    }
}

/// Fetches one source with conditional GET and bounded retries.
pub struct Downloader {
    transport: Arc<dyn SourceTransport>,
    config: DownloaderConfig,
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("config", &self.config)
            .finish()
    }
}

impl Downloader {
    pub fn new(transport: Arc<dyn SourceTransport>, config: DownloaderConfig) -> Self {
        Self { transport, config }
    }

    pub fn over_http(config: DownloaderConfig) -> Self {
        Self::new(Arc::new(HttpTransport::new()), config)
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Fetch a source, passing `etag` as the revalidation token when set.
    pub async fn download(
        &self,
        source: &SourceConfig,
        etag: Option<&str>,
        trace: &TraceContext,
    ) -> Result<DownloadOutcome> {
        if is_remote(&source.source) {
            self.download_remote(source, etag, trace).await
        } else {
            self.read_local(source).await
        }
    }

    async fn download_remote(
        &self,
        source: &SourceConfig,
        etag: Option<&str>,
        trace: &TraceContext,
    ) -> Result<DownloadOutcome> {
        let location = &source.source;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self
                .transport
                .fetch(location, etag, self.config.timeout)
                .await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(FetchResponse::NotModified) => {
                    trace.network_op("GET", location, Some(304), Some(elapsed_ms));
                    return Ok(DownloadOutcome::Unchanged);
                }
                Ok(FetchResponse::Body { body, etag, status }) => {
                    trace.network_op("GET", location, Some(status), Some(elapsed_ms));
                    let content_hash = content_hash(&body);
                    return Ok(DownloadOutcome::Fetched(FetchedSource {
                        body,
                        content_hash,
                        etag,
                    }));
                }
                Err(err) => {
                    let status = match &err {
                        CompilerError::Network { status, .. } => *status,
                        _ => None,
                    };
                    trace.network_op("GET", location, status, Some(elapsed_ms));

                    if err.is_retryable() && attempt <= self.config.max_retries {
                        let delay = self.retry_delay(attempt);
                        debug!(
                            source = source.id(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying transient download failure"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    warn!(source = source.id(), error = %err, "download failed");
                    return Err(err);
                }
            }
        }
    }

    async fn read_local(&self, source: &SourceConfig) -> Result<DownloadOutcome> {
        let path = source
            .source
            .strip_prefix("file://")
            .unwrap_or(&source.source);
        let body = tokio::fs::read_to_string(path).await?;
        let content_hash = content_hash(&body);
        Ok(DownloadOutcome::Fetched(FetchedSource {
            body,
            content_hash,
            etag: None,
        }))
    }

    /// Exponential backoff with jitter.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << (attempt - 1).min(8));
        let jitter = rand::rng().random_range(0..=base / 2);
        Duration::from_millis(exp + jitter)
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
