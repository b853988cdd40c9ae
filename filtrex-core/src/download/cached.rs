//! TTL cache and revalidation wrapper around the [`Downloader`].
//!
//! Lookup order: fresh cache entry, then origin with the last-known ETag,
//! then the stale copy as a degraded fallback when health monitoring is
//! enabled. At most one download per source key is in flight at a time.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use filtrex_model::config::SourceConfig;
use filtrex_model::diagnostics::CacheOperation;

use crate::download::{DownloadOutcome, Downloader, source_fingerprint};
use crate::error::Result;
use crate::kv::Kv;
use crate::snapshot::SnapshotTracker;
use crate::trace::TraceContext;

/// How long the stale copy outlives the fresh entry. Bounds rule-body
/// retention while keeping a revalidation/fallback body available.
const STALE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub enabled: bool,
    pub ttl: Duration,
    pub detect_changes: bool,
    pub monitor_health: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            detect_changes: true,
            monitor_health: true,
        }
    }
}

/// Persisted per-source body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedBody {
    body: String,
    content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    etag: Option<String>,
}

/// A source body handed to the pipeline, with cache provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedSource {
    pub body: String,
    pub content_hash: String,
    pub from_cache: bool,
    /// Set when a stale entry was served because the origin failed.
    pub degraded: bool,
}

pub struct CachingDownloader {
    downloader: Arc<Downloader>,
    kv: Kv,
    tracker: SnapshotTracker,
    options: CacheOptions,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for CachingDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingDownloader")
            .field("options", &self.options)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

fn fresh_key(location: &str) -> String {
    format!("cache:filters:{}", source_fingerprint(location))
}

fn stale_key(location: &str) -> String {
    format!("cache:filters:{}:stale", source_fingerprint(location))
}

impl CachingDownloader {
    pub fn new(
        downloader: Arc<Downloader>,
        kv: Kv,
        tracker: SnapshotTracker,
        options: CacheOptions,
    ) -> Self {
        Self {
            downloader,
            kv,
            tracker,
            options,
            in_flight: DashMap::new(),
        }
    }

    pub fn tracker(&self) -> &SnapshotTracker {
        &self.tracker
    }

    /// Fetch a source body, consulting the cache first.
    pub async fn download(
        &self,
        source: &SourceConfig,
        trace: &TraceContext,
    ) -> Result<DownloadedSource> {
        let key = fresh_key(&source.source);

        if let Some(hit) = self.cache_lookup(&key, trace).await {
            return Ok(hit);
        }

        // Per-key single flight: a second request for the same source waits
        // for the leader and then re-reads the cache.
        let flight = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = flight.lock().await;

        let result = async {
            if let Some(hit) = self.cache_lookup(&key, trace).await {
                return Ok(hit);
            }
            self.download_origin(source, trace).await
        }
        .await;

        self.in_flight.remove(&key);
        result
    }

    async fn cache_lookup(&self, key: &str, trace: &TraceContext) -> Option<DownloadedSource> {
        if !self.options.enabled {
            return None;
        }
        // A storage read failure downgrades to a cache miss.
        match self.kv.get_json::<CachedBody>(key).await {
            Ok(Some(cached)) => {
                trace.cache_op(CacheOperation::Hit, key);
                Some(DownloadedSource {
                    body: cached.body,
                    content_hash: cached.content_hash,
                    from_cache: true,
                    degraded: false,
                })
            }
            Ok(None) => {
                trace.cache_op(CacheOperation::Miss, key);
                None
            }
            Err(err) => {
                warn!(key, error = %err, "cache read failed; treating as miss");
                trace.cache_op(CacheOperation::Miss, key);
                None
            }
        }
    }

    async fn download_origin(
        &self,
        source: &SourceConfig,
        trace: &TraceContext,
    ) -> Result<DownloadedSource> {
        let stale = self.load_stale(source).await;

        // Only revalidate when a body is still on hand: a 304 without a
        // cached body would strand us, so an evicted entry is a fresh miss.
        let etag = if self.options.detect_changes && stale.is_some() {
            match self.tracker.latest(source.id()).await {
                Ok(Some(snapshot)) => snapshot.etag,
                _ => None,
            }
        } else {
            None
        };

        let outcome = self
            .downloader
            .download(source, etag.as_deref(), trace)
            .await;

        match outcome {
            Ok(DownloadOutcome::Fetched(fetched)) => {
                let cached = CachedBody {
                    body: fetched.body,
                    content_hash: fetched.content_hash,
                    etag: fetched.etag,
                };
                self.persist(source, &cached, trace).await;
                if self.options.detect_changes || self.options.monitor_health {
                    self.tracker
                        .record_success(source.id(), &cached.body, cached.etag.as_deref())
                        .await;
                }
                Ok(DownloadedSource {
                    body: cached.body,
                    content_hash: cached.content_hash,
                    from_cache: false,
                    degraded: false,
                })
            }
            Ok(DownloadOutcome::Unchanged) => match stale {
                Some(cached) => {
                    debug!(source = source.id(), "origin revalidated cached body");
                    self.persist(source, &cached, trace).await;
                    self.tracker.record_unchanged(source.id()).await;
                    Ok(DownloadedSource {
                        body: cached.body,
                        content_hash: cached.content_hash,
                        from_cache: true,
                        degraded: false,
                    })
                }
                // An origin answering 304 to an unconditional GET; retry
                // once without any validator.
                None => match self.downloader.download(source, None, trace).await? {
                    DownloadOutcome::Fetched(fetched) => {
                        let cached = CachedBody {
                            body: fetched.body,
                            content_hash: fetched.content_hash,
                            etag: fetched.etag,
                        };
                        self.persist(source, &cached, trace).await;
                        self.tracker
                            .record_success(source.id(), &cached.body, cached.etag.as_deref())
                            .await;
                        Ok(DownloadedSource {
                            body: cached.body,
                            content_hash: cached.content_hash,
                            from_cache: false,
                            degraded: false,
                        })
                    }
                    DownloadOutcome::Unchanged => Err(crate::error::CompilerError::Source {
                        source_id: source.id().to_string(),
                        message: "origin replied 304 to an unconditional request".to_string(),
                    }),
                },
            },
            Err(err) => {
                if self.options.monitor_health {
                    self.tracker.record_failure(source.id()).await;
                }
                if self.options.monitor_health
                    && let Some(cached) = stale
                {
                    warn!(
                        source = source.id(),
                        error = %err,
                        "origin failed; serving stale cached body"
                    );
                    return Ok(DownloadedSource {
                        body: cached.body,
                        content_hash: cached.content_hash,
                        from_cache: true,
                        degraded: true,
                    });
                }
                Err(err)
            }
        }
    }

    async fn load_stale(&self, source: &SourceConfig) -> Option<CachedBody> {
        if !self.options.enabled {
            return None;
        }
        self.kv
            .get_json::<CachedBody>(&stale_key(&source.source))
            .await
            .ok()
            .flatten()
    }

    /// Cache writes log and continue; they never fail the download.
    async fn persist(&self, source: &SourceConfig, cached: &CachedBody, trace: &TraceContext) {
        if !self.options.enabled {
            return;
        }
        let key = fresh_key(&source.source);
        if let Err(err) = self
            .kv
            .put_json(&key, cached, Some(self.options.ttl))
            .await
        {
            warn!(key, error = %err, "cache write failed");
            return;
        }
        trace.cache_op(CacheOperation::Write, &key);
        if let Err(err) = self
            .kv
            .put_json(&stale_key(&source.source), cached, Some(STALE_TTL))
            .await
        {
            warn!(error = %err, "stale copy write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{DownloaderConfig, FetchResponse};
    use crate::error::CompilerError;
    use crate::testutil::{ScriptedTransport, body};

    fn quick_config() -> DownloaderConfig {
        DownloaderConfig {
            timeout: Duration::from_secs(5),
            max_retries: 0,
            backoff_base: Duration::from_millis(1),
        }
    }

    fn cached(
        transport: Arc<ScriptedTransport>,
        kv: Kv,
        options: CacheOptions,
    ) -> CachingDownloader {
        let downloader = Arc::new(Downloader::new(transport, quick_config()));
        let tracker = SnapshotTracker::new(kv.clone());
        CachingDownloader::new(downloader, kv, tracker, options)
    }

    fn source() -> SourceConfig {
        let mut source = SourceConfig::new("https://filters.example.com/list.txt");
        source.name = Some("easylist".to_string());
        source
    }

    #[tokio::test]
    async fn second_download_is_served_from_cache() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(body("||a.com^\n", None))]));
        let dl = cached(transport.clone(), Kv::in_memory(), CacheOptions::default());
        let trace = TraceContext::noop();

        let first = dl.download(&source(), &trace).await.unwrap();
        assert!(!first.from_cache);

        let second = dl.download(&source(), &trace).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.body, first.body);
        // The origin was consulted exactly once.
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn expired_entry_revalidates_with_etag() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(body("||a.com^\n", Some("\"v1\""))),
            Ok(FetchResponse::NotModified),
        ]));
        let options = CacheOptions {
            ttl: Duration::from_millis(20),
            ..CacheOptions::default()
        };
        let dl = cached(transport.clone(), Kv::in_memory(), options);
        let trace = TraceContext::noop();

        let first = dl.download(&source(), &trace).await.unwrap();
        assert!(!first.from_cache);
        let snapshot_before = dl.tracker().latest("easylist").await.unwrap().unwrap();

        // Let the fresh entry lapse, then compile again: the origin sees the
        // validator, answers 304, and the cached body is reused.
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = dl.download(&source(), &trace).await.unwrap();
        assert!(second.from_cache);
        assert!(!second.degraded);
        assert_eq!(second.body, first.body);

        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![None, Some("\"v1\"".to_string())]);

        // Snapshot refreshed, hash unchanged.
        let snapshot_after = dl.tracker().latest("easylist").await.unwrap().unwrap();
        assert_eq!(snapshot_after.content_hash, snapshot_before.content_hash);
        assert!(snapshot_after.taken_at >= snapshot_before.taken_at);
    }

    #[tokio::test]
    async fn origin_failure_serves_stale_body_as_degraded() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(body("||a.com^\n", None)),
            Err(CompilerError::network(Some(500), "origin down")),
        ]));
        let options = CacheOptions {
            ttl: Duration::from_millis(20),
            ..CacheOptions::default()
        };
        let dl = cached(transport.clone(), Kv::in_memory(), options);
        let trace = TraceContext::noop();

        dl.download(&source(), &trace).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fallback = dl.download(&source(), &trace).await.unwrap();
        assert!(fallback.from_cache);
        assert!(fallback.degraded);
        assert_eq!(fallback.body, "||a.com^\n");

        let health = dl.tracker().health("easylist").await.unwrap().unwrap();
        assert_eq!(health.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn failure_without_stale_body_propagates() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(CompilerError::network(
            Some(404),
            "gone",
        ))]));
        let dl = cached(transport, Kv::in_memory(), CacheOptions::default());
        let err = dl
            .download(&source(), &TraceContext::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, CompilerError::Network { status: Some(404), .. }));
    }

    #[tokio::test]
    async fn disabled_cache_always_hits_origin() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(body("one\n", None)),
            Ok(body("two\n", None)),
        ]));
        let options = CacheOptions {
            enabled: false,
            ..CacheOptions::default()
        };
        let dl = cached(transport.clone(), Kv::in_memory(), options);
        let trace = TraceContext::noop();

        let first = dl.download(&source(), &trace).await.unwrap();
        let second = dl.download(&source(), &trace).await.unwrap();
        assert_eq!(first.body, "one\n");
        assert_eq!(second.body, "two\n");
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn no_validator_is_sent_after_eviction() {
        let kv = Kv::in_memory();
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(body("||a.com^\n", Some("\"v1\""))),
            Ok(body("||a.com^\n||b.com^\n", Some("\"v2\""))),
        ]));
        let options = CacheOptions {
            ttl: Duration::from_millis(10),
            ..CacheOptions::default()
        };
        let dl = cached(transport.clone(), kv.clone(), options);
        let trace = TraceContext::noop();

        dl.download(&source(), &trace).await.unwrap();

        // Evict both copies: the snapshot still remembers the ETag, but with
        // no body to revalidate the next fetch must be unconditional.
        tokio::time::sleep(Duration::from_millis(20)).await;
        kv.delete(&stale_key("https://filters.example.com/list.txt"))
            .await
            .unwrap();

        let second = dl.download(&source(), &trace).await.unwrap();
        assert!(!second.from_cache);

        let calls = transport.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![None, None]);
    }
}
