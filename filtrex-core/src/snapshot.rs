//! Per-source snapshot and health tracking.
//!
//! Each download outcome produces a snapshot persisted at
//! `snapshots/sources/<source-id>` and archived into a bounded history
//! ring; every attempt also folds into the rolling health record at
//! `health/sources/<source-id>`.

use chrono::Utc;
use tracing::warn;

use filtrex_model::health::SourceHealthRecord;
use filtrex_model::snapshot::{SNAPSHOT_SAMPLE_SIZE, SnapshotDiff, SourceSnapshot};

use crate::download::{content_hash, count_rules, sample_rules};
use crate::error::Result;
use crate::kv::Kv;

/// Archived snapshots kept per source.
const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct SnapshotTracker {
    kv: Kv,
    history_limit: usize,
}

fn latest_key(source_id: &str) -> String {
    format!("snapshots/sources/{source_id}")
}

fn history_prefix(source_id: &str) -> String {
    format!("snapshots/history/{source_id}/")
}

fn health_key(source_id: &str) -> String {
    format!("health/sources/{source_id}")
}

/// Keys use the source id with path separators flattened so hierarchical
/// listing stays unambiguous.
pub fn sanitize_source_id(source_id: &str) -> String {
    source_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl SnapshotTracker {
    pub fn new(kv: Kv) -> Self {
        Self {
            kv,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub async fn latest(&self, source_id: &str) -> Result<Option<SourceSnapshot>> {
        let source_id = sanitize_source_id(source_id);
        self.kv.get_json(&latest_key(&source_id)).await
    }

    pub async fn health(&self, source_id: &str) -> Result<Option<SourceHealthRecord>> {
        let source_id = sanitize_source_id(source_id);
        self.kv.get_json(&health_key(&source_id)).await
    }

    /// All known health records, for the health endpoint and monitoring
    /// workflow.
    pub async fn all_health(&self) -> Result<Vec<SourceHealthRecord>> {
        let mut records = Vec::new();
        for key in self.kv.list("health/sources/").await? {
            if let Some(record) = self.kv.get_json(&key).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Record a successful fetch: build the snapshot, diff against the
    /// previous one, persist latest + archive, and update health.
    ///
    /// Storage failures are logged and swallowed; snapshot bookkeeping
    /// never fails a download that already succeeded.
    pub async fn record_success(
        &self,
        source_id: &str,
        body: &str,
        etag: Option<&str>,
    ) -> Option<SnapshotDiff> {
        let source_id = sanitize_source_id(source_id);
        let snapshot = SourceSnapshot {
            source_id: source_id.clone(),
            taken_at: Utc::now(),
            content_hash: content_hash(body),
            rule_count: count_rules(body),
            sample: sample_rules(body, SNAPSHOT_SAMPLE_SIZE),
            etag: etag.map(str::to_string),
        };

        let diff = match self.latest(&source_id).await {
            Ok(Some(prev)) => Some(SnapshotDiff::between(&prev, &snapshot)),
            Ok(None) => None,
            Err(err) => {
                warn!(source = %source_id, error = %err, "failed to load previous snapshot");
                None
            }
        };

        if let Err(err) = self.persist_snapshot(&snapshot).await {
            warn!(source = %source_id, error = %err, "failed to persist snapshot");
        }
        self.update_health(&source_id, true).await;
        diff
    }

    /// Record a failed fetch; only health is touched.
    pub async fn record_failure(&self, source_id: &str) {
        let source_id = sanitize_source_id(source_id);
        self.update_health(&source_id, false).await;
    }

    /// Refresh the latest snapshot's timestamp after a `304 Not Modified`
    /// revalidation; hash and rule count stay as they were.
    pub async fn record_unchanged(&self, source_id: &str) {
        let source_id = sanitize_source_id(source_id);
        match self.latest(&source_id).await {
            Ok(Some(mut snapshot)) => {
                snapshot.taken_at = Utc::now();
                if let Err(err) = self
                    .kv
                    .put_json(&latest_key(&source_id), &snapshot, None)
                    .await
                {
                    warn!(source = %source_id, error = %err, "failed to refresh snapshot");
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(source = %source_id, error = %err, "failed to load snapshot for refresh");
            }
        }
        self.update_health(&source_id, true).await;
    }

    async fn persist_snapshot(&self, snapshot: &SourceSnapshot) -> Result<()> {
        let source_id = &snapshot.source_id;
        self.kv
            .put_json(&latest_key(source_id), snapshot, None)
            .await?;

        let archive_key = format!(
            "{}{}",
            history_prefix(source_id),
            snapshot.taken_at.timestamp_millis()
        );
        self.kv.put_json(&archive_key, snapshot, None).await?;
        self.prune_history(source_id).await
    }

    async fn prune_history(&self, source_id: &str) -> Result<()> {
        let keys = self.kv.list(&history_prefix(source_id)).await?;
        if keys.len() <= self.history_limit {
            return Ok(());
        }
        // Keys embed millisecond timestamps; sort numerically so the ring
        // drops the oldest entries first.
        let prefix = history_prefix(source_id);
        let mut stamped: Vec<(i64, String)> = keys
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&prefix)
                    .and_then(|stamp| stamp.parse::<i64>().ok())
                    .map(|stamp| (stamp, key))
            })
            .collect();
        stamped.sort_by_key(|(stamp, _)| *stamp);

        let excess = stamped.len().saturating_sub(self.history_limit);
        for (_, key) in stamped.into_iter().take(excess) {
            self.kv.delete(&key).await?;
        }
        Ok(())
    }

    async fn update_health(&self, source_id: &str, success: bool) {
        let key = health_key(source_id);
        let mut record = match self.kv.get_json::<SourceHealthRecord>(&key).await {
            Ok(Some(record)) => record,
            Ok(None) => SourceHealthRecord::new(source_id),
            Err(err) => {
                warn!(source = %source_id, error = %err, "failed to load health record");
                SourceHealthRecord::new(source_id)
            }
        };
        record.record_attempt(success);
        if let Err(err) = self.kv.put_json(&key, &record, None).await {
            warn!(source = %source_id, error = %err, "failed to persist health record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filtrex_model::health::HealthStatus;

    fn tracker() -> SnapshotTracker {
        SnapshotTracker::new(Kv::in_memory())
    }

    #[tokio::test]
    async fn first_success_creates_latest_snapshot() {
        let tracker = tracker();
        let diff = tracker
            .record_success("easylist", "||a.com^\n||b.com^\n", Some("\"v1\""))
            .await;
        assert!(diff.is_none());

        let snapshot = tracker.latest("easylist").await.unwrap().unwrap();
        assert_eq!(snapshot.rule_count, 2);
        assert_eq!(snapshot.etag.as_deref(), Some("\"v1\""));
        assert_eq!(snapshot.sample, vec!["||a.com^", "||b.com^"]);
    }

    #[tokio::test]
    async fn diff_tracks_hash_and_count_changes() {
        let tracker = tracker();
        tracker.record_success("s", "||a.com^\n", None).await;
        let diff = tracker
            .record_success("s", "||a.com^\n||b.com^\n", None)
            .await
            .unwrap();
        assert!(diff.has_changed);
        assert_eq!(diff.rule_count_delta, 1);
        assert_eq!(diff.rule_count_change_percent, 100.0);

        let diff = tracker
            .record_success("s", "||a.com^\n||b.com^\n", None)
            .await
            .unwrap();
        assert!(!diff.has_changed);
        assert_eq!(diff.rule_count_delta, 0);
    }

    #[tokio::test]
    async fn unchanged_refreshes_timestamp_but_not_hash() {
        let tracker = tracker();
        tracker.record_success("s", "||a.com^\n", None).await;
        let before = tracker.latest("s").await.unwrap().unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        tracker.record_unchanged("s").await;

        let after = tracker.latest("s").await.unwrap().unwrap();
        assert_eq!(after.content_hash, before.content_hash);
        assert_eq!(after.rule_count, before.rule_count);
        assert!(after.taken_at >= before.taken_at);
    }

    #[tokio::test]
    async fn history_ring_is_bounded() {
        let kv = Kv::in_memory();
        let tracker = SnapshotTracker::new(kv.clone()).with_history_limit(3);
        for i in 0..6 {
            tracker
                .record_success("s", &format!("||rule{i}.com^\n"), None)
                .await;
            // Distinct archive timestamps.
            tokio::time::sleep(std::time::Duration::from_millis(3)).await;
        }
        let keys = kv.list("snapshots/history/s/").await.unwrap();
        assert_eq!(keys.len(), 3);
    }

    #[tokio::test]
    async fn health_degrades_after_consecutive_failures() {
        let tracker = tracker();
        for _ in 0..7 {
            tracker.record_success("s", "||a.com^\n", None).await;
        }
        for _ in 0..3 {
            tracker.record_failure("s").await;
        }

        let record = tracker.health("s").await.unwrap().unwrap();
        assert_eq!(record.consecutive_failures, 3);
        assert_eq!(record.total_attempts, 10);
        assert_eq!(record.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn source_ids_are_sanitized_for_keys() {
        let tracker = tracker();
        tracker
            .record_success("https://example.com/list.txt", "||a.com^\n", None)
            .await;
        let keys = tracker.kv.list("snapshots/sources/").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(!keys[0].contains("//"));
    }
}
