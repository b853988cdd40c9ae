use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of leading rules kept as a sample in each snapshot.
pub const SNAPSHOT_SAMPLE_SIZE: usize = 10;

/// Immutable record of one successful fetch of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSnapshot {
    pub source_id: String,
    pub taken_at: DateTime<Utc>,
    pub content_hash: String,
    pub rule_count: usize,
    /// First rules of the body, for quick eyeballing of format drift.
    pub sample: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Change summary between two consecutive snapshots of one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDiff {
    pub has_changed: bool,
    pub rule_count_delta: i64,
    pub rule_count_change_percent: f64,
}

impl SnapshotDiff {
    pub fn between(prev: &SourceSnapshot, curr: &SourceSnapshot) -> Self {
        let delta = curr.rule_count as i64 - prev.rule_count as i64;
        Self {
            has_changed: prev.content_hash != curr.content_hash,
            rule_count_delta: delta,
            rule_count_change_percent: 100.0 * delta as f64
                / prev.rule_count.max(1) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(hash: &str, count: usize) -> SourceSnapshot {
        SourceSnapshot {
            source_id: "easylist".to_string(),
            taken_at: Utc::now(),
            content_hash: hash.to_string(),
            rule_count: count,
            sample: Vec::new(),
            etag: None,
        }
    }

    #[test]
    fn unchanged_hash_means_no_change() {
        let diff = SnapshotDiff::between(&snapshot("abc", 100), &snapshot("abc", 100));
        assert!(!diff.has_changed);
        assert_eq!(diff.rule_count_delta, 0);
        assert_eq!(diff.rule_count_change_percent, 0.0);
    }

    #[test]
    fn delta_and_percent_track_rule_count() {
        let diff = SnapshotDiff::between(&snapshot("abc", 200), &snapshot("def", 150));
        assert!(diff.has_changed);
        assert_eq!(diff.rule_count_delta, -50);
        assert_eq!(diff.rule_count_change_percent, -25.0);
    }

    #[test]
    fn empty_previous_snapshot_uses_unit_denominator() {
        let diff = SnapshotDiff::between(&snapshot("abc", 0), &snapshot("def", 5));
        assert_eq!(diff.rule_count_delta, 5);
        assert_eq!(diff.rule_count_change_percent, 500.0);
    }
}
