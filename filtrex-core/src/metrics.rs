//! Trailing-window request metrics backing the `/metrics` endpoint.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use filtrex_model::api::{EndpointMetrics, MetricsResponse};

/// Request outcome bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestOutcome {
    Success,
    Error,
    RateLimited,
    CacheHit,
    Coalesced,
    Cancelled,
}

impl RequestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::Error => "error",
            RequestOutcome::RateLimited => "rate-limited",
            RequestOutcome::CacheHit => "cache-hit",
            RequestOutcome::Coalesced => "coalesced",
            RequestOutcome::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
struct Sample {
    at: Instant,
    endpoint: &'static str,
    outcome: RequestOutcome,
    duration: Duration,
}

/// Rolling counters over a trailing window (default 30 minutes). Samples
/// are pruned lazily on read and write.
#[derive(Debug)]
pub struct MetricsRecorder {
    window: Duration,
    samples: Mutex<Vec<Sample>>,
}

impl MetricsRecorder {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, endpoint: &'static str, outcome: RequestOutcome, duration: Duration) {
        let now = Instant::now();
        if let Ok(mut samples) = self.samples.lock() {
            samples.retain(|sample| now.duration_since(sample.at) < self.window);
            samples.push(Sample {
                at: now,
                endpoint,
                outcome,
                duration,
            });
        }
    }

    pub fn snapshot(&self) -> MetricsResponse {
        let now = Instant::now();
        let mut grouped: BTreeMap<(&'static str, RequestOutcome), (u64, u64, u64)> =
            BTreeMap::new();

        if let Ok(mut samples) = self.samples.lock() {
            samples.retain(|sample| now.duration_since(sample.at) < self.window);
            for sample in samples.iter() {
                let entry = grouped
                    .entry((sample.endpoint, sample.outcome))
                    .or_insert((0, 0, 0));
                let millis = sample.duration.as_millis() as u64;
                entry.0 += 1;
                entry.1 += millis;
                entry.2 = entry.2.max(millis);
            }
        }

        MetricsResponse {
            window_secs: self.window.as_secs(),
            entries: grouped
                .into_iter()
                .map(|((endpoint, outcome), (count, total_ms, max_ms))| EndpointMetrics {
                    endpoint: endpoint.to_string(),
                    outcome: outcome.as_str().to_string(),
                    count,
                    avg_duration_ms: total_ms / count.max(1),
                    max_duration_ms: max_ms,
                })
                .collect(),
        }
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new(Duration::from_secs(30 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_by_endpoint_and_outcome() {
        let recorder = MetricsRecorder::default();
        recorder.record("compile", RequestOutcome::Success, Duration::from_millis(10));
        recorder.record("compile", RequestOutcome::Success, Duration::from_millis(30));
        recorder.record("compile", RequestOutcome::Error, Duration::from_millis(5));
        recorder.record("batch", RequestOutcome::Success, Duration::from_millis(50));

        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.entries.len(), 3);

        let success = snapshot
            .entries
            .iter()
            .find(|e| e.endpoint == "compile" && e.outcome == "success")
            .unwrap();
        assert_eq!(success.count, 2);
        assert_eq!(success.avg_duration_ms, 20);
        assert_eq!(success.max_duration_ms, 30);
    }

    #[test]
    fn samples_age_out_of_the_window() {
        let recorder = MetricsRecorder::new(Duration::from_millis(20));
        recorder.record("compile", RequestOutcome::Success, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(40));
        assert!(recorder.snapshot().entries.is_empty());
    }
}
