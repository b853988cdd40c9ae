//! Single-flight coalescing of concurrent identical compilations.
//!
//! Requests are keyed by configuration fingerprint; the first request for a
//! fingerprint becomes the leader and every overlapping request joins its
//! shared future, so the pipeline runs exactly once and all callers observe
//! the same result. Entries are removed as soon as the flight completes.
//!
//! Coalescing is skipped by the caller when pre-fetched content is present,
//! since bodies may differ despite identical configurations.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use filtrex_model::api::CompilationResult;

use crate::error::CompilerError;

/// Shared outcome of one coalesced flight. The error side is stringly
/// typed because [`CompilerError`] is not `Clone`.
pub type SharedOutcome = Arc<std::result::Result<CompilationResult, String>>;

type FlightFuture = Shared<BoxFuture<'static, SharedOutcome>>;

/// Handle returned to each caller of [`InflightCoalescer::join`].
pub struct CoalescedCompile {
    future: FlightFuture,
    /// True when this caller joined an already-running flight.
    pub coalesced: bool,
}

impl std::fmt::Debug for CoalescedCompile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoalescedCompile")
            .field("coalesced", &self.coalesced)
            .finish()
    }
}

impl CoalescedCompile {
    pub async fn outcome(self) -> crate::error::Result<CompilationResult> {
        match self.future.await.as_ref() {
            Ok(result) => Ok(result.clone()),
            Err(message) => Err(CompilerError::Internal(message.clone())),
        }
    }
}

#[derive(Default)]
pub struct InflightCoalescer {
    flights: Arc<DashMap<String, FlightFuture>>,
}

impl std::fmt::Debug for InflightCoalescer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InflightCoalescer")
            .field("in_flight", &self.flights.len())
            .finish()
    }
}

impl InflightCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Join the flight for `fingerprint`, starting it with `compile` when
    /// no flight is running.
    pub fn join<F>(&self, fingerprint: &str, compile: impl FnOnce() -> F) -> CoalescedCompile
    where
        F: Future<Output = crate::error::Result<CompilationResult>> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        match self.flights.entry(fingerprint.to_string()) {
            Entry::Occupied(existing) => CoalescedCompile {
                future: existing.get().clone(),
                coalesced: true,
            },
            Entry::Vacant(slot) => {
                let flights = Arc::clone(&self.flights);
                let key = fingerprint.to_string();
                let inner = compile();
                let future: FlightFuture = async move {
                    let outcome = inner.await.map_err(|err| err.to_string());
                    flights.remove(&key);
                    Arc::new(outcome)
                }
                .boxed()
                .shared();
                slot.insert(future.clone());
                CoalescedCompile {
                    future,
                    coalesced: false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use filtrex_model::api::CompilationMetrics;

    fn result(rules: &[&str]) -> CompilationResult {
        CompilationResult {
            rules: rules.iter().map(|s| s.to_string()).collect(),
            rule_count: rules.len(),
            metrics: CompilationMetrics {
                total_duration_ms: 0,
                download_duration_ms: 0,
                transform_duration_ms: 0,
                sources: Vec::new(),
            },
            compiled_at: Utc::now(),
            previous_version: None,
        }
    }

    #[tokio::test]
    async fn overlapping_requests_run_the_pipeline_once() {
        let coalescer = Arc::new(InflightCoalescer::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            let flight = coalescer.join("fp", move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(result(&["||a.com^"]))
            });
            handles.push(tokio::spawn(flight.outcome()));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| o.rules == outcomes[0].rules));
    }

    #[tokio::test]
    async fn joiners_are_flagged_as_coalesced() {
        let coalescer = InflightCoalescer::new();
        let leader = coalescer.join("fp", || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(result(&["r"]))
        });
        let joiner = coalescer.join("fp", || async { Ok(result(&["other"])) });

        assert!(!leader.coalesced);
        assert!(joiner.coalesced);

        let (a, b) = tokio::join!(leader.outcome(), joiner.outcome());
        assert_eq!(a.unwrap().rules, b.unwrap().rules);
    }

    #[tokio::test]
    async fn entries_are_removed_after_completion() {
        let coalescer = InflightCoalescer::new();
        let flight = coalescer.join("fp", || async { Ok(result(&["r"])) });
        assert_eq!(coalescer.in_flight(), 1);

        flight.outcome().await.unwrap();
        assert_eq!(coalescer.in_flight(), 0);

        // A later request starts a fresh flight.
        let fresh = coalescer.join("fp", || async { Ok(result(&["r2"])) });
        assert!(!fresh.coalesced);
        assert_eq!(fresh.outcome().await.unwrap().rules, vec!["r2"]);
    }

    #[tokio::test]
    async fn errors_are_shared_with_all_joiners() {
        let coalescer = InflightCoalescer::new();
        let leader = coalescer.join("fp", || async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(CompilerError::Configuration("no sources".to_string()))
        });
        let joiner = coalescer.join("fp", || async { Ok(result(&["unused"])) });

        let (a, b) = tokio::join!(leader.outcome(), joiner.outcome());
        assert!(a.is_err());
        assert!(b.is_err());
    }
}
