//! Per-client fixed-window rate limiting over the key-value store.

use chrono::{TimeDelta, Utc};
use tracing::warn;

use filtrex_model::rate_limit::{RateLimitDecision, RateLimitRule, WindowCounter};

use crate::kv::Kv;

/// Counter entries linger this long past the window end before expiry.
const GRACE_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct RateLimiter {
    kv: Kv,
    rule: RateLimitRule,
}

fn counter_key(client_id: &str) -> String {
    format!("ratelimit:{client_id}")
}

impl RateLimiter {
    pub fn new(kv: Kv, rule: RateLimitRule) -> Self {
        Self { kv, rule }
    }

    pub fn rule(&self) -> RateLimitRule {
        self.rule
    }

    /// Count one request for `client_id` against the current window.
    ///
    /// Storage failures fail open: an unreadable counter must not take the
    /// compile endpoints down with it.
    pub async fn check(&self, client_id: &str) -> RateLimitDecision {
        let key = counter_key(client_id);
        let now = Utc::now();

        let counter = match self.kv.get_json::<WindowCounter>(&key).await {
            Ok(counter) => counter,
            Err(err) => {
                warn!(client = client_id, error = %err, "rate limit read failed; allowing");
                None
            }
        };

        let mut counter = match counter {
            Some(counter) if counter.reset_at > now => counter,
            _ => WindowCounter {
                count: 0,
                reset_at: now
                    + TimeDelta::seconds(self.rule.window_secs as i64),
            },
        };

        counter.count += 1;
        let allowed = counter.count <= self.rule.max_requests;
        let remaining = (counter.reset_at - now)
            .to_std()
            .unwrap_or_default();

        let ttl = remaining + std::time::Duration::from_secs(GRACE_SECS);
        if let Err(err) = self.kv.put_json(&key, &counter, Some(ttl)).await {
            warn!(client = client_id, error = %err, "rate limit write failed");
        }

        RateLimitDecision {
            allowed,
            current_count: counter.count,
            limit: self.rule.max_requests,
            retry_after_secs: (!allowed).then(|| remaining.as_secs().max(1)),
        }
    }
}
