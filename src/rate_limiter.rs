//! Token-bucket rate limiter, keyed by client identity.
//!
//! Refill is tied to discrete intervals (`refill_interval_ms`) rather than a
//! continuous rate, so that under steady low-traffic load the refill amount
//! is deterministic and test-observable (spec TB3).

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::clock::Clock;

#[derive(Debug, Clone, Copy)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Read-only projection of a bucket's state, safe to hand back to callers
/// without exposing internal mutability.
#[derive(Debug, Clone, Copy)]
pub struct BucketStatus {
    pub remaining: f64,
    pub max_tokens: f64,
    /// Milliseconds until the next refill tick would add tokens.
    pub reset_in_ms: u64,
}

pub struct RateLimiter {
    buckets: DashMap<String, TokenBucket>,
    max_tokens: f64,
    refill_rate: f64,
    refill_interval_ms: u64,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(max_tokens: u64, refill_rate: u64, refill_interval_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: DashMap::new(),
            max_tokens: max_tokens as f64,
            refill_rate: refill_rate as f64,
            refill_interval_ms: refill_interval_ms.max(1),
            clock,
        }
    }

    /// Advance `bucket` to `now`, applying the floor-based refill rule.
    fn refill(&self, bucket: &mut TokenBucket, now: Instant) {
        let elapsed_ms = now.saturating_duration_since(bucket.last_refill).as_millis() as u64;
        let intervals = elapsed_ms / self.refill_interval_ms;
        if intervals > 0 {
            let add = intervals as f64 * self.refill_rate;
            bucket.tokens = (bucket.tokens + add).min(self.max_tokens);
            bucket.last_refill = now;
        }
    }

    /// Attempt to consume `cost` tokens for `identity`. Returns `true` iff
    /// enough tokens were available, in which case they are deducted.
    pub fn try_consume(&self, identity: &str, cost: f64) -> bool {
        let now = self.clock.now();
        let mut entry = self.buckets.entry(identity.to_string()).or_insert(TokenBucket {
            tokens: self.max_tokens,
            last_refill: now,
        });

        self.refill(&mut entry, now);

        if entry.tokens >= cost {
            entry.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Read-only projection; does not mutate bucket state (no refill applied
    /// so that repeated `status()` calls are idempotent).
    pub fn status(&self, identity: &str) -> BucketStatus {
        let now = self.clock.now();
        match self.buckets.get(identity) {
            Some(bucket) => {
                let elapsed_ms = now.saturating_duration_since(bucket.last_refill).as_millis() as u64;
                let remainder_ms = elapsed_ms % self.refill_interval_ms;
                let reset_in_ms = self.refill_interval_ms.saturating_sub(remainder_ms);
                BucketStatus {
                    remaining: bucket.tokens,
                    max_tokens: self.max_tokens,
                    reset_in_ms,
                }
            }
            None => BucketStatus {
                remaining: self.max_tokens,
                max_tokens: self.max_tokens,
                reset_in_ms: self.refill_interval_ms,
            },
        }
    }

    pub fn reset(&self, identity: &str) {
        self.buckets.remove(identity);
    }

    /// Remove buckets untouched for 24 hours or more. Invoked periodically
    /// from a background task, never from the request path.
    pub fn sweep(&self) {
        let now = self.clock.now();
        let max_age_ms: u64 = 24 * 60 * 60 * 1000;
        self.buckets.retain(|_, bucket| {
            now.saturating_duration_since(bucket.last_refill).as_millis() as u64 <= max_age_ms
        });
    }

    /// Number of distinct identities with a live bucket. Sampled by the
    /// EventBus monitoring snapshot.
    pub fn active_identities(&self) -> usize {
        self.buckets.len()
    }
}

/// Per-endpoint token cost: base 1, chat/messages endpoints 5, POST doubles
/// the cost.
pub fn token_cost(upstream_path: &str, method: &axum::http::Method) -> f64 {
    let base: f64 = if upstream_path.ends_with("/chat/completions") || upstream_path.ends_with("/messages") {
        5.0
    } else {
        1.0
    };
    if method == axum::http::Method::POST {
        base * 2.0
    } else {
        base
    }
}
