//! Background job: hourly rate-limiter bucket and response-cache eviction.
//!
//! Grounded in the teacher's `jobs::cleanup::spawn` interval-task shape.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time;

use crate::cache::ResponseCache;
use crate::rate_limiter::RateLimiter;

const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Spawn the background sweep task. Call this once at startup.
pub fn spawn(rate_limiter: Arc<RateLimiter>, cache: Arc<ResponseCache>) {
    tokio::spawn(async move {
        let mut interval = time::interval(SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            rate_limiter.sweep();
            cache.evict_expired(Instant::now());
            tracing::debug!("sweep job completed");
        }
    });
}
