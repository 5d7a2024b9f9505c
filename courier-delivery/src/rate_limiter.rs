//! Global admission control using a token bucket
//!
//! One bucket is shared by every dispatch. Each admitted dispatch consumes a
//! token; once the bucket is empty, dispatches are denied until the next
//! refill boundary.
//!
//! # Refill
//!
//! A background task resets the bucket to `capacity` every
//! `refill_interval`. Unused tokens do not carry over, so at most `capacity`
//! dispatches are admitted per interval.
//!
//! ```text
//! capacity: 5, refill_interval: 60s
//! t=0s:   5 tokens
//! t=10s:  5 dispatches admitted, 0 tokens
//! t=20s:  denied
//! t=60s:  refilled to 5
//! ```

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use courier_common::tracing;
use serde::{Deserialize, Serialize};
use tokio::{task::JoinHandle, time::Instant};

/// Configuration for rate limiting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Dispatches admitted per refill interval
    #[serde(default = "default_capacity")]
    pub capacity: u32,

    /// Time between refills (milliseconds)
    #[serde(default = "default_refill_interval_ms")]
    pub refill_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            refill_interval_ms: default_refill_interval_ms(),
        }
    }
}

const fn default_capacity() -> u32 {
    5
}

const fn default_refill_interval_ms() -> u64 {
    60_000
}

#[derive(Debug)]
struct TokenBucket {
    tokens: u32,
    capacity: u32,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity,
            capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        self.tokens = self.capacity;
        self.last_refill = Instant::now();
    }
}

/// Shared token bucket with a background refill task
///
/// Must be created inside a Tokio runtime. The refill task stops when the
/// limiter is dropped.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Arc<parking_lot::Mutex<TokenBucket>>,
    refill_interval: Duration,
    refill_task: JoinHandle<()>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let bucket = Arc::new(parking_lot::Mutex::new(TokenBucket::new(config.capacity)));
        // A zero period would make the interval panic
        let refill_interval = Duration::from_millis(config.refill_interval_ms.max(1));
        let refill_task = tokio::spawn(Self::refill_loop(
            Arc::downgrade(&bucket),
            refill_interval,
        ));

        Self {
            bucket,
            refill_interval,
            refill_task,
        }
    }

    async fn refill_loop(bucket: Weak<parking_lot::Mutex<TokenBucket>>, period: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let Some(bucket) = bucket.upgrade() else {
                break;
            };
            bucket.lock().refill();
            tracing::trace!("Rate limiter refilled");
        }
    }

    /// Take a token if one is available
    pub fn try_acquire(&self) -> bool {
        let acquired = self.bucket.lock().try_consume();

        if !acquired {
            tracing::info!(
                refill_interval_ms = self.refill_interval.as_millis(),
                "Rate limit exceeded, dispatch denied until next refill"
            );
        }
        acquired
    }

    pub fn get_stats(&self) -> RateLimitStats {
        let bucket = self.bucket.lock();
        RateLimitStats {
            available_tokens: bucket.tokens,
            capacity: bucket.capacity,
            refill_interval: self.refill_interval,
            next_refill_at: bucket.last_refill + self.refill_interval,
        }
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        self.refill_task.abort();
    }
}

/// Statistics for the shared bucket
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    pub available_tokens: u32,
    pub capacity: u32,
    pub refill_interval: Duration,
    /// Approximate time of the next refill
    pub next_refill_at: Instant,
}
