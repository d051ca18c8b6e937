//! Token-bucket rate limiting.
//!
//! Two independent buckets gate each acquisition: a global bucket and a
//! per-channel bucket held in a bounded LRU map. Refills are computed from
//! monotonic clock deltas. When tokens are short, the mutex is released
//! before sleeping and reacquired on wake to consume; the lock is never held
//! across a sleep.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

/// Idle channels older than this are dropped by the sweep.
const BUCKET_TTL: Duration = Duration::from_secs(600);

/// Upper bound on tracked channels; least recently used fall off first.
const MAX_CHANNEL_BUCKETS: usize = 5000;

struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn full(rate: f64) -> Self {
        Self {
            tokens: rate,
            last_update: Instant::now(),
        }
    }

    /// Refill from the monotonic clock; capacity equals the rate.
    fn refill(&mut self, rate: f64, now: Instant) {
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(rate);
        self.last_update = now;
    }

    /// Seconds until one token is available at the given rate.
    fn wait_for_one(&self, rate: f64) -> f64 {
        if self.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.tokens) / rate
        }
    }
}

struct Inner {
    global: Bucket,
    channels: LruCache<String, Bucket>,
}

/// Approximate token counts for diagnostics; values may change concurrently.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub global_tokens: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_tokens: Option<f64>,
    pub tracked_channels: usize,
}

pub struct RateLimiter {
    global_rate: f64,
    channel_rate: f64,
    inner: Mutex<Inner>,
}

impl RateLimiter {
    pub fn new(global_rate: u32, channel_rate: u32) -> Self {
        let global_rate = f64::from(global_rate.max(1));
        Self {
            global_rate,
            channel_rate: f64::from(channel_rate.max(1)),
            inner: Mutex::new(Inner {
                global: Bucket::full(global_rate),
                channels: LruCache::new(
                    NonZeroUsize::new(MAX_CHANNEL_BUCKETS).expect("bucket bound is nonzero"),
                ),
            }),
        }
    }

    /// Take one token from the global bucket and one from the channel
    /// bucket, sleeping (without any lock held) until both are available.
    pub async fn acquire(&self, channel_id: &str) {
        loop {
            let wait_secs = {
                let mut inner = self.inner.lock();
                let now = Instant::now();

                inner.global.refill(self.global_rate, now);
                if inner.channels.get(channel_id).is_none() {
                    inner
                        .channels
                        .put(channel_id.to_string(), Bucket::full(self.channel_rate));
                }
                let channel = inner
                    .channels
                    .get_mut(channel_id)
                    .expect("bucket was just inserted");
                channel.refill(self.channel_rate, now);

                let global_wait = inner.global.wait_for_one(self.global_rate);
                let channel = inner
                    .channels
                    .get(channel_id)
                    .expect("bucket was just refilled");
                let channel_wait = channel.wait_for_one(self.channel_rate);

                let wait = global_wait.max(channel_wait);
                if wait <= 0.0 {
                    inner.global.tokens -= 1.0;
                    inner
                        .channels
                        .get_mut(channel_id)
                        .expect("bucket exists")
                        .tokens -= 1.0;
                    return;
                }
                wait
            };

            debug!(wait_secs, "Rate limit reached, waiting");
            tokio::time::sleep(Duration::from_secs_f64(wait_secs)).await;
        }
    }

    /// Drop channel buckets idle past the TTL. Returns how many were removed.
    pub fn sweep_stale(&self) -> usize {
        let mut inner = self.inner.lock();
        let cutoff = Instant::now() - BUCKET_TTL;
        let stale: Vec<String> = inner
            .channels
            .iter()
            .filter(|(_, bucket)| bucket.last_update < cutoff)
            .map(|(channel, _)| channel.clone())
            .collect();
        for channel in &stale {
            inner.channels.pop(channel);
        }
        stale.len()
    }

    /// Advertised-approximate counters for the admin surface.
    pub fn snapshot(&self, channel_id: Option<&str>) -> RateLimiterSnapshot {
        let mut inner = self.inner.lock();
        RateLimiterSnapshot {
            global_tokens: inner.global.tokens,
            channel_tokens: channel_id
                .and_then(|channel| inner.channels.get(channel).map(|bucket| bucket.tokens)),
            tracked_channels: inner.channels.len(),
        }
    }

    /// Reset every bucket to full capacity.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.global = Bucket::full(self.global_rate);
        inner.channels.clear();
        debug!("Rate limiter reset to full capacity");
    }
}
