//! Byte-oriented rate limiting
//!
//! Token bucket over data bytes. Each worker owns one limiter and reports
//! batches of written bytes after the fact; the limiter sleeps the calling
//! worker just long enough to keep the rolling rate at or below the
//! configured limit. There is no cross-worker coordination, so the job-wide
//! ceiling is `rate * workers`.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Token bucket limiting throughput in bytes per second.
#[derive(Debug)]
pub struct RateLimit {
    /// Refill rate in bytes/second; 0 disables the limiter
    rate: u64,
    /// Maximum tokens the bucket holds (rate + burst)
    capacity: u64,
    /// Currently available tokens
    tokens: u64,
    /// Last refill instant
    last_refill: Instant,
    /// Total bytes that had to wait
    bytes_throttled: u64,
    /// Total time spent sleeping
    total_wait: Duration,
}

impl RateLimit {
    /// Create a limiter; a rate of 0 disables throttling. Burst headroom is
    /// 10% of the rate, at least 64 KiB.
    pub fn new(bytes_per_second: u64) -> Self {
        let burst = if bytes_per_second == 0 {
            0
        } else {
            (bytes_per_second / 10).max(64 * 1024)
        };

        Self {
            rate: bytes_per_second,
            capacity: bytes_per_second.saturating_add(burst),
            tokens: bytes_per_second.saturating_add(burst),
            last_refill: Instant::now(),
            bytes_throttled: 0,
            total_wait: Duration::ZERO,
        }
    }

    /// An always-off limiter.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// True when a rate is configured.
    pub fn enabled(&self) -> bool {
        self.rate > 0
    }

    /// Total time this limiter has slept its worker.
    pub fn total_wait(&self) -> Duration {
        self.total_wait
    }

    /// Total bytes that arrived while the bucket was empty.
    pub fn bytes_throttled(&self) -> u64 {
        self.bytes_throttled
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed();
        if elapsed < Duration::from_millis(1) {
            return;
        }

        let added = (elapsed.as_secs_f64() * self.rate as f64) as u64;
        if added > 0 {
            self.tokens = self.tokens.saturating_add(added).min(self.capacity);
            self.last_refill = Instant::now();
        }
    }

    /// Account for a batch of `data_bytes` already written, sleeping long
    /// enough to keep the rolling rate under the limit.
    pub async fn throttle(&mut self, data_bytes: u64) {
        if !self.enabled() || data_bytes == 0 {
            return;
        }

        self.refill();

        if data_bytes <= self.tokens {
            self.tokens -= data_bytes;
            return;
        }

        // batch exceeded the bucket: sleep off the deficit
        let deficit = data_bytes - self.tokens;
        self.tokens = 0;
        let wait = Duration::from_secs_f64(deficit as f64 / self.rate as f64);

        self.bytes_throttled += data_bytes;
        self.total_wait += wait;
        debug!(?wait, data_bytes, "rate limit reached, throttling");

        tokio::time::sleep(wait).await;
        self.last_refill = Instant::now();
    }
}
