//! Token-bucket byte throttle.
//!
//! At `rate` bytes per second, tokens refill continuously and each chunk
//! consumes its size in tokens. Bucket capacity is one second's worth of
//! bytes, so a transfer can burst at most one second ahead of its average
//! rate. The rate is mutable at runtime; `None` means unthrottled.
//!
//! O(1) per acquire, no timestamp queues.

use std::time::{Duration, Instant};

/// Byte-rate limiter with token-bucket semantics.
#[derive(Debug)]
pub struct Throttle {
    /// Bytes per second; `None` disables throttling.
    rate: Option<f64>,
    /// Current token count (bytes).
    tokens: f64,
    /// Last time tokens were refilled.
    last_refill: Instant,
}

impl Throttle {
    /// Creates a throttle. `rate` of `None` means unthrottled.
    pub fn new(rate: Option<u64>) -> Self {
        let rate = rate.map(|r| r.max(1) as f64);
        Self {
            // Start full: the first second may burst.
            tokens: rate.unwrap_or(0.0),
            rate,
            last_refill: Instant::now(),
        }
    }

    /// Changes the rate. Tokens above the new capacity are forfeited.
    pub fn set_rate(&mut self, rate: Option<u64>) {
        self.refill();
        self.rate = rate.map(|r| r.max(1) as f64);
        if let Some(cap) = self.rate {
            self.tokens = self.tokens.min(cap);
        }
    }

    /// Current rate in bytes per second, `None` when unthrottled.
    pub fn rate(&self) -> Option<u64> {
        self.rate.map(|r| r as u64)
    }

    /// Consumes `bytes` tokens, returning how long the caller must sleep
    /// before moving that many bytes. Zero when tokens suffice.
    pub fn acquire(&mut self, bytes: usize) -> Duration {
        let Some(rate) = self.rate else {
            return Duration::ZERO;
        };
        self.refill();

        let want = bytes as f64;
        self.tokens -= want;
        if self.tokens >= 0.0 {
            Duration::ZERO
        } else {
            // Deficit is repaid at `rate` bytes per second.
            Duration::from_secs_f64(-self.tokens / rate)
        }
    }

    fn refill(&mut self) {
        let Some(rate) = self.rate else { return };
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(rate);
        self.last_refill = now;
    }
}
