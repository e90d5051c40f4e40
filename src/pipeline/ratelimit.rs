//! # Rate Limiter
//!
//! Token-bucket admission control. The bucket starts full, refills
//! continuously at `rate` tokens per second up to `capacity`, and every
//! admitted event consumes one token. Rejection is immediate; nothing is
//! queued.

use crate::config::{RateLimitConfig, DEFAULT_MAX_EVENTS_PER_SECOND};
use crate::error::TelemetryError;
use tokio::time::Instant;

/// Admission control strategy, chosen once at construction.
#[derive(Debug)]
pub enum RateLimiter {
    /// Admits everything and never counts a drop.
    Unlimited,

    /// Token bucket.
    Bucket(TokenBucket),
}

impl RateLimiter {
    /// Build from configuration. A disabled config yields [`RateLimiter::Unlimited`].
    pub fn from_config(config: &RateLimitConfig) -> Result<Self, TelemetryError> {
        if !config.enabled {
            return Ok(RateLimiter::Unlimited);
        }

        let rate = config
            .max_events_per_second
            .unwrap_or(DEFAULT_MAX_EVENTS_PER_SECOND);
        let capacity = config.burst_size.unwrap_or(rate * 2.0);

        Ok(RateLimiter::Bucket(TokenBucket::new(rate, capacity)?))
    }

    /// Decide whether the next event is processed.
    pub fn allow(&mut self) -> bool {
        match self {
            RateLimiter::Unlimited => true,
            RateLimiter::Bucket(bucket) => bucket.allow(),
        }
    }

    /// Events rejected so far.
    pub fn dropped(&self) -> u64 {
        match self {
            RateLimiter::Unlimited => 0,
            RateLimiter::Bucket(bucket) => bucket.dropped,
        }
    }
}

/// Token bucket state.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
    dropped: u64,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens, refilled at `refill_rate` per second.
    pub fn new(refill_rate: f64, capacity: f64) -> Result<Self, TelemetryError> {
        if !refill_rate.is_finite() || refill_rate <= 0.0 {
            return Err(TelemetryError::Config(format!(
                "maxEventsPerSecond must be a positive number, got {}",
                refill_rate
            )));
        }
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(TelemetryError::Config(format!(
                "burstSize must be at least 1, got {}",
                capacity
            )));
        }

        Ok(TokenBucket {
            tokens: capacity,
            capacity,
            refill_rate,
            last_refill: Instant::now(),
            dropped: 0,
        })
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    pub fn allow(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Tokens currently available, fractional part included.
    pub fn available(&self) -> f64 {
        self.tokens
    }
}
