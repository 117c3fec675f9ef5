//! Rate limiters: three interchangeable algorithms sharing one trait.
//!
//! Each variant is reentrancy-safe: the accounting update happens under a short-lived
//! `std::sync::Mutex` with no I/O in the critical section.

mod fixed_window;
mod sliding_window;
mod token_bucket;

use std::time::{Duration, Instant};

pub use fixed_window::FixedWindowLimiter;
pub use sliding_window::SlidingWindowLimiter;
pub use token_bucket::TokenBucketLimiter;

/// Common surface for the three rate-limiter algorithms.
pub trait RateLimiter: Send + Sync {
    /// Attempts to admit one call at `now`; returns whether it was admitted.
    fn allow_at(&self, now: Instant) -> bool;

    /// Convenience wrapper around [`RateLimiter::allow_at`] using the real clock.
    fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// Remaining admissions in the current window/bucket, as of `now`.
    fn remaining_at(&self, now: Instant) -> i64;

    fn remaining(&self) -> i64 {
        self.remaining_at(Instant::now())
    }

    /// When the limiter's state next changes enough to admit another call.
    fn reset_at(&self) -> Instant;

    /// Clears all accounting, as if freshly constructed.
    fn reset(&self);
}

/// Rate-limit rule attached to a tool or policy scope (a `rate_limit.{max_calls, window}` setting).
#[derive(Clone, Copy, Debug)]
pub struct RateLimitConfig {
    pub max_calls: u32,
    pub window: Duration,
}

/// Which algorithm backs a given limiter instance. Token bucket is the preferred default.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LimiterStrategy {
    #[default]
    TokenBucket,
    SlidingWindow,
    FixedWindow,
}

pub fn build_limiter(strategy: LimiterStrategy, config: RateLimitConfig) -> Box<dyn RateLimiter> {
    match strategy {
        LimiterStrategy::TokenBucket => Box::new(TokenBucketLimiter::new(config.max_calls, config.window)),
        LimiterStrategy::SlidingWindow => Box::new(SlidingWindowLimiter::new(config.max_calls, config.window)),
        LimiterStrategy::FixedWindow => Box::new(FixedWindowLimiter::new(config.max_calls, config.window)),
    }
}
