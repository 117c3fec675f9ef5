//! Token bucket: capacity `C`, refill rate `C / W` tokens/sec.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RateLimiter;

struct State {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucketLimiter {
    capacity: f64,
    refill_rate: f64, // tokens per second
    window: Duration,
    state: Mutex<State>,
}

impl TokenBucketLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        let capacity = max_calls.max(1) as f64;
        let refill_rate = capacity / window.as_secs_f64().max(f64::EPSILON);
        Self {
            capacity,
            refill_rate,
            window,
            state: Mutex::new(State { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    fn refill(&self, state: &mut State, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity);
            state.last_refill = now;
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state, now);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn remaining_at(&self, now: Instant) -> i64 {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state, now);
        state.tokens.floor() as i64
    }

    fn reset_at(&self) -> Instant {
        let state = self.state.lock().unwrap();
        if state.tokens >= 1.0 {
            Instant::now()
        } else {
            let needed = 1.0 - state.tokens;
            state.last_refill + Duration::from_secs_f64(needed / self.refill_rate)
        }
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.tokens = self.capacity;
        state.last_refill = Instant::now();
    }
}
