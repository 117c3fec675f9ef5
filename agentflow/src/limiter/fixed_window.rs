//! Fixed window: reset counter when `now - window_start >= W`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RateLimiter;

struct State {
    window_start: Instant,
    count: u32,
}

pub struct FixedWindowLimiter {
    max: u32,
    window: Duration,
    state: Mutex<State>,
}

impl FixedWindowLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self {
            max: max_calls,
            window,
            state: Mutex::new(State { window_start: Instant::now(), count: 0 }),
        }
    }

    fn roll(&self, state: &mut State, now: Instant) {
        if now.saturating_duration_since(state.window_start) >= self.window {
            state.window_start = now;
            state.count = 0;
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state, now);
        if state.count < self.max {
            state.count += 1;
            true
        } else {
            false
        }
    }

    fn remaining_at(&self, now: Instant) -> i64 {
        let mut state = self.state.lock().unwrap();
        self.roll(&mut state, now);
        self.max as i64 - state.count as i64
    }

    fn reset_at(&self) -> Instant {
        let state = self.state.lock().unwrap();
        state.window_start + self.window
    }

    fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.window_start = Instant::now();
        state.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_max_then_denies_until_roll() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(limiter.allow_at(t0));
        assert!(limiter.allow_at(t0));
        assert!(!limiter.allow_at(t0));
        assert!(limiter.allow_at(t0 + Duration::from_millis(100)));
    }
}
