//! Sliding window: keep admitted-call timestamps within the last `W`.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::RateLimiter;

pub struct SlidingWindowLimiter {
    max: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_calls: u32, window: Duration) -> Self {
        Self { max: max_calls, window, timestamps: Mutex::new(VecDeque::new()) }
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = timestamps.front() {
            if now.saturating_duration_since(front) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn allow_at(&self, now: Instant) -> bool {
        let mut timestamps = self.timestamps.lock().unwrap();
        self.prune(&mut timestamps, now);
        if (timestamps.len() as u32) < self.max {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    fn remaining_at(&self, now: Instant) -> i64 {
        let mut timestamps = self.timestamps.lock().unwrap();
        self.prune(&mut timestamps, now);
        self.max as i64 - timestamps.len() as i64
    }

    fn reset_at(&self) -> Instant {
        let timestamps = self.timestamps.lock().unwrap();
        match timestamps.front() {
            Some(&oldest) if timestamps.len() as u32 >= self.max => oldest + self.window,
            _ => Instant::now(),
        }
    }

    fn reset(&self) {
        self.timestamps.lock().unwrap().clear();
    }
}
