//! Fixed-window ceiling on upstream HTTP requests per adapter.
//!
//! A call is charged for every request it will send, all or nothing.
//! Exceeding the ceiling never blocks or queues; the caller gets `false` and
//! the adapter answers from simulation instead.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Window {
    started: Instant,
    used: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(limit: RateLimitConfig) -> Self {
        Self {
            max_requests: limit.max_requests,
            window: Duration::from_secs(limit.window_secs),
            state: Mutex::new(Window {
                started: Instant::now(),
                used: 0,
            }),
        }
    }

    /// Take `cost` slots from the current window, or none when they do not fit.
    pub fn try_acquire(&self, cost: u32) -> bool {
        self.try_acquire_at(cost, Instant::now())
    }

    fn try_acquire_at(&self, cost: u32, now: Instant) -> bool {
        let mut state = self.state.lock();
        if now.duration_since(state.started) >= self.window {
            state.started = now;
            state.used = 0;
        }
        if state.used.saturating_add(cost) > self.max_requests {
            return false;
        }
        state.used += cost;
        true
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Slots left in the current window.
    pub fn remaining(&self) -> u32 {
        let state = self.state.lock();
        if state.started.elapsed() >= self.window {
            return self.max_requests;
        }
        self.max_requests.saturating_sub(state.used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_requests: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests,
            window_secs,
        })
    }

    #[test]
    fn test_ceiling_is_enforced() {
        let rl = limiter(3, 60);
        assert!(rl.try_acquire(1));
        assert!(rl.try_acquire(1));
        assert!(rl.try_acquire(1));
        assert!(!rl.try_acquire(1));
        assert_eq!(rl.remaining(), 0);
    }

    #[test]
    fn test_cost_is_charged_all_or_nothing() {
        let rl = limiter(5, 60);
        assert!(rl.try_acquire(4));
        assert!(!rl.try_acquire(2));
        assert_eq!(rl.remaining(), 1);
        assert!(rl.try_acquire(1));
        assert!(!limiter(5, 60).try_acquire(6));
    }

    #[test]
    fn test_window_resets() {
        let rl = limiter(1, 60);
        let start = Instant::now();
        assert!(rl.try_acquire_at(1, start));
        assert!(!rl.try_acquire_at(1, start + Duration::from_secs(30)));
        assert!(rl.try_acquire_at(1, start + Duration::from_secs(61)));
        assert!(!rl.try_acquire_at(1, start + Duration::from_secs(62)));
    }
}
