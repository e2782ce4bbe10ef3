//! Sliding-window send limiter.
//!
//! The gateway allows a fixed number of requests per rolling window. Every
//! admitted send is timestamped; a new send is admitted only when fewer than
//! `max_sends` timestamps fall inside the last `window`.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

pub struct SlidingWindowLimiter {
    max_sends: usize,
    window: Duration,
    sends: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_sends: u32, window: Duration) -> Self {
        Self {
            max_sends: max_sends.max(1) as usize,
            window,
            sends: Mutex::new(VecDeque::with_capacity(max_sends as usize)),
        }
    }

    /// Admit one send now if the window has room.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut sends = self.sends.lock();
        Self::evict(&mut sends, now, self.window);
        if sends.len() < self.max_sends {
            sends.push_back(now);
            true
        } else {
            false
        }
    }

    /// How long until a send would be admitted. Zero if one would be now.
    pub fn wait_time(&self) -> Duration {
        let now = Instant::now();
        let mut sends = self.sends.lock();
        Self::evict(&mut sends, now, self.window);
        if sends.len() < self.max_sends {
            return Duration::ZERO;
        }
        sends
            .front()
            .map(|oldest| (*oldest + self.window).saturating_duration_since(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Block until a send is admitted. Returns `false` if `cancel` fired
    /// first.
    pub fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if self.try_acquire() {
                return true;
            }
            let wait = self
                .wait_time()
                .clamp(Duration::from_millis(1), Duration::from_millis(100));
            std::thread::sleep(wait);
        }
    }

    /// Sends admitted inside the current window.
    pub fn in_window(&self) -> usize {
        let mut sends = self.sends.lock();
        Self::evict(&mut sends, Instant::now(), self.window);
        sends.len()
    }

    /// Share of the window's capacity in use (0.0 - 100.0).
    pub fn usage_percent(&self) -> f64 {
        self.in_window() as f64 / self.max_sends as f64 * 100.0
    }

    fn evict(sends: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = sends.front() {
            if now.duration_since(*oldest) >= window {
                sends.pop_front();
            } else {
                break;
            }
        }
    }
}
