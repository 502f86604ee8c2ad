//! Non-blocking rate gate for forced refreshes.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Grants at most one permit per fixed period.
///
/// `try_acquire` never blocks and a denial has no side effects. Uses
/// `tokio::time::Instant` so paused-clock tests can drive the window.
#[derive(Debug)]
pub(crate) struct RateLimiter {
    period: Duration,
    last: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            last: Mutex::new(None),
        }
    }

    pub(crate) fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let Ok(mut last) = self.last.lock() else {
            return false;
        };
        match *last {
            Some(previous) if now.duration_since(previous) < self.period => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }
}
