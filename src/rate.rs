//! Minimum-interval rate limiting for the two sender loops

use std::time::Duration;

use tokio::time::Instant;

/// Caps how often a repeating send may happen.
///
/// Attempts that arrive before the interval has elapsed are meant to be dropped, not queued:
/// the newest value wins the next slot.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    /// Minimum spacing between two sends
    interval: Duration,
    /// When the last send was let through, if ever
    last_sent: Option<Instant>,
}

impl RateLimiter {
    /// Creates a limiter that lets the first attempt through immediately
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Creates a limiter allowing at most `hz` sends per second.
    ///
    /// Panics unless `1 / hz` is a representable [`Duration`]. `Config::validate` rejects rates
    /// that are not.
    pub fn per_second(hz: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / hz))
    }

    /// The configured minimum interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a send at `now` would respect the interval
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_sent {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Records a send at `now`
    pub fn mark(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    /// Checks [`RateLimiter::ready`] and marks the send in one step
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        let ready = self.ready(now);
        if ready {
            self.mark(now);
        }
        ready
    }
}
