//! Timing policies for connection attempts.
//!
//! All functions take the current instant as an argument so the state
//! machine stays deterministic under test.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Exponential reconnect delay: `min(base * 2^(attempts - 1), max)`.
#[derive(Clone, Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempts: u32,
}

impl Backoff {
    /// Backoff starting at `base`, capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: 0,
        }
    }

    /// Count one more attempt and return the delay before it.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        let exp = (self.attempts - 1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }

    /// Retries scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Start over from `base`.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// Minimum spacing between attempts, counted from when each attempt started.
#[derive(Clone, Debug)]
pub struct RateLimit {
    window: Duration,
    last: Option<Instant>,
}

impl RateLimit {
    /// Allow one attempt per `window`.
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Time left before another attempt is allowed, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let last = self.last?;
        let elapsed = now.saturating_duration_since(last);
        (elapsed < self.window).then(|| self.window - elapsed)
    }

    /// Record an attempt starting at `now`.
    pub fn record(&mut self, now: Instant) {
        self.last = Some(now);
    }
}

/// Rolling-window cap on attempts, against servers that accept and then
/// immediately drop connections.
#[derive(Clone, Debug)]
pub struct FlapGuard {
    window: Duration,
    max_attempts: usize,
    attempts: VecDeque<Instant>,
}

impl FlapGuard {
    /// Allow at most `max_attempts` inside any `window`.
    pub fn new(window: Duration, max_attempts: usize) -> Self {
        Self {
            window,
            max_attempts: max_attempts.max(1),
            attempts: VecDeque::new(),
        }
    }

    /// Time until the oldest attempt leaves the window, when the cap is hit.
    pub fn wait(&mut self, now: Instant) -> Option<Duration> {
        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                let _ = self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() < self.max_attempts {
            return None;
        }
        let oldest = *self.attempts.front()?;
        Some(self.window - now.saturating_duration_since(oldest))
    }

    /// Record an attempt starting at `now`.
    pub fn record(&mut self, now: Instant) {
        self.attempts.push_back(now);
    }
}
