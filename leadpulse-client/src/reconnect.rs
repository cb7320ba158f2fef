//! Reconnection policy
//!
//! Backoff is linear: attempt n waits n * base (1s, 2s, 3s at the default
//! base). Each transport tier gets its own budget of attempts; a close with
//! a clean code never retries at all.

use std::time::Duration;

/// Normal closure per RFC 6455.
pub(crate) const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (navigation, server shutdown).
pub(crate) const CLOSE_GOING_AWAY: u16 = 1001;

/// Whether a close code marks a deliberate shutdown that must not trigger
/// a retry. `None` means the link dropped without a close frame, which is
/// abnormal.
pub(crate) fn close_is_clean(code: Option<u16>) -> bool {
    matches!(code, Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY))
}

/// Linear-backoff retry budget for one transport tier
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    base_delay: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_attempts,
            attempt: 0,
        }
    }

    /// Register a failure and hand back the wait before the next attempt,
    /// or `None` once the budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.base_delay * self.attempt)
    }

    /// Attempt number currently being worked (0 when idle).
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// A connection opened (or the consumer forced a fresh start); the
    /// counter starts over.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
