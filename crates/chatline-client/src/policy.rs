//! Reconnection policy.

use std::time::Duration;

use chatline_settings::{BackoffKind, ClientSettings};

/// How many times to reconnect after an abnormal close, and how long to
/// wait before each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt (and every attempt for fixed backoff).
    pub base_delay: Duration,
    /// Upper bound for exponential backoff.
    pub max_delay: Duration,
    /// Attempts allowed before giving up.
    pub max_attempts: u32,
    /// Delay growth.
    pub backoff: BackoffKind,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for ReconnectPolicy {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            base_delay: Duration::from_millis(settings.reconnect_delay_ms),
            max_delay: Duration::from_millis(settings.max_reconnect_delay_ms),
            max_attempts: settings.max_reconnect_attempts,
            backoff: settings.backoff,
        }
    }
}

impl ReconnectPolicy {
    /// Fixed delay between a bounded number of attempts.
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay: delay,
            max_delay: delay,
            max_attempts,
            backoff: BackoffKind::Fixed,
        }
    }

    /// Whether attempt number `attempt` (1-based) is allowed.
    pub fn allows(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// Delay before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Exponential => {
                let exp = attempt.saturating_sub(1).min(16);
                self.base_delay
                    .saturating_mul(1 << exp)
                    .min(self.max_delay.max(self.base_delay))
            }
        }
    }
}
