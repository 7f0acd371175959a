//! Reconnection backoff for the control channel

use std::time::Duration;
use tracing::debug;

/// Backoff configuration: doubling delays capped at `max_delay`, with a
/// fixed attempt budget.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }
}

/// Tracks reconnection attempts for one session
#[derive(Debug)]
pub struct ReconnectSchedule {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectSchedule {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay to wait before the next attempt, or `None` once the budget is
    /// spent. Consumes one attempt.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let factor = 2u32.saturating_pow(self.attempt);
        let delay = self
            .policy
            .initial_delay
            .saturating_mul(factor)
            .min(self.policy.max_delay);
        self.attempt += 1;

        debug!(
            "Reconnect attempt {} of {} scheduled in {:?}",
            self.attempt, self.policy.max_attempts, delay
        );

        Some(delay)
    }

    /// Reset after a successful registration.
    pub fn reset(&mut self) {
        if self.attempt != 0 {
            debug!("Resetting reconnect attempts");
        }
        self.attempt = 0;
    }

    /// Attempts consumed so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}
