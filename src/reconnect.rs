//! Two-timescale reconnect schedule.
//!
//! Retries follow a capped exponential curve; once the fast schedule is
//! exhausted the instance waits out one long cooldown, resets its counter and
//! starts the fast curve again. Transient outages therefore self-heal without
//! operator action indefinitely; only an explicit logout stops the loop.

use std::time::Duration;

/// Tunable reconnect parameters.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// First-retry delay and unit of the exponential schedule.
    pub base: Duration,
    /// Upper bound for the exponential schedule.
    pub cap: Duration,
    /// Attempts allowed on the fast schedule.
    pub max_attempts: u32,
    /// Pause after the fast schedule is exhausted.
    pub extended_cooldown: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(120),
            max_attempts: 3,
            extended_cooldown: Duration::from_secs(600),
        }
    }
}

/// Next action for a just-incremented attempt counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectStep {
    /// Sleep this long, then retry.
    Retry(Duration),
    /// Fast schedule exhausted: sleep this long, reset the counter to zero,
    /// then retry immediately.
    ExtendedCooldown(Duration),
}

impl ReconnectPolicy {
    /// Delay before attempt `n` (1-based): `min(base * 2^(n-1), cap)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u64.saturating_pow(exponent);
        let base_ms = u64::try_from(self.base.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(factor)).min(self.cap)
    }

    /// Decide what a scheduled retry should do for the given attempt number.
    pub fn step(&self, attempt: u32) -> ReconnectStep {
        if attempt > self.max_attempts {
            ReconnectStep::ExtendedCooldown(self.extended_cooldown)
        } else {
            ReconnectStep::Retry(self.delay_for(attempt))
        }
    }
}
