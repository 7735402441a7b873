//! Reconnection policy and exponential backoff.
//!
//! Delay for attempt `n` (0-based) is `min(base * 2^n, max)`, then scaled by
//! a random factor in `[1 - jitter, 1 + jitter]` and clamped to `max` again.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default delay before the first reconnect attempt.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound on any reconnect delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default jitter factor.
const DEFAULT_JITTER: f64 = 0.5;

/// Default number of attempts before giving up.
const DEFAULT_MAX_ATTEMPTS: u32 = 10;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// When and how often a lost connection is re-established.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Randomization factor in `[0, 1]`.
    pub jitter: f64,
    /// Attempts before the connection is torn down.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Creates the default policy.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the delay before the first attempt.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the upper bound on any delay.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the jitter factor.
    #[inline]
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    /// Sets the number of attempts before giving up.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Checks the policy for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if jitter is outside `[0, 1]`, the base
    /// delay exceeds the maximum, or `max_attempts` is zero.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(Error::config(format!(
                "reconnect jitter must be within [0, 1], got {}",
                self.jitter
            )));
        }

        if self.base_delay > self.max_delay {
            return Err(Error::config(format!(
                "reconnect base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }

        if self.max_attempts == 0 {
            return Err(Error::config(
                "reconnect max_attempts must be > 0; omit the policy to disable reconnection",
            ));
        }

        Ok(())
    }

    /// Delay for `attempt` given a uniform `sample` in `[-1, 1]`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, sample: f64) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(31)))
            .min(self.max_delay);

        let spread = self.jitter * sample.clamp(-1.0, 1.0);
        if spread == 0.0 {
            return exponential;
        }

        exponential.mul_f64((1.0 + spread).max(0.0)).min(self.max_delay)
    }
}

// ============================================================================
// Backoff
// ============================================================================

/// Attempt counter for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Starts at attempt zero.
    #[inline]
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Attempts consumed since the last reset.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Consumes an attempt and returns its delay, or `None` when exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }

        let sample = if self.policy.jitter > 0.0 {
            rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };

        let delay = self.policy.delay_for(self.attempt, sample);
        self.attempt += 1;
        Some(delay)
    }

    /// Returns to the base delay. Called after a successful handshake.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

// ============================================================================
// Tests
// ============================================================================
