//! Reconnection policy for a call session
//!
//! Connectivity loss is recovered by ICE restarts on the existing transport,
//! bounded by [`ReconnectionPolicy::max_attempts`]. Each attempt waits for an
//! exponential backoff (with optional jitter) before the restart is issued and
//! is abandoned if no `connected` signal arrives within the attempt timeout.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Reconnection policy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionPolicy {
    /// Maximum number of ICE restarts per connectivity-loss episode (default: 3)
    pub max_attempts: u8,
    /// Backoff before the first restart in milliseconds (default: 250ms)
    pub backoff_initial_ms: u64,
    /// Maximum backoff in milliseconds (default: 2000ms)
    pub backoff_max_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to add jitter to backoff (default: true)
    pub jitter_enabled: bool,
    /// How long one restart may take to reach `connected` (default: 10000ms)
    pub attempt_timeout_ms: u64,
}

impl Default for ReconnectionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_initial_ms: 250,
            backoff_max_ms: 2000,
            backoff_multiplier: 2.0,
            jitter_enabled: true,
            attempt_timeout_ms: 10_000,
        }
    }
}

impl ReconnectionPolicy {
    /// Policy with quick, short-lived restarts (for stable wired networks)
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 3,
            backoff_initial_ms: 100,
            backoff_max_ms: 1000,
            backoff_multiplier: 1.5,
            jitter_enabled: true,
            attempt_timeout_ms: 5_000,
        }
    }

    /// Policy tolerating long radio handoffs (for cellular networks)
    pub fn conservative() -> Self {
        Self {
            max_attempts: 5,
            backoff_initial_ms: 500,
            backoff_max_ms: 5000,
            backoff_multiplier: 1.5,
            jitter_enabled: true,
            attempt_timeout_ms: 15_000,
        }
    }

    /// Calculate the backoff before restart number `attempt` (1-based)
    pub fn calculate_backoff(&self, attempt: u8) -> Duration {
        let exponent = i32::from(attempt.saturating_sub(1));
        let backoff_ms = (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(exponent);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);

        // Jitter adds 0-25% of the backoff
        let final_ms = if self.jitter_enabled && backoff_ms > 0.0 {
            backoff_ms + rand::thread_rng().gen_range(0.0..=backoff_ms * 0.25)
        } else {
            backoff_ms
        };

        Duration::from_millis(final_ms as u64)
    }

    /// Time one restart may take before it counts as a failed attempt
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// Validate policy parameters
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "reconnection.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "reconnection.backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.backoff_max_ms < self.backoff_initial_ms {
            return Err(Error::InvalidConfig(format!(
                "reconnection.backoff_max_ms ({}) is below backoff_initial_ms ({})",
                self.backoff_max_ms, self.backoff_initial_ms
            )));
        }
        if self.attempt_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "reconnection.attempt_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Bounded reconnect-attempt counter
///
/// Monotonically non-decreasing within one connectivity-loss episode; reset
/// only when the session reaches `Connected` or is cleaned up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectBudget {
    attempts: u8,
    max_attempts: u8,
}

impl ReconnectBudget {
    pub fn new(max_attempts: u8) -> Self {
        Self {
            attempts: 0,
            max_attempts,
        }
    }

    /// Consume one attempt, returning its 1-based number, or `None` once
    /// the budget is spent
    pub fn next_attempt(&mut self) -> Option<u8> {
        if self.attempts >= self.max_attempts {
            debug!(
                "Reconnect budget exhausted ({}/{})",
                self.attempts, self.max_attempts
            );
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u8 {
        self.max_attempts
    }
}
