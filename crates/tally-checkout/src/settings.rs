//! # Checkout Settings
//!
//! Tuning knobs for the coordinator. The server fills these from the
//! `[checkout]` and `[loyalty]` sections of its config.

use std::time::Duration;

use backoff::ExponentialBackoff;
use tally_core::LoyaltyRate;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// How long a caller waits for a commit before getting `CommitPending`.
    pub commit_timeout: Duration,

    /// Total attempts at a transaction when the database is busy.
    pub max_attempts: u32,

    /// First backoff delay after a busy failure.
    pub initial_backoff: Duration,

    /// Backoff ceiling.
    pub max_backoff: Duration,

    /// How long an idempotency key keeps replaying its sale.
    pub idempotency_ttl: Duration,

    /// Points per currency unit.
    pub loyalty_rate: LoyaltyRate,
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        CheckoutSettings {
            commit_timeout: Duration::from_secs(10),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
            idempotency_ttl: Duration::from_secs(24 * 60 * 60),
            loyalty_rate: LoyaltyRate::default(),
        }
    }
}

impl CheckoutSettings {
    /// Fresh backoff schedule for one operation.
    ///
    /// Unbounded in time; `max_attempts` is what stops the retry loop.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }

    pub(crate) fn idempotency_ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.idempotency_ttl).unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}
