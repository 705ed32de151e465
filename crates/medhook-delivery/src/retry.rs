//! Exponential backoff with jitter.
//!
//! The n-th failed attempt of a delivery waits `base_delay * 2^(n-1)`,
//! capped at `max_delay`, randomized by ±`jitter_factor` and capped again.
//! With the defaults that is roughly 5s, 10s, 20s, 40s, 80s.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Highest exponent applied before the cap makes further doubling moot.
const MAX_EXPONENT: u32 = 20;

/// Backoff configuration shared by every endpoint.
///
/// The number of attempts is per endpoint (`retry_count + 1`), so it is a
/// parameter of [`RetryPolicy::decide`] rather than a field here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Upper bound on any delay.
    pub max_delay: Duration,

    /// Jitter fraction (0.0 to 1.0).
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            jitter_factor: 0.2,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the delivery at the specified time.
    Retry {
        /// When the next delivery attempt should be made
        next_attempt_at: DateTime<Utc>,
    },
    /// Do not retry; the delivery fails terminally.
    GiveUp {
        /// Reason why the delivery should not be retried
        reason: String,
    },
}

impl RetryPolicy {
    /// Decides what follows failed attempt number `attempt` (1-based) on an
    /// endpoint allowing `retry_count` retries.
    pub fn decide(
        &self,
        attempt: u32,
        retry_count: u32,
        failed_at: DateTime<Utc>,
    ) -> RetryDecision {
        let max_attempts = retry_count.saturating_add(1);
        if attempt >= max_attempts {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({max_attempts}) exhausted"),
            };
        }

        let delay = self.backoff(attempt);
        let Ok(delay) = chrono::Duration::from_std(delay) else {
            return RetryDecision::GiveUp {
                reason: "retry delay duration out of range".to_string(),
            };
        };

        RetryDecision::Retry { next_attempt_at: failed_at + delay }
    }

    /// Un-jittered delay after failed attempt `attempt`.
    pub fn backoff_base(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let multiplier = 2_u32.saturating_pow(exponent);
        std::cmp::min(self.base_delay.saturating_mul(multiplier), self.max_delay)
    }

    /// Jittered delay after failed attempt `attempt`, never above `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let jittered = apply_jitter(self.backoff_base(attempt), self.jitter_factor);
        std::cmp::min(jittered, self.max_delay)
    }
}

/// Randomizes `duration` uniformly by ±`jitter_factor`.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped_jitter = jitter_factor.clamp(0.0, 1.0);

    let mut rng = rand::rng();
    let jitter_range = duration.as_secs_f64() * clamped_jitter;
    let jitter_offset = rng.random_range(-jitter_range..=jitter_range);
    let jittered_secs = duration.as_secs_f64() + jitter_offset;

    Duration::from_secs_f64(jittered_secs.max(0.0))
}
