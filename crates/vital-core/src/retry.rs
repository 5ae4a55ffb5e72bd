//! Retry policy for probe checks.
//!
//! A failed check is retried up to `max_retries` times. The pause before
//! retry `n` (0-based) is `initial_delay * 2^n`, capped at `max_delay`, then
//! shifted by a random offset in `[-jitter, +jitter]`.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::duration_str;
use crate::error::{CoreError, CoreResult};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_JITTER: Duration = Duration::from_millis(50);

/// Exponential backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    #[serde(with = "duration_str")]
    pub initial_delay: Duration,
    #[serde(with = "duration_str")]
    pub max_delay: Duration,
    #[serde(with = "duration_str")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Build and validate a policy.
    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        jitter: Duration,
    ) -> CoreResult<Self> {
        let policy = Self {
            max_retries,
            initial_delay,
            max_delay,
            jitter,
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.max_delay < self.initial_delay {
            return Err(CoreError::InvalidArgument(format!(
                "max_delay ({:?}) must not be shorter than initial_delay ({:?})",
                self.max_delay, self.initial_delay
            )));
        }
        Ok(())
    }

    /// Backoff before retry `retry` (0-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Backoff before retry `retry` (0-based), jitter applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if self.jitter.is_zero() {
            return base;
        }
        let spread = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        let offset = rand::rng().random_range(0..=spread.saturating_mul(2));
        base.saturating_add(Duration::from_nanos(offset)).saturating_sub(self.jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1), Duration::ZERO)
            .unwrap()
    }

    #[test]
    fn backoff_doubles_until_capped() {
        let policy = no_jitter();
        let delays: Vec<_> = (0..6).map(|n| policy.base_delay(n)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
    }

    #[test]
    fn huge_retry_counts_saturate_at_max_delay() {
        let policy = no_jitter();
        assert_eq!(policy.base_delay(40), Duration::from_secs(1));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::default();
        for retry in 0..4 {
            let base = policy.base_delay(retry);
            for _ in 0..50 {
                let delay = policy.delay_for(retry);
                assert!(delay >= base.saturating_sub(policy.jitter), "{delay:?} too short");
                assert!(delay <= base + policy.jitter, "{delay:?} too long");
            }
        }
    }

    #[test]
    fn max_delay_below_initial_is_rejected() {
        let err =
            RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(1), Duration::ZERO)
                .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn policy_from_toml() {
        let policy: RetryPolicy = toml::from_str(
            r#"
max_retries = 2
initial_delay = "250ms"
max_delay = "4s"
"#,
        )
        .unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.initial_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_secs(4));
        assert_eq!(policy.jitter, DEFAULT_JITTER);
    }
}
