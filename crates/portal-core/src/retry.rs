use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected retry policy parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("backoff_factor must be greater than 1, got {0}")]
    FactorTooSmall(f64),
    #[error("initial_delay ({initial:?}) exceeds max_delay ({max:?})")]
    DelayBounds { initial: Duration, max: Duration },
}

/// Immutable exponential backoff configuration.
///
/// Deserialized values go through [`RetryPolicy::new`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRetryPolicy")]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

#[derive(Deserialize)]
struct RawRetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl TryFrom<RawRetryPolicy> for RetryPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawRetryPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.max_attempts, raw.initial_delay, raw.max_delay, raw.backoff_factor)
    }
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> Result<Self, PolicyError> {
        if max_attempts == 0 {
            return Err(PolicyError::NoAttempts);
        }
        if !(backoff_factor > 1.0) || !backoff_factor.is_finite() {
            return Err(PolicyError::FactorTooSmall(backoff_factor));
        }
        if initial_delay > max_delay {
            return Err(PolicyError::DelayBounds {
                initial: initial_delay,
                max: max_delay,
            });
        }

        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_factor,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Wait before the zero-based `attempt`.
    ///
    /// The first attempt runs immediately; attempt `i >= 1` waits
    /// `min(initial_delay * backoff_factor^(i-1), max_delay)`.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(scaled)
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_documented_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.initial_delay(), Duration::from_secs(1));
        assert_eq!(policy.max_delay(), Duration::from_secs(10));
        assert_eq!(policy.backoff_factor(), 2.0);
    }

    #[test]
    fn first_attempt_has_no_delay() {
        assert_eq!(RetryPolicy::default().delay_before_attempt(0), Duration::ZERO);
    }

    #[test]
    fn scales_exponentially_for_attempts() {
        let policy = RetryPolicy::new(6, Duration::from_millis(100), Duration::from_secs(10), 2.0)
            .expect("valid policy");
        assert_eq!(policy.delay_before_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn caps_delay_at_max() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(4), 3.0)
            .expect("valid policy");
        assert_eq!(policy.delay_before_attempt(5), Duration::from_secs(4));
        assert_eq!(policy.delay_before_attempt(u32::MAX), Duration::from_secs(4));
    }

    #[test]
    fn rejects_invalid_parameters() {
        assert_eq!(
            RetryPolicy::new(0, Duration::from_secs(1), Duration::from_secs(2), 2.0),
            Err(PolicyError::NoAttempts)
        );
        assert_eq!(
            RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(2), 1.0),
            Err(PolicyError::FactorTooSmall(1.0))
        );
        assert!(matches!(
            RetryPolicy::new(3, Duration::from_secs(5), Duration::from_secs(2), 2.0),
            Err(PolicyError::DelayBounds { .. })
        ));
    }

    #[test]
    fn deserialization_validates_parameters() {
        let policy = RetryPolicy::default();
        let encoded = serde_json::to_value(policy).expect("encode policy");
        let decoded: RetryPolicy = serde_json::from_value(encoded.clone()).expect("decode policy");
        assert_eq!(decoded, policy);

        let mut zero_attempts = encoded.clone();
        zero_attempts["max_attempts"] = serde_json::json!(0);
        assert!(serde_json::from_value::<RetryPolicy>(zero_attempts).is_err());

        let mut flat = encoded;
        flat["backoff_factor"] = serde_json::json!(1.0);
        assert!(serde_json::from_value::<RetryPolicy>(flat).is_err());
    }

    #[test]
    fn counts_remaining_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
    }
}
