//! Retry policy for recovery steps

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryPolicy {
    /// Attempts per step, the first one included
    ///
    /// **Default:** 3
    pub step_attempts: u32,

    /// Delay before the first retry, doubled for each further one
    ///
    /// **Default:** 500ms
    pub retry_delay_ms: u64,

    /// Upper bound of the retry delay
    ///
    /// **Default:** 10s
    pub max_retry_delay_ms: u64,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            step_attempts: 3,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
        }
    }
}

impl RecoveryPolicy {
    /// Delay before retry number `retry` (1-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2_u64.saturating_pow(retry.saturating_sub(1));
        let delay = self.retry_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_retry_delay_ms))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.step_attempts == 0 {
            return Err("step_attempts must be at least 1".to_string());
        }

        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err("max_retry_delay_ms must not be below retry_delay_ms".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RecoveryPolicy {
            step_attempts: 8,
            retry_delay_ms: 100,
            max_retry_delay_ms: 1000,
        };

        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1000));
        assert_eq!(policy.backoff(60), Duration::from_millis(1000));
    }

    #[test]
    fn test_validation() {
        assert!(RecoveryPolicy::default().validate().is_ok());

        let mut policy = RecoveryPolicy::default();
        policy.step_attempts = 0;
        assert!(policy.validate().is_err());

        let mut policy = RecoveryPolicy::default();
        policy.max_retry_delay_ms = 10;
        assert!(policy.validate().is_err());
    }
}
