// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Retry policy for idempotent requests.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default minimum wait between attempts.
pub const DEFAULT_MIN_WAIT: Duration = Duration::from_millis(100);

/// Default maximum wait between attempts.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2);

/// Default number of attempts, including the first one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff bounded by a minimum and maximum wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_wait: DEFAULT_MIN_WAIT,
            max_wait: DEFAULT_MAX_WAIT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Wait before attempt number `attempt` (1-based; the first retry is
    /// attempt 2). Doubles from `min_wait`, clamped to `max_wait`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(31);
        let wait = self.min_wait.saturating_mul(1u32 << exponent);
        wait.clamp(self.min_wait, self.max_wait.max(self.min_wait))
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_clamps() {
        let policy = RetryPolicy {
            min_wait: Duration::from_millis(100),
            max_wait: Duration::from_millis(500),
            max_attempts: 10,
        };
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(400));
        assert_eq!(policy.backoff(5), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_allows_another() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
        assert!(!RetryPolicy::none().allows_another(1));
    }

    #[test]
    fn test_zero_attempts_still_sends_once() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert!(!policy.allows_another(1));
    }
}
