use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy applied between retries of transient failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Fail on the first transient error
    NoRetry,
    /// Wait the same delay before every retry
    FixedBackoff { delay_ms: u64 },
    /// `base * 2^(attempt-1)` with ±10% jitter, never above `cap`
    ExponentialBackoff { base_ms: u64, cap_ms: u64 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::ExponentialBackoff {
            base_ms: 1_000,
            cap_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn allows_retry(&self) -> bool {
        !matches!(self, RetryPolicy::NoRetry)
    }

    /// Delay before retry number `attempt` (1-based). `None` means do not retry.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            RetryPolicy::NoRetry => None,
            RetryPolicy::FixedBackoff { delay_ms } => Some(Duration::from_millis(*delay_ms)),
            RetryPolicy::ExponentialBackoff { base_ms, cap_ms } => {
                let exponent = attempt.saturating_sub(1).min(20);
                let raw = base_ms.saturating_mul(1u64 << exponent).min(*cap_ms);

                // Add jitter (±10%)
                let jitter = (rand::random::<f64>() - 0.5) * 0.2;
                let jittered = ((raw as f64) * (1.0 + jitter)) as u64;

                Some(Duration::from_millis(jittered.min(*cap_ms)))
            }
        }
    }
}

/// Accounting of 429 retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitBudget {
    /// 429 retries are bounded only by the client's wall-clock budget
    #[default]
    WallClock,
    /// 429 retries consume `max_retries` like any other transient failure
    Counted,
}
