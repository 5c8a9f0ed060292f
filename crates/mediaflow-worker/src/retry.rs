//! Retry budget and backoff policy.

use std::time::Duration;

/// Bounded retry policy.
///
/// `max_retries` counts total attempts, not additional ones: with a budget
/// of N an always-failing task passes through N-1 RETRY states and then
/// FAILED with `retry_count = N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            backoff: Duration::from_secs(30),
        }
    }
}

/// What to do with a task whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// RETRY with a forward-dated lease; requeue the message
    Retry { attempt: u32, backoff: Duration },
    /// FAILED; drop the message without requeue
    Fail { attempt: u32 },
}

impl Disposition {
    pub fn attempt(&self) -> u32 {
        match self {
            Disposition::Retry { attempt, .. } | Disposition::Fail { attempt } => *attempt,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Decide for a task that had `retry_count` failures before this one.
    pub fn decide(&self, retry_count: u32, permanent: bool) -> Disposition {
        let attempt = retry_count.saturating_add(1);
        if permanent || attempt >= self.max_retries {
            Disposition::Fail { attempt }
        } else {
            Disposition::Retry {
                attempt,
                backoff: self.backoff,
            }
        }
    }
}
