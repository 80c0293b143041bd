//! Response classification and the shared retry budget.

use std::time::Duration;

use rand::Rng;

/// Total retryable failures allowed per session.
///
/// One cumulative budget covers both retry categories; it is never reset on
/// an intermediate success, only when a brand-new session begins.
pub const RETRY_LIMIT: u32 = 5;

/// Disposition of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Hand the response to the call site. Covers 2xx (success) and every
    /// non-retryable status; what "proceed" means differs per operation.
    Proceed,
    /// Re-issue the request immediately at the current local offset.
    RetryNow,
    /// Wait out the delay, re-confirm the offset, then resume.
    RetryAfter(Duration),
    /// The shared retry budget is exhausted; no further requests.
    GiveUp,
}

/// Maps a response status and the session's cumulative retry count to an
/// action. Stateless; the controller owns the counter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total retryable failures allowed for one session.
    pub limit: u32,
    /// Base unit of the exponential backoff.
    pub base_delay: Duration,
    /// Upper bound of the uniform jitter added to each backoff delay.
    pub max_jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: RETRY_LIMIT,
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Classifies a response status.
    ///
    /// 404 means the session resource is gone from the service's view and
    /// is retried immediately at the current offset; 5xx is retried after an
    /// exponential backoff and an offset re-query. The failure that would
    /// consume retry number `limit` gives up instead.
    pub fn classify(&self, status: u16, retry_count: u32) -> RetryAction {
        match status {
            404 => {
                if retry_count + 1 >= self.limit {
                    RetryAction::GiveUp
                } else {
                    RetryAction::RetryNow
                }
            }
            500..=599 => {
                if retry_count + 1 >= self.limit {
                    RetryAction::GiveUp
                } else {
                    RetryAction::RetryAfter(self.backoff_delay(retry_count))
                }
            }
            _ => RetryAction::Proceed,
        }
    }

    /// Jittered delay for a 0-indexed retry count:
    /// `base * 2^retry_count + uniform(0, max_jitter)`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        // Shift capped well below u32::BITS; the budget keeps counts tiny.
        let base = self.base_delay.saturating_mul(1u32 << retry_count.min(20));
        let jitter_ms = self.max_jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}
