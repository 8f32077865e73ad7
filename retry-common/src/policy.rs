/// Outcome of evaluating one retry-topic delivery against the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// The total retry budget is exhausted; drop the message for good.
    Discard,
    /// Enough time has passed since this delivery; send it back to its
    /// origin topic for another attempt.
    RetryNow,
    /// Too soon since the last attempt; the caller must not retry yet.
    Delay,
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRetryPolicy {
    #[error("retry interval must be at least one second")]
    IntervalTooShort,
    #[error("max retry duration ({max_retry_duration_seconds}s) must not be shorter than the retry interval ({retry_interval_seconds}s)")]
    BudgetShorterThanInterval {
        retry_interval_seconds: u64,
        max_retry_duration_seconds: u64,
    },
}

/// The policy governing when a parked message is replayed and when it is
/// given up on. Validated at startup and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Minimum spacing between redelivery attempts, in milliseconds.
    retry_interval_ms: i64,
    /// Total time budget from first-seen to discard, in milliseconds.
    max_retry_duration_ms: i64,
}

impl RetryPolicy {
    pub fn new(
        retry_interval_seconds: u64,
        max_retry_duration_seconds: u64,
    ) -> Result<Self, InvalidRetryPolicy> {
        if retry_interval_seconds < 1 {
            return Err(InvalidRetryPolicy::IntervalTooShort);
        }
        if max_retry_duration_seconds < retry_interval_seconds {
            return Err(InvalidRetryPolicy::BudgetShorterThanInterval {
                retry_interval_seconds,
                max_retry_duration_seconds,
            });
        }

        Ok(Self {
            retry_interval_ms: retry_interval_seconds as i64 * 1000,
            max_retry_duration_ms: max_retry_duration_seconds as i64 * 1000,
        })
    }

    /// Decide what to do with a delivery. Pure arithmetic over millisecond
    /// timestamps; `now` is passed in by the caller.
    ///
    /// The discard check dominates: once the budget is exhausted the message
    /// is dropped no matter how recently it was last attempted. Both
    /// comparisons are strictly greater-than, so a delivery evaluated exactly
    /// at a boundary instant is still delayed.
    ///
    /// `received_at` is the timestamp of the *current* delivery from the
    /// retry topic; `original_first_seen_at` is carried in headers from the
    /// very first failure and never recomputed.
    pub fn decide(
        &self,
        now: i64,
        received_at: i64,
        original_first_seen_at: i64,
    ) -> RetryDecision {
        if now > original_first_seen_at + self.max_retry_duration_ms {
            return RetryDecision::Discard;
        }
        if now > received_at + self.retry_interval_ms {
            return RetryDecision::RetryNow;
        }
        RetryDecision::Delay
    }
}
