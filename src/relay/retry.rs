//! Retry policy for relay submissions
//!
//! Exponential backoff plus error classification. A failed relay is re-driven
//! by the maintenance task once its backoff has elapsed; permanent errors are
//! not re-driven but stay eligible if the source event is seen again.

use std::time::Duration;
use tracing::debug;

/// Relay retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of automatic retries for one transfer
    pub max_retries: u32,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Backoff multiplier for exponential growth
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate backoff duration for a given attempt (0-indexed)
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let backoff_secs =
            self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped = backoff_secs.min(self.max_backoff.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Decide what to do after `attempts` failed submissions ending in `error`
    pub fn next_action(&self, attempts: u32, error: &str) -> RetryAction {
        match classify_error(error) {
            ErrorClass::Permanent => RetryAction::Abandon,
            ErrorClass::Transient | ErrorClass::Unknown => {
                if !self.should_retry(attempts) {
                    return RetryAction::Abandon;
                }
                let backoff = self.backoff_for_attempt(attempts.saturating_sub(1));
                debug!(?backoff, attempts, "Scheduling relay retry");
                RetryAction::RetryAfter(backoff)
            }
        }
    }
}

/// Classifies errors for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Temporary failure (RPC timeout, network issues, nonce races)
    Transient,
    /// Will fail the same way again (revert, bad key, no funds)
    Permanent,
    /// Unknown error, retried with backoff
    Unknown,
}

/// Classify an error message for retry decisions
pub fn classify_error(error: &str) -> ErrorClass {
    let error_lower = error.to_lowercase();

    if error_lower.contains("timeout")
        || error_lower.contains("connection")
        || error_lower.contains("network")
        || error_lower.contains("rate limit")
        || error_lower.contains("too many requests")
        || error_lower.contains("503")
        || error_lower.contains("502")
        || error_lower.contains("temporarily unavailable")
        || error_lower.contains("nonce too low")
        || error_lower.contains("nonce too high")
        || error_lower.contains("underpriced")
    {
        return ErrorClass::Transient;
    }

    if error_lower.contains("reverted")
        || error_lower.contains("invalid signature")
        || error_lower.contains("insufficient funds")
        || error_lower.contains("out of gas")
        || error_lower.contains("not a validator")
    {
        return ErrorClass::Permanent;
    }

    ErrorClass::Unknown
}

/// Action to take after a failed attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAction {
    /// Retry after a backoff period
    RetryAfter(Duration),
    /// Stop retrying automatically
    Abandon,
}
