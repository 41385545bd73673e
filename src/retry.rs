//! Exponential backoff with additive jitter.

use std::time::Duration;

use crate::{AttemptOutcome, HandlerConfig, HttpError};

/// Share of the capped base delay used as the jitter range.
const JITTER_RATIO: f64 = 0.3;

/// Stateless retry decision and backoff computation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            min_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &HandlerConfig) -> Self {
        Self::new(
            config.max_retries,
            config.min_retry_delay,
            config.max_retry_delay,
        )
    }

    /// Delay before the next attempt, or `None` when the outcome must not be
    /// retried or `attempt_count` retries were already spent.
    pub fn delay(&self, attempt_count: u32, outcome: &AttemptOutcome) -> Option<Duration> {
        if !outcome.is_retryable() || attempt_count >= self.max_retries {
            return None;
        }
        Some(self.backoff(attempt_count))
    }

    /// Jittered backoff for `attempt_count` attempts already made.
    pub fn backoff(&self, attempt_count: u32) -> Duration {
        self.backoff_with_unit(attempt_count, fastrand::f64())
    }

    /// `min_delay * 2^attempt_count`, capped at `max_delay`.
    pub fn base_delay(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.min(62) as i32;
        let exponential = self.min_delay.as_secs_f64() * 2f64.powi(exponent);
        let capped = exponential.min(self.max_delay.as_secs_f64());
        self.saturate(capped)
    }

    /// Backoff with `unit` in `[0, 1)` selecting the jitter amount.
    ///
    /// Jitter is additive and proportional to the capped base; the sum is
    /// capped again at `max_delay`.
    pub fn backoff_with_unit(&self, attempt_count: u32, unit: f64) -> Duration {
        let base = self.base_delay(attempt_count).as_secs_f64();
        let jitter = base * JITTER_RATIO * unit.clamp(0.0, 1.0);
        let delay = (base + jitter).min(self.max_delay.as_secs_f64());
        self.saturate(delay)
    }

    // Seconds near `Duration::MAX` round past it as `f64`.
    fn saturate(&self, seconds: f64) -> Duration {
        Duration::try_from_secs_f64(seconds.max(0.0))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Retry bookkeeping for one `execute` call. Never shared between requests.
#[derive(Debug, Default)]
pub struct RetryState {
    attempt_count: u32,
    last_error: Option<HttpError>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Failed attempts that were followed by a retry.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// The failure that triggered the most recent retry.
    pub fn last_error(&self) -> Option<&HttpError> {
        self.last_error.as_ref()
    }

    pub(crate) fn record_retry(&mut self, error: HttpError) {
        self.attempt_count += 1;
        self.last_error = Some(error);
    }
}
