//! Scheduler-wide rate-limit backoff.
//!
//! A rate-limit failure opens a window during which nothing is admitted. Each
//! consecutive rate limit doubles the window up to [`MAX_BACKOFF_MS`]; the next
//! successful completion closes it and resets the counter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Ceiling for a single backoff window
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Backoff for the nth consecutive rate limit: `base * 2^(n-1)`, capped.
pub fn backoff_ms(base_delay_ms: u64, consecutive_errors: u32) -> u64 {
    let exponent = consecutive_errors.saturating_sub(1);
    let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
    base_delay_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

#[derive(Debug, Clone, Default)]
pub struct RateLimitGovernor {
    last_error: Option<Instant>,
    last_error_at: Option<DateTime<Utc>>,
    backoff: Duration,
    consecutive_errors: u32,
}

impl RateLimitGovernor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or extend) the window. Returns the new backoff.
    pub fn record_rate_limit(&mut self, base_delay_ms: u64, now: Instant) -> Duration {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.backoff = Duration::from_millis(backoff_ms(base_delay_ms, self.consecutive_errors));
        self.last_error = Some(now);
        self.last_error_at = Some(Utc::now());
        self.backoff
    }

    pub fn record_success(&mut self) {
        if self.consecutive_errors > 0 {
            tracing::debug!(
                consecutive_errors = self.consecutive_errors,
                "Rate-limit window closed"
            );
        }
        *self = Self::default();
    }

    /// Time left in the active window, if any.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        let until = self.last_error? + self.backoff;
        (now < until).then(|| until - now)
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn state(&self, now: Instant) -> RateLimitState {
        RateLimitState {
            last_error_at: self.last_error_at,
            backoff_ms: self.backoff.as_millis() as u64,
            consecutive_errors: self.consecutive_errors,
            remaining_ms: self
                .remaining(now)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }
}

/// Governor snapshot for stats
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    pub last_error_at: Option<DateTime<Utc>>,
    pub backoff_ms: u64,
    pub consecutive_errors: u32,
    pub remaining_ms: u64,
}

impl RateLimitState {
    pub fn is_active(&self) -> bool {
        self.remaining_ms > 0
    }
}
