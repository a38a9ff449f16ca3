// Rate-limit bookkeeping: the header snapshot and the local breaker.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::Serialize;
use tokio::time::Instant;

/// Limits reported by the API on the most recent response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit_minute: Option<u32>,
    pub remaining_minute: Option<u32>,
    pub limit_day: Option<u32>,
    pub remaining_day: Option<u32>,
}

impl RateLimitStatus {
    /// Parse `x-ratelimit-{limit,remaining}-{minute,day}`. Returns `None`
    /// when the response carries none of them.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u32>().ok())
        };

        let status = Self {
            limit_minute: read("x-ratelimit-limit-minute"),
            remaining_minute: read("x-ratelimit-remaining-minute"),
            limit_day: read("x-ratelimit-limit-day"),
            remaining_day: read("x-ratelimit-remaining-day"),
        };
        (status != Self::default()).then_some(status)
    }
}

/// `retry-after` in seconds; `None` when absent or not an integer.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Local refusal window armed by a 429.
#[derive(Debug, Default)]
pub(crate) struct Breaker {
    blocked_until: Mutex<Option<Instant>>,
}

impl Breaker {
    pub(crate) fn arm(&self, duration: Duration) {
        let until = Instant::now() + duration;
        *self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(until);
    }

    /// Seconds left in the window, rounded up. Clears an expired window.
    pub(crate) fn remaining_secs(&self) -> Option<u64> {
        let mut guard = self
            .blocked_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let until = (*guard)?;
        let now = Instant::now();
        if now >= until {
            *guard = None;
            return None;
        }
        let left = until - now;
        let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
        Some(secs.max(1))
    }
}
