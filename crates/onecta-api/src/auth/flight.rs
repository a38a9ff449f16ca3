// Single-flight guard for token refreshes.
//
// The first caller starts the refresh; everyone arriving while it runs
// awaits a clone of the same shared future and sees the same outcome.
// The slot is cleared once the flight lands, so the next call after a
// failure starts a fresh attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use super::tokens::TokenSet;
use crate::error::Error;

/// Cloneable refresh failure, delivered to every waiter of a flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshFailure {
    pub message: String,
    pub invalid_grant: bool,
}

impl RefreshFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            invalid_grant: false,
        }
    }
}

impl From<Error> for RefreshFailure {
    fn from(err: Error) -> Self {
        match err {
            Error::RefreshFailed {
                message,
                invalid_grant,
            } => Self {
                message,
                invalid_grant,
            },
            other => Self::new(other.to_string()),
        }
    }
}

impl From<RefreshFailure> for Error {
    fn from(failure: RefreshFailure) -> Self {
        Self::RefreshFailed {
            message: failure.message,
            invalid_grant: failure.invalid_grant,
        }
    }
}

pub(crate) type RefreshFuture = BoxFuture<'static, Result<TokenSet, RefreshFailure>>;

#[derive(Default)]
pub(crate) struct RefreshFlight {
    slot: Mutex<Option<(u64, Shared<RefreshFuture>)>>,
    next_id: AtomicU64,
}

impl RefreshFlight {
    /// Join the in-flight refresh, or start one with `start`.
    pub(crate) async fn run<F>(&self, start: F) -> Result<TokenSet, RefreshFailure>
    where
        F: FnOnce() -> RefreshFuture,
    {
        let (id, flight) = {
            let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((id, flight)) => (*id, flight.clone()),
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let flight = start().shared();
                    *slot = Some((id, flight.clone()));
                    (id, flight)
                }
            }
        };

        let result = flight.await;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
        result
    }

    #[cfg(test)]
    fn is_idle(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use secrecy::ExposeSecret;

    use super::*;

    fn slow_refresh(calls: &Arc<AtomicUsize>, outcome: Result<&str, &str>) -> RefreshFuture {
        calls.fetch_add(1, Ordering::SeqCst);
        let outcome = outcome.map(str::to_owned).map_err(str::to_owned);
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            outcome
                .map(|token| TokenSet::bearer(token, Some(3600)))
                .map_err(RefreshFailure::new)
        }
        .boxed()
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_flight() {
        let flight = Arc::new(RefreshFlight::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                flight.run(|| slow_refresh(&calls, Ok("fresh"))).await
            }));
        }

        for handle in handles {
            let tokens = handle.await.unwrap().unwrap();
            assert_eq!(tokens.access_token.expose_secret(), "fresh");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(flight.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_reaches_every_waiter_and_clears_slot() {
        let flight = Arc::new(RefreshFlight::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let first = {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { flight.run(|| slow_refresh(&calls, Err("boom"))).await })
        };
        let second = {
            let flight = Arc::clone(&flight);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move { flight.run(|| slow_refresh(&calls, Err("boom"))).await })
        };

        assert_eq!(first.await.unwrap().unwrap_err().message, "boom");
        assert_eq!(second.await.unwrap().unwrap_err().message, "boom");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A later call starts a new attempt.
        let tokens = flight
            .run(|| slow_refresh(&calls, Ok("retry")))
            .await
            .unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "retry");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failure_converts_both_ways() {
        let err: Error = RefreshFailure {
            message: "invalid_grant".into(),
            invalid_grant: true,
        }
        .into();
        assert!(err.requires_reauth());

        let back = RefreshFailure::from(err);
        assert!(back.invalid_grant);

        let other = RefreshFailure::from(Error::AuthRequired);
        assert!(!other.invalid_grant);
    }
}
