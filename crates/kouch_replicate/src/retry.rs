//! Retry controller.
//!
//! [`retry`] runs a unit of work until it succeeds, fails permanently, runs
//! out of attempts or would overrun the deadline. Classification is left to
//! the error type through [`Retryable`].

use crate::config::{Backoff, RetryPolicy};
use crate::duration::fmt_duration;
use crate::error::ReplicateError;
use kouch_client::ClientError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// An error the retry controller can classify.
pub trait Retryable: Sized {
    /// Returns true if the operation may succeed when repeated.
    fn is_transient(&self) -> bool;

    /// The error returned when the caller cancels.
    fn canceled() -> Self;
}

impl Retryable for ClientError {
    fn is_transient(&self) -> bool {
        ClientError::is_transient(self)
    }

    fn canceled() -> Self {
        ClientError::Canceled
    }
}

impl Retryable for ReplicateError {
    fn is_transient(&self) -> bool {
        ReplicateError::is_transient(self)
    }

    fn canceled() -> Self {
        ReplicateError::Canceled
    }
}

/// Per-call retry bookkeeping.
struct RetryState {
    attempt: u64,
    max_tries: Option<u64>,
    backoff: Backoff,
    deadline: Option<Instant>,
}

impl RetryState {
    fn new(policy: &RetryPolicy) -> Self {
        Self {
            attempt: 0,
            max_tries: policy.max_tries(),
            backoff: policy.backoff(),
            deadline: policy.deadline.map(|d| Instant::now() + d),
        }
    }

    /// Remaining tries after the current one, `None` when unlimited.
    fn retries_left(&self) -> Option<u64> {
        self.max_tries.map(|max| max.saturating_sub(self.attempt))
    }

    /// Returns the delay before the next attempt, or `None` when the budget
    /// is spent.
    fn next_delay(&mut self) -> Option<Duration> {
        if self.retries_left() == Some(0) {
            return None;
        }
        let delay = self.backoff.next_delay();
        if let Some(deadline) = self.deadline {
            if Instant::now() + delay >= deadline {
                return None;
            }
        }
        Some(delay)
    }
}

fn warning(err: &impl Display, delay: Duration, retries_left: Option<u64>) -> String {
    let mut msg = format!("Warning: transient problem: {err}.");
    if !delay.is_zero() {
        msg.push_str(&format!(" Will retry in {}.", fmt_duration(delay)));
    }
    if let Some(n) = retries_left.filter(|n| *n > 0) {
        msg.push_str(&format!(" {n} retries left."));
    }
    msg
}

/// Runs `op` under `policy`.
///
/// Permanent errors are returned after the first failure. Transient errors
/// are retried while attempts remain and the next attempt would start before
/// the deadline; the last error is returned otherwise. Cancellation aborts the
/// in-flight attempt or sleep and returns `E::canceled()`.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut state = RetryState::new(policy);
    loop {
        if cancel.is_cancelled() {
            return Err(E::canceled());
        }
        state.attempt += 1;

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(E::canceled()),
            outcome = op() => outcome,
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !err.is_transient() {
            debug!(attempt = state.attempt, error = %err, "permanent failure");
            return Err(err);
        }
        let Some(delay) = state.next_delay() else {
            debug!(attempt = state.attempt, error = %err, "retry budget exhausted");
            return Err(err);
        };

        info!(
            attempt = state.attempt,
            "{}",
            warning(&err, delay, state.retries_left())
        );

        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(E::canceled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn warning_text() {
        let err = ClientError::transient("connection reset");
        assert_eq!(
            warning(&err, Duration::from_millis(1500), Some(2)),
            "Warning: transient problem: connection reset. Will retry in 1.50s. 2 retries left."
        );
        assert_eq!(
            warning(&err, Duration::ZERO, Some(0)),
            "Warning: transient problem: connection reset."
        );
        assert_eq!(
            warning(&err, Duration::from_secs(90), None),
            "Warning: transient problem: connection reset. Will retry in 1m30s."
        );
    }

    #[tokio::test]
    async fn success_first_try() {
        let cancel = CancellationToken::new();
        let out: Result<u32, ClientError> =
            retry(&RetryPolicy::new(3), &cancel, || async { Ok(7) }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test]
    async fn no_retry_runs_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let out: Result<(), ClientError> = retry(&RetryPolicy::no_retry(), &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::transient("down"))
            }
        })
        .await;
        assert_eq!(out, Err(ClientError::transient("down")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(5).with_delay(Duration::from_millis(100));
        let start = Instant::now();
        let out: Result<u32, ClientError> = retry(&policy, &cancel, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(ClientError::transient("flaky"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out, Ok(3));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(250));
    }

    #[tokio::test]
    async fn permanent_short_circuits() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::unlimited().with_delay(Duration::ZERO);
        let out: Result<(), ClientError> = retry(&policy, &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::not_found("Not Found: missing"))
            }
        })
        .await;
        assert!(matches!(out, Err(ClientError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::new(3).with_delay(Duration::ZERO);
        let out: Result<(), ClientError> = retry(&policy, &cancel, || {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::transient(format!("try {n}")))
            }
        })
        .await;
        assert_eq!(out, Err(ClientError::transient("try 3")));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::unlimited()
            .with_delay(Duration::from_millis(300))
            .with_deadline(Duration::from_secs(1));
        let start = Instant::now();
        let out: Result<(), ClientError> = retry(&policy, &cancel, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::transient("down"))
            }
        })
        .await;
        assert!(out.is_err());
        // Attempts at 0, 300, 600 and 900ms; the next would start at 1.2s.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_sleep() {
        let cancel = CancellationToken::new();
        let policy = RetryPolicy::unlimited().with_delay(Duration::from_secs(60));
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        let out: Result<(), ReplicateError> = retry(&policy, &cancel, || async {
            Err(ReplicateError::from(ClientError::transient("down")))
        })
        .await;
        assert_eq!(out, Err(ReplicateError::Canceled));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn already_canceled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Result<(), ClientError> =
            retry(&RetryPolicy::new(3), &cancel, || async { Ok(()) }).await;
        assert_eq!(out, Err(ClientError::Canceled));
    }
}
