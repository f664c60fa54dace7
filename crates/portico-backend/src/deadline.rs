// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded waits around blocking backend calls.
//!
//! There is no true cancellation: a call that outlives its deadline keeps
//! running on the blocking pool. The caller gets the `JoinHandle` back and
//! owns the obligation to join it before the session it captured may be
//! touched again. Fire-and-forget would overlap calls on a non-reentrant
//! native handle.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::warn;

/// Result of one deadline-guarded blocking call.
#[derive(Debug)]
pub enum DeadlineOutcome<T> {
    /// Finished within the deadline.
    Completed(T),
    /// The blocking task panicked; whatever it captured is gone.
    Failed(String),
    /// Deadline elapsed. The call is still running; the handle must be
    /// joined before its captured session is reused.
    TimedOut(JoinHandle<T>),
}

impl<T> DeadlineOutcome<T> {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, DeadlineOutcome::TimedOut(_))
    }
}

/// Run `op` on the blocking pool, waiting up to `deadline`.
pub async fn run_with_deadline<T: Send + 'static>(
    deadline: Duration,
    op: impl FnOnce() -> T + Send + 'static,
) -> DeadlineOutcome<T> {
    let mut handle = tokio::task::spawn_blocking(op);
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(value)) => DeadlineOutcome::Completed(value),
        Ok(Err(join_err)) => DeadlineOutcome::Failed(join_err.to_string()),
        Err(_) => DeadlineOutcome::TimedOut(handle),
    }
}

/// Join a pending call, discarding the propagated panic if there was one.
pub async fn join_discard<T>(handle: JoinHandle<T>) -> Option<T> {
    match handle.await {
        Ok(value) => Some(value),
        Err(join_err) => {
            warn!(error = %join_err, "Pending backend call panicked");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let outcome = run_with_deadline(Duration::from_secs(5), || 40 + 2).await;
        match outcome {
            DeadlineOutcome::Completed(v) => assert_eq!(v, 42),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_elapses_call_still_joinable() {
        let outcome = run_with_deadline(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(60));
            "late"
        })
        .await;

        let DeadlineOutcome::TimedOut(handle) = outcome else {
            panic!("expected TimedOut");
        };
        // The call was not cancelled; joining later observes the result.
        let late = join_discard(handle).await;
        assert_eq!(late, Some("late"));
    }

    #[tokio::test]
    async fn test_panicking_op_reports_failed() {
        let outcome: DeadlineOutcome<()> =
            run_with_deadline(Duration::from_secs(5), || panic!("native crash")).await;
        match outcome {
            DeadlineOutcome::Failed(msg) => assert!(msg.contains("panic")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timed_out_flag_helper() {
        let outcome = run_with_deadline(Duration::from_millis(5), || {
            std::thread::sleep(Duration::from_millis(50));
        })
        .await;
        assert!(outcome.is_timed_out());
        if let DeadlineOutcome::TimedOut(handle) = outcome {
            let _ = join_discard(handle).await;
        }
    }
}
