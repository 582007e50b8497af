//! Per-attempt time budget.

use std::future::Future;
use std::time::Duration;

use crate::error::Failure;

/// Bounds how long a single attempt is waited on.
///
/// On expiry the attempt's future is dropped, which cancels it at its next
/// await point. Work the action handed off elsewhere (a spawned task, a
/// blocking thread) is not reached and keeps running after the timeout has
/// been reported upstream.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimeoutGuard {
    budget: Duration,
}

impl TimeoutGuard {
    pub(crate) fn new(budget: Duration) -> Self {
        Self { budget }
    }

    pub(crate) fn budget(&self) -> Duration {
        self.budget
    }

    pub(crate) async fn run<T, E, Fut>(&self, attempt: Fut) -> Result<T, Failure<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.budget, attempt).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Failure::Action(err)),
            Err(_elapsed) => Err(Failure::Timeout(self.budget)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn fast_attempt_passes_through() {
        let guard = TimeoutGuard::new(Duration::from_secs(10));
        let result: Result<u32, Failure<&str>> = guard.run(async { Ok(7) }).await;
        assert!(matches!(result, Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn action_error_is_not_a_timeout() {
        let guard = TimeoutGuard::new(Duration::from_secs(10));
        let result: Result<u32, Failure<&str>> = guard.run(async { Err("refused") }).await;
        assert!(matches!(result, Err(Failure::Action("refused"))));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_times_out_and_is_dropped() {
        let guard = TimeoutGuard::new(Duration::from_secs(10));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);

        let result: Result<(), Failure<&str>> = guard
            .run(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        match result {
            Err(Failure::Timeout(after)) => assert_eq!(after, guard.budget()),
            other => panic!("expected timeout, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(120)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }
}
