//! Bounded retry with linear or exponential backoff.

use std::future::Future;
use std::time::Duration;

use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::breaker::CircuitBreaker;
use crate::error::{ExecutionError, Failure};
use crate::metrics::{AttemptOutcome, ExecutionAttempt, MetricSink, NullMetricSink};
use crate::policy::ResiliencePolicy;
use crate::state::CircuitState;
use crate::timeout::TimeoutGuard;

static NULL_SINK: NullMetricSink = NullMetricSink;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    exponential: bool,
    multiplier: f64,
}

impl Backoff {
    pub(crate) fn new(
        base_delay: Duration,
        max_delay: Duration,
        exponential: bool,
        multiplier: f64,
    ) -> Self {
        Self {
            base_delay,
            max_delay,
            exponential,
            multiplier,
        }
    }

    /// Delay before the first retry.
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Cap applied to exponential delays.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// True for exponential growth, false for linear.
    pub fn is_exponential(&self) -> bool {
        self.exponential
    }

    /// Exponential growth factor.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Exponential: `min(base * multiplier^(attempt - 1), max)`.
    /// Linear: `base * attempt`, which is not capped by `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);

        if !self.exponential {
            return self.base_delay.saturating_mul(attempt);
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        match Duration::try_from_secs_f64(secs) {
            Ok(delay) => delay.min(self.max_delay),
            Err(_) => self.max_delay,
        }
    }
}

/// Why a retry loop stopped without a value.
#[derive(Debug)]
pub(crate) enum Stop<E> {
    /// The breaker refused the first attempt; the action never ran.
    Rejected,
    /// The last attempt failed.
    Failed(Failure<E>),
}

impl<E> Stop<E> {
    pub(crate) fn into_execution_error(self, policy: &str) -> ExecutionError<E> {
        match self {
            Stop::Rejected => ExecutionError::CircuitOpen {
                policy: policy.to_string(),
            },
            Stop::Failed(failure) => failure.into_execution_error(policy),
        }
    }
}

/// Runs an action up to `retry_count + 1` times, each attempt under a
/// [`TimeoutGuard`] and, when attached, a [`CircuitBreaker`] permit.
pub(crate) struct RetryController<'a> {
    policy: &'a ResiliencePolicy,
    guard: TimeoutGuard,
    breaker: Option<&'a CircuitBreaker>,
    metric_sink: &'a dyn MetricSink,
}

impl<'a> RetryController<'a> {
    pub(crate) fn new(policy: &'a ResiliencePolicy) -> Self {
        Self {
            policy,
            guard: TimeoutGuard::new(policy.timeout()),
            breaker: None,
            metric_sink: &NULL_SINK,
        }
    }

    pub(crate) fn with_breaker(mut self, breaker: Option<&'a CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub(crate) fn with_timeout(mut self, budget: Duration) -> Self {
        self.guard = TimeoutGuard::new(budget);
        self
    }

    pub(crate) fn with_metric_sink(mut self, sink: &'a dyn MetricSink) -> Self {
        self.metric_sink = sink;
        self
    }

    pub(crate) async fn run<T, E, F, Fut>(&self, mut action: F) -> Result<T, Stop<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let policy = self.policy.name();
        let max_attempts = self.policy.max_attempts();
        let started = Instant::now();
        let mut attempts: SmallVec<[ExecutionAttempt; 4]> = SmallVec::new();
        let mut last_failure: Option<Failure<E>> = None;
        let mut number = 1;

        loop {
            let permit = match self.breaker {
                Some(breaker) => match breaker.try_acquire() {
                    Some(permit) => Some(permit),
                    None => {
                        self.metric_sink.record_rejection(policy);
                        return match last_failure.take() {
                            Some(failure) => {
                                info!(
                                    policy,
                                    attempts = attempts.len(),
                                    elapsed_ms = started.elapsed().as_millis() as u64,
                                    "Circuit rejected retry, returning last failure"
                                );
                                Err(Stop::Failed(failure))
                            }
                            None => Err(Stop::Rejected),
                        };
                    }
                },
                None => None,
            };

            let attempt_started = Instant::now();
            let result = self.guard.run(action()).await;
            let elapsed = attempt_started.elapsed();

            let failure = match result {
                Ok(value) => {
                    if let Some(permit) = permit {
                        permit.record_success();
                    }
                    self.metric_sink
                        .record_attempt(policy, AttemptOutcome::Success, elapsed);
                    if number > 1 {
                        debug!(policy, attempt = number, "Attempt succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            if let Some(permit) = permit {
                permit.record_failure();
            }
            let outcome = match failure {
                Failure::Action(_) => AttemptOutcome::Failure,
                Failure::Timeout(_) => AttemptOutcome::Timeout,
            };
            self.metric_sink.record_attempt(policy, outcome, elapsed);
            attempts.push(ExecutionAttempt {
                number,
                outcome,
                elapsed,
            });

            let circuit_opened = self
                .breaker
                .is_some_and(|breaker| breaker.current_state() == CircuitState::Open);

            if number >= max_attempts || circuit_opened {
                info!(
                    policy,
                    attempts = attempts.len(),
                    max_attempts,
                    circuit_opened,
                    timeouts = attempts
                        .iter()
                        .filter(|attempt| attempt.outcome == AttemptOutcome::Timeout)
                        .count(),
                    attempt_ms = attempts
                        .iter()
                        .map(|attempt| attempt.elapsed)
                        .sum::<Duration>()
                        .as_millis() as u64,
                    timeout_ms = self.guard.budget().as_millis() as u64,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Retries exhausted"
                );
                return Err(Stop::Failed(failure));
            }

            let delay = self.policy.backoff().delay(number);
            debug!(
                policy,
                attempt = number,
                %outcome,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying after backoff"
            );
            self.metric_sink.record_retry(policy, number, delay);

            last_failure = Some(failure);
            tokio::time::sleep(delay).await;
            number += 1;
        }
    }
}

/// Bare synchronous retry: `policy.max_attempts()` immediate attempts, no
/// delay, no breaker, no time budget. The last failure is returned as is.
pub(crate) fn run_blocking<T, E, F>(policy: &ResiliencePolicy, mut action: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = policy.max_attempts();
    let mut number = 1;

    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(err) if number >= max_attempts => {
                info!(
                    policy = policy.name(),
                    attempts = number,
                    "Synchronous retries exhausted"
                );
                return Err(err);
            }
            Err(_) => {
                debug!(
                    policy = policy.name(),
                    attempt = number,
                    "Synchronous attempt failed, retrying"
                );
                number += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn exponential(base: u64, max: u64, multiplier: f64) -> Backoff {
        Backoff::new(
            Duration::from_secs(base),
            Duration::from_secs(max),
            true,
            multiplier,
        )
    }

    #[test]
    fn exponential_delays_are_capped() {
        let backoff = exponential(1, 5, 2.0);
        let delays: Vec<u64> = (1..=5).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn linear_delays_ignore_the_cap() {
        let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(5), false, 2.0);
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(2), Duration::from_secs(4));
        assert_eq!(backoff.delay(4), Duration::from_secs(8));
    }

    #[test]
    fn huge_exponents_saturate_to_max() {
        let backoff = exponential(1, 30, 3.0);
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn exponential_delay_never_exceeds_max(
            base in 1u64..10,
            max in 5u64..120,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..64,
        ) {
            let backoff = exponential(base, max, multiplier);
            prop_assert!(backoff.delay(attempt) <= Duration::from_secs(max));
        }

        #[test]
        fn exponential_delay_is_monotonic(
            base in 1u64..10,
            max in 5u64..120,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..63,
        ) {
            let backoff = exponential(base, max, multiplier);
            prop_assert!(backoff.delay(attempt) <= backoff.delay(attempt + 1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_action_runs_retry_count_plus_one_times() {
        let policy = ResiliencePolicy::builder("default").retry_count(3).build();
        let calls = AtomicU32::new(0);

        let result: Result<(), Stop<&str>> = RetryController::new(&policy)
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("down") }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(matches!(result, Err(Stop::Failed(Failure::Action("down")))));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_backoff_between_attempts() {
        let policy = ResiliencePolicy::builder("default")
            .retry_count(3)
            .base_delay(Duration::from_secs(1))
            .max_delay(Duration::from_secs(5))
            .build();
        let started = Instant::now();

        let _: Result<(), Stop<&str>> = RetryController::new(&policy)
            .run(|| async { Err("down") })
            .await;

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(1 + 2 + 4), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(8), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt() {
        let policy = ResiliencePolicy::builder("default").retry_count(3).build();
        let calls = AtomicU32::new(0);

        let result: Result<u32, Stop<&str>> = RetryController::new(&policy)
            .run(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("flaky")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert!(matches!(result, Ok(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_are_retried_and_reported_as_timeouts() {
        let policy = ResiliencePolicy::builder("default").retry_count(1).build();
        let calls = AtomicU32::new(0);

        let result: Result<(), Stop<&str>> = RetryController::new(&policy)
            .with_timeout(Duration::from_secs(10))
            .run(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(result, Err(Stop::Failed(Failure::Timeout(_)))));
    }

    #[test]
    fn blocking_loop_retries_immediately() {
        let policy = ResiliencePolicy::builder("default").retry_count(2).build();
        let mut calls = 0;

        let result: Result<(), String> = run_blocking(&policy, || {
            calls += 1;
            Err(format!("failure {calls}"))
        });

        assert_eq!(calls, 3);
        assert_eq!(result, Err("failure 3".to_string()));
    }
}
