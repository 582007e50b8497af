//! Consecutive-failure circuit breaker, one per policy.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::hook::HookRegistry;
use crate::metrics::MetricSink;
use crate::policy::ResiliencePolicy;
use crate::state::{CircuitState, CircuitStateMap, StateManager};

/// Inner state of the circuit breaker, shared between clones.
struct BreakerInner {
    policy: Arc<ResiliencePolicy>,
    state_manager: StateManager,
    consecutive_failures: AtomicU32,
    probe_in_flight: AtomicBool,
    states: Arc<CircuitStateMap>,
    metric_sink: Arc<dyn MetricSink>,
    hooks: Arc<HookRegistry>,
}

/// A circuit breaker driven by consecutive failures and elapsed time.
///
/// The failure count is shared by every caller of the policy, so a burst of
/// concurrent failures can open the circuit even when no single caller
/// failed often enough on its own.
#[derive(Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    pub(crate) fn new(
        policy: Arc<ResiliencePolicy>,
        states: Arc<CircuitStateMap>,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let inner = BreakerInner {
            policy,
            state_manager: StateManager::new(),
            consecutive_failures: AtomicU32::new(0),
            probe_in_flight: AtomicBool::new(false),
            states,
            metric_sink,
            hooks,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Name of the policy this breaker guards.
    pub fn policy_name(&self) -> &str {
        self.inner.policy.name()
    }

    /// Gets the breaker's own state, which may differ from the observable
    /// state after a manual override.
    pub fn current_state(&self) -> CircuitState {
        self.inner.state_manager.current()
    }

    /// Consecutive failures recorded since the last reset.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.consecutive_failures.load(Ordering::Acquire)
    }

    /// Asks for permission to run one attempt.
    ///
    /// Returns `None` while the circuit is open, or while a half-open probe
    /// is already in flight.
    pub(crate) fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let inner = &self.inner;
        match inner.state_manager.current() {
            CircuitState::Closed => Some(BreakerPermit::new(self, false)),
            CircuitState::Open => {
                if inner.state_manager.time_in_state() < inner.policy.break_duration() {
                    return None;
                }
                // Only the holder of the probe slot may leave Open or HalfOpen.
                if !self.claim_probe() {
                    return None;
                }
                if !inner
                    .state_manager
                    .transition_from_to(CircuitState::Open, CircuitState::HalfOpen)
                {
                    self.release_probe();
                    return None;
                }
                self.on_transition(CircuitState::Open, CircuitState::HalfOpen);
                Some(BreakerPermit::new(self, true))
            }
            CircuitState::HalfOpen => {
                if !self.claim_probe() {
                    return None;
                }
                // The previous probe may have settled between the state read
                // and the claim.
                match inner.state_manager.current() {
                    CircuitState::HalfOpen => Some(BreakerPermit::new(self, true)),
                    CircuitState::Closed => {
                        self.release_probe();
                        Some(BreakerPermit::new(self, false))
                    }
                    CircuitState::Open => {
                        self.release_probe();
                        None
                    }
                }
            }
        }
    }

    fn record_success(&self, probe: bool) {
        let inner = &self.inner;
        inner.consecutive_failures.store(0, Ordering::Release);
        inner.hooks.execute_success_hook(self.policy_name());

        if probe {
            if inner
                .state_manager
                .transition_from_to(CircuitState::HalfOpen, CircuitState::Closed)
            {
                self.on_transition(CircuitState::HalfOpen, CircuitState::Closed);
            }
            self.release_probe();
        }
    }

    fn record_failure(&self, probe: bool) {
        let inner = &self.inner;
        inner.hooks.execute_failure_hook(self.policy_name());

        if probe {
            let reopened = inner
                .state_manager
                .transition_from_to(CircuitState::HalfOpen, CircuitState::Open);
            if reopened {
                inner.consecutive_failures.store(0, Ordering::Release);
                self.on_transition(CircuitState::HalfOpen, CircuitState::Open);
            }
            self.release_probe();
            if reopened {
                return;
            }
        }

        // Failures that land while the circuit is already open or probing
        // belong to attempts admitted earlier and do not count.
        if inner.state_manager.current() != CircuitState::Closed {
            return;
        }

        let failures = inner.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if inner.policy.should_trip(failures)
            && inner
                .state_manager
                .transition_from_to(CircuitState::Closed, CircuitState::Open)
        {
            inner.consecutive_failures.store(0, Ordering::Release);
            self.on_transition(CircuitState::Closed, CircuitState::Open);
        }
    }

    fn claim_probe(&self) -> bool {
        self.inner
            .probe_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release_probe(&self) {
        self.inner.probe_in_flight.store(false, Ordering::Release);
    }

    fn on_transition(&self, from: CircuitState, to: CircuitState) {
        let inner = &self.inner;
        let policy = self.policy_name();

        inner.states.set(policy, to);

        if to == CircuitState::Open {
            warn!(
                policy,
                %from,
                %to,
                break_secs = inner.policy.break_duration().as_secs(),
                "Circuit opened"
            );
        } else {
            info!(policy, %from, %to, "Circuit state changed");
        }

        inner.hooks.execute_state_transition_hook(policy, to);
        inner.metric_sink.record_state_transition(policy, from, to);
    }
}

/// Permission to run one attempt. Consumed by reporting its outcome.
///
/// A permit dropped without an outcome, for example because the caller's
/// future was cancelled, gives the half-open probe slot back.
pub(crate) struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    pub(crate) fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success(self.probe);
    }

    pub(crate) fn record_failure(mut self) {
        self.settled = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}
