//! The public execution surface: policy lookup, circuit gate, retry and timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use tracing::{debug, warn};

use crate::breaker::CircuitBreaker;
use crate::config::{EngineBuilder, ResilienceConfig};
use crate::error::{ExecutionError, ExecutionResult};
use crate::hook::HookRegistry;
use crate::metrics::MetricSink;
use crate::policy::{PolicyCatalog, PolicyName, ResiliencePolicy};
use crate::retry::{self, RetryController};
use crate::state::{CircuitState, CircuitStateMap};

struct ExecutorInner {
    catalog: PolicyCatalog,
    breakers: AHashMap<String, CircuitBreaker>,
    states: Arc<CircuitStateMap>,
    metric_sink: Arc<dyn MetricSink>,
    long_running_timeout: Duration,
}

/// Runs actions under named resilience policies.
///
/// The async entry points compose, from the outside in, the policy's circuit
/// breaker, its retry loop and a per-attempt timeout. Every attempt's
/// outcome is reported to the breaker.
///
/// The synchronous [`execute`](PolicyExecutor::execute) entry point is
/// deliberately much weaker: it only retries, using the `default` policy's
/// retry count, with no breaker, no timeout and no delay. Existing sync
/// callers depend on that behavior.
///
/// Cloning is cheap; clones share policies, breakers and circuit states.
#[derive(Clone)]
pub struct PolicyExecutor {
    inner: Arc<ExecutorInner>,
}

impl PolicyExecutor {
    /// Creates an engine from a configuration with no metrics or hooks.
    pub fn new(config: ResilienceConfig) -> Self {
        EngineBuilder::new().config(config).build()
    }

    /// Creates a new builder for customizing an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ResilienceConfig,
        metric_sink: Arc<dyn MetricSink>,
        hooks: Arc<HookRegistry>,
    ) -> Self {
        let catalog = PolicyCatalog::new(&config);
        let states = Arc::new(CircuitStateMap::new());

        let breakers = if catalog.is_empty() {
            warn!("Circuit breaker disabled, executing with retry and timeout only");
            AHashMap::new()
        } else {
            PolicyName::ALL
                .into_iter()
                .map(|name| {
                    let breaker = CircuitBreaker::new(
                        catalog.get(name),
                        Arc::clone(&states),
                        Arc::clone(&metric_sink),
                        Arc::clone(&hooks),
                    );
                    (name.as_str().to_string(), breaker)
                })
                .collect()
        };

        Self {
            inner: Arc::new(ExecutorInner {
                catalog,
                breakers,
                states,
                metric_sink,
                long_running_timeout: config.timeout.long_running(),
            }),
        }
    }

    /// The policy catalog this engine was built with.
    pub fn catalog(&self) -> &PolicyCatalog {
        &self.inner.catalog
    }

    /// Resolves a policy name the same way the execution paths do.
    pub fn policy(&self, name: Option<&str>) -> Arc<ResiliencePolicy> {
        self.inner
            .catalog
            .resolve(name.unwrap_or(PolicyName::Default.as_str()))
    }

    /// The breaker guarding a known policy, if breakers are enabled.
    pub fn breaker(&self, name: PolicyName) -> Option<&CircuitBreaker> {
        self.inner.breakers.get(name.as_str())
    }

    /// Executes an async action under the named policy. `None` means `default`.
    pub async fn execute_async<T, E, F, Fut>(
        &self,
        policy: Option<&str>,
        action: F,
    ) -> ExecutionResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(policy, None, action).await
    }

    /// Executes an async action that produces no value.
    pub async fn execute_async_unit<E, F, Fut>(
        &self,
        policy: Option<&str>,
        action: F,
    ) -> ExecutionResult<(), E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        self.run(policy, None, action).await
    }

    /// Executes an async action under a known policy.
    pub async fn execute_policy_async<T, E, F, Fut>(
        &self,
        policy: PolicyName,
        action: F,
    ) -> ExecutionResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(Some(policy.as_str()), None, action).await
    }

    /// Like [`execute_async`](Self::execute_async), but each attempt gets the
    /// configured long-running budget instead of the policy's timeout.
    pub async fn execute_long_running_async<T, E, F, Fut>(
        &self,
        policy: Option<&str>,
        action: F,
    ) -> ExecutionResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(policy, Some(self.inner.long_running_timeout), action)
            .await
    }

    /// Executes a blocking action with a bare retry loop.
    ///
    /// Uses the `default` policy's retry count only. No circuit breaker, no
    /// timeout and no delay between attempts. The last failure is returned
    /// unchanged.
    pub fn execute<T, E, F>(&self, action: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let policy = self.inner.catalog.get(PolicyName::Default);
        retry::run_blocking(&policy, action)
    }

    /// Observable circuit state for a name. Never blocks on other policies;
    /// names with no recorded transition read as `Closed`.
    pub fn circuit_state(&self, name: &str) -> CircuitState {
        self.inner.states.get(name)
    }

    /// Snapshot of every recorded observable state.
    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        self.inner.states.snapshot()
    }

    /// Forces the observable state to `Open`.
    ///
    /// Advisory: the breaker's own counters and timer are left alone, and a
    /// later organic transition overwrites the override.
    pub fn open_circuit(&self, name: &str) {
        let previous = self.inner.states.get(name);
        self.inner.states.set(name, CircuitState::Open);
        warn!(policy = name, from = %previous, "Circuit manually opened");
    }

    /// Forces the observable state to `Closed`.
    ///
    /// Advisory: a breaker that opened on its own keeps rejecting calls
    /// until its break duration has elapsed.
    pub fn close_circuit(&self, name: &str) {
        let previous = self.inner.states.get(name);
        self.inner.states.set(name, CircuitState::Closed);
        warn!(policy = name, from = %previous, "Circuit manually closed");
    }

    async fn run<T, E, F, Fut>(
        &self,
        name: Option<&str>,
        timeout: Option<Duration>,
        action: F,
    ) -> ExecutionResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let policy = self.policy(name);
        let breaker = self.inner.breakers.get(policy.name());

        // A manual open only lives in the observable map; honor it while the
        // breaker itself has not opened.
        if let Some(breaker) = breaker {
            if self.inner.states.get(policy.name()) == CircuitState::Open
                && breaker.current_state() != CircuitState::Open
            {
                debug!(policy = policy.name(), "Call rejected by manual circuit override");
                self.inner.metric_sink.record_rejection(policy.name());
                return Err(ExecutionError::CircuitOpen {
                    policy: policy.name().to_string(),
                });
            }
        }

        let mut controller = RetryController::new(&policy)
            .with_breaker(breaker)
            .with_metric_sink(self.inner.metric_sink.as_ref());
        if let Some(budget) = timeout {
            controller = controller.with_timeout(budget);
        }

        controller
            .run(action)
            .await
            .map_err(|stop| stop.into_execution_error(policy.name()))
    }
}
