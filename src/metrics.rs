//! Attempt records and metrics sinks.

use std::fmt;
use std::time::Duration;

use crate::state::CircuitState;

/// Trait for metrics sinks that can receive engine events.
pub trait MetricSink: Send + Sync + 'static {
    /// Records a circuit state transition.
    fn record_state_transition(&self, policy: &str, from: CircuitState, to: CircuitState);

    /// Records the outcome of one attempt.
    fn record_attempt(&self, policy: &str, outcome: AttemptOutcome, duration: Duration);

    /// Records that a retry was scheduled after the given delay.
    fn record_retry(&self, policy: &str, attempt: u32, delay: Duration);

    /// Records a call or attempt rejected by an open circuit.
    fn record_rejection(&self, policy: &str);
}

/// A null metrics sink that discards all events.
pub struct NullMetricSink;

impl MetricSink for NullMetricSink {
    fn record_state_transition(&self, _policy: &str, _from: CircuitState, _to: CircuitState) {}
    fn record_attempt(&self, _policy: &str, _outcome: AttemptOutcome, _duration: Duration) {}
    fn record_retry(&self, _policy: &str, _attempt: u32, _delay: Duration) {}
    fn record_rejection(&self, _policy: &str) {}
}

/// How a single attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptOutcome {
    /// The action returned a value.
    Success,
    /// The action returned an error.
    Failure,
    /// The attempt ran out of time.
    Timeout,
}

impl AttemptOutcome {
    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Failure => "failure",
            AttemptOutcome::Timeout => "timeout",
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One attempt inside a retry loop. Only lives as long as the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Wall-clock time spent in the attempt.
    pub elapsed: Duration,
}

#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusSink;

#[cfg(feature = "prometheus")]
mod prometheus {
    use std::time::Duration;

    use prometheus_client::encoding::EncodeLabelSet;
    use prometheus_client::metrics::counter::Counter;
    use prometheus_client::metrics::family::Family;
    use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
    use prometheus_client::registry::Registry;

    use super::{AttemptOutcome, MetricSink};
    use crate::state::CircuitState;

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct PolicyLabels {
        policy: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct TransitionLabels {
        policy: String,
        from: String,
        to: String,
    }

    #[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
    struct AttemptLabels {
        policy: String,
        outcome: String,
    }

    type HistogramFamily = Family<AttemptLabels, Histogram, fn() -> Histogram>;

    /// Metric sink publishing into a `prometheus-client` registry.
    pub struct PrometheusSink {
        transitions: Family<TransitionLabels, Counter>,
        attempts: HistogramFamily,
        retries: Family<PolicyLabels, Counter>,
        rejections: Family<PolicyLabels, Counter>,
    }

    fn attempt_histogram() -> Histogram {
        Histogram::new(exponential_buckets(0.005, 2.0, 14))
    }

    impl PrometheusSink {
        /// Creates the metric families and registers them under `registry`.
        pub fn new(registry: &mut Registry) -> Self {
            let sink = Self {
                transitions: Family::default(),
                attempts: Family::new_with_constructor(attempt_histogram as fn() -> Histogram),
                retries: Family::default(),
                rejections: Family::default(),
            };

            registry.register(
                "resilience_circuit_transitions",
                "Circuit state transitions per policy",
                sink.transitions.clone(),
            );
            registry.register(
                "resilience_attempt_duration_seconds",
                "Duration of guarded attempts by outcome",
                sink.attempts.clone(),
            );
            registry.register(
                "resilience_retries",
                "Retries scheduled per policy",
                sink.retries.clone(),
            );
            registry.register(
                "resilience_rejections",
                "Calls rejected by an open circuit",
                sink.rejections.clone(),
            );

            sink
        }
    }

    impl MetricSink for PrometheusSink {
        fn record_state_transition(&self, policy: &str, from: CircuitState, to: CircuitState) {
            self.transitions
                .get_or_create(&TransitionLabels {
                    policy: policy.to_string(),
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                })
                .inc();
        }

        fn record_attempt(&self, policy: &str, outcome: AttemptOutcome, duration: Duration) {
            self.attempts
                .get_or_create(&AttemptLabels {
                    policy: policy.to_string(),
                    outcome: outcome.as_str().to_string(),
                })
                .observe(duration.as_secs_f64());
        }

        fn record_retry(&self, policy: &str, _attempt: u32, _delay: Duration) {
            self.retries
                .get_or_create(&PolicyLabels {
                    policy: policy.to_string(),
                })
                .inc();
        }

        fn record_rejection(&self, policy: &str) {
            self.rejections
                .get_or_create(&PolicyLabels {
                    policy: policy.to_string(),
                })
                .inc();
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use prometheus_client::encoding::text::encode;

        #[test]
        fn sink_publishes_every_event_kind() {
            let mut registry = Registry::default();
            let sink = PrometheusSink::new(&mut registry);

            sink.record_state_transition("api", CircuitState::Closed, CircuitState::Open);
            sink.record_attempt("api", AttemptOutcome::Timeout, Duration::from_millis(20));
            sink.record_retry("api", 1, Duration::from_secs(1));
            sink.record_retry("api", 2, Duration::from_secs(2));
            sink.record_rejection("api");

            let mut text = String::new();
            encode(&mut text, &registry).unwrap();

            assert!(text.contains(
                r#"resilience_circuit_transitions_total{policy="api",from="closed",to="open"} 1"#
            ));
            assert!(text.contains(
                r#"resilience_attempt_duration_seconds_count{policy="api",outcome="timeout"} 1"#
            ));
            assert!(text.contains(r#"resilience_retries_total{policy="api"} 2"#));
            assert!(text.contains(r#"resilience_rejections_total{policy="api"} 1"#));
        }
    }
}
