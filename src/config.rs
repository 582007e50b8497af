//! Configuration for the policy engine.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::PolicyExecutor;
use crate::hook::HookRegistry;
use crate::metrics::{MetricSink, NullMetricSink};

/// Process-wide resilience settings, loaded once at startup.
///
/// Field names follow the PascalCase layout of typical application settings
/// files, so a section such as
///
/// ```json
/// {
///   "CircuitBreaker": { "Enabled": true, "ExceptionsAllowedBeforeBreaking": 5, "DurationOfBreakSeconds": 30 },
///   "RetryPolicy": { "MaxRetries": 3, "BaseDelaySeconds": 1, "MaxDelaySeconds": 30, "ExponentialBackoff": true },
///   "Timeout": { "DefaultTimeoutSeconds": 30, "HttpClientTimeoutSeconds": 60, "LongRunningTimeoutSeconds": 300 }
/// }
/// ```
///
/// deserializes directly. Missing fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ResilienceConfig {
    /// Circuit breaker section.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry section.
    pub retry_policy: RetryConfig,
    /// Timeout section.
    pub timeout: TimeoutConfig,
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CircuitBreakerConfig {
    /// When false, no breakers are built and calls are never gated.
    pub enabled: bool,
    /// Consecutive failures tolerated before the circuit opens.
    pub exceptions_allowed_before_breaking: i64,
    /// How long an open circuit rejects calls.
    pub duration_of_break_seconds: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exceptions_allowed_before_breaking: 5,
            duration_of_break_seconds: 30,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    pub max_retries: i64,
    /// Delay before the first retry.
    pub base_delay_seconds: i64,
    /// Cap for exponential delays.
    pub max_delay_seconds: i64,
    /// Exponential when true, linear otherwise.
    pub exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_seconds: 1,
            max_delay_seconds: 30,
            exponential_backoff: true,
        }
    }
}

/// Timeout settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TimeoutConfig {
    /// Per-attempt budget for most policies.
    pub default_timeout_seconds: i64,
    /// Per-attempt budget for outbound HTTP calls (`api` policy).
    pub http_client_timeout_seconds: i64,
    /// Per-attempt budget for long-running executions.
    pub long_running_timeout_seconds: i64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_timeout_seconds: 30,
            http_client_timeout_seconds: 60,
            long_running_timeout_seconds: 300,
        }
    }
}

impl TimeoutConfig {
    /// Long-running budget, never below the 10s timeout floor.
    pub fn long_running(&self) -> Duration {
        seconds_at_least(self.long_running_timeout_seconds, 10)
    }
}

/// Converts a configured second count to a duration, raising it to `floor`.
pub(crate) fn seconds_at_least(value: i64, floor: i64) -> Duration {
    Duration::from_secs(value.max(floor).max(0) as u64)
}

/// Builder for creating a [`PolicyExecutor`] with custom collaborators.
pub struct EngineBuilder {
    config: ResilienceConfig,
    metric_sink: Arc<dyn MetricSink>,
    hook_registry: Arc<HookRegistry>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            metric_sink: Arc::new(NullMetricSink),
            hook_registry: Arc::new(HookRegistry::new()),
        }
    }

    /// Sets the base configuration the policy catalog is derived from.
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets a metric sink for the engine.
    pub fn metric_sink<M: MetricSink>(mut self, sink: M) -> Self {
        self.metric_sink = Arc::new(sink);
        self
    }

    /// Sets a hook registry for the engine.
    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.hook_registry = Arc::new(hooks);
        self
    }

    /// Builds the engine. Policies and breakers are fixed from here on.
    pub fn build(self) -> PolicyExecutor {
        PolicyExecutor::from_parts(self.config, self.metric_sink, self.hook_registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_settings_section() {
        let json = r#"{
            "CircuitBreaker": { "Enabled": false, "ExceptionsAllowedBeforeBreaking": 7, "DurationOfBreakSeconds": 45 },
            "RetryPolicy": { "MaxRetries": 4, "BaseDelaySeconds": 2, "MaxDelaySeconds": 20, "ExponentialBackoff": false },
            "Timeout": { "DefaultTimeoutSeconds": 15, "HttpClientTimeoutSeconds": 90, "LongRunningTimeoutSeconds": 600 }
        }"#;

        let config: ResilienceConfig = serde_json::from_str(json).unwrap();
        assert!(!config.circuit_breaker.enabled);
        assert_eq!(config.circuit_breaker.exceptions_allowed_before_breaking, 7);
        assert_eq!(config.retry_policy.max_retries, 4);
        assert!(!config.retry_policy.exponential_backoff);
        assert_eq!(config.timeout.long_running(), Duration::from_secs(600));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: ResilienceConfig =
            serde_json::from_str(r#"{ "RetryPolicy": { "MaxRetries": 6 } }"#).unwrap();
        assert!(config.circuit_breaker.enabled);
        assert_eq!(config.retry_policy.max_retries, 6);
        assert_eq!(config.retry_policy.base_delay_seconds, 1);
        assert_eq!(config.timeout, TimeoutConfig::default());
    }

    #[test]
    fn negative_seconds_are_raised_to_floor() {
        assert_eq!(seconds_at_least(-20, 10), Duration::from_secs(10));
        assert_eq!(seconds_at_least(0, 0), Duration::ZERO);
    }
}
