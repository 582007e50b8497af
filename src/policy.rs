//! Named resilience policies and the catalog that owns them.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::{seconds_at_least, ResilienceConfig};
use crate::retry::Backoff;

const MIN_FAILURE_THRESHOLD: u32 = 1;
const MIN_BREAK_DURATION: Duration = Duration::from_secs(10);
const MIN_RETRY_COUNT: u32 = 1;
const MIN_BASE_DELAY: Duration = Duration::from_secs(1);
const MIN_MAX_DELAY: Duration = Duration::from_secs(5);
const MIN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_MULTIPLIER: f64 = 2.0;

/// The known policy names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyName {
    /// Baseline policy; also the fallback for unknown names.
    Default,
    /// Outbound HTTP APIs. More lenient than `Default`.
    Api,
    /// Database calls. Stricter than `Default`.
    Database,
    /// Third-party services. Fixed, very strict settings.
    External,
    /// Authentication providers.
    Auth,
}

impl PolicyName {
    /// Every known name, in catalog order.
    pub const ALL: [PolicyName; 5] = [
        PolicyName::Default,
        PolicyName::Api,
        PolicyName::Database,
        PolicyName::External,
        PolicyName::Auth,
    ];

    /// The catalog key for this name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::Default => "default",
            PolicyName::Api => "api",
            PolicyName::Database => "database",
            PolicyName::External => "external",
            PolicyName::Auth => "auth",
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing a name outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPolicyName(
    /// The name that was not recognized.
    pub String,
);

impl fmt::Display for UnknownPolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown policy name: {}", self.0)
    }
}

impl std::error::Error for UnknownPolicyName {}

impl FromStr for PolicyName {
    type Err = UnknownPolicyName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PolicyName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownPolicyName(s.to_string()))
    }
}

/// An immutable bundle of circuit-breaker, retry and timeout parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResiliencePolicy {
    name: String,
    failure_threshold: u32,
    break_duration: Duration,
    retry_count: u32,
    backoff: Backoff,
    timeout: Duration,
}

impl ResiliencePolicy {
    /// Creates a builder for a policy with the given name.
    pub fn builder(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder::new(name)
    }

    /// Policy name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Consecutive failures before the circuit opens.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// How long the circuit stays open before a probe is allowed.
    pub fn break_duration(&self) -> Duration {
        self.break_duration
    }

    /// Additional attempts after the first one.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Total attempts a retry loop makes.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay schedule between attempts.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Per-attempt time budget.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub(crate) fn should_trip(&self, consecutive_failures: u32) -> bool {
        consecutive_failures >= self.failure_threshold
    }
}

/// Builder for [`ResiliencePolicy`]. `build` clamps every field to its floor
/// so a zero or missing setting cannot switch resilience off.
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    name: String,
    failure_threshold: u32,
    break_duration: Duration,
    retry_count: u32,
    base_delay: Duration,
    max_delay: Duration,
    exponential: bool,
    multiplier: f64,
    timeout: Duration,
}

impl PolicyBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            failure_threshold: 5,
            break_duration: Duration::from_secs(30),
            retry_count: 3,
            base_delay: MIN_BASE_DELAY,
            max_delay: Duration::from_secs(30),
            exponential: true,
            multiplier: DEFAULT_MULTIPLIER,
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the consecutive failure count that opens the circuit.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Sets how long an open circuit rejects calls.
    pub fn break_duration(mut self, duration: Duration) -> Self {
        self.break_duration = duration;
        self
    }

    /// Sets the number of retries after the first attempt.
    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }

    /// Sets the delay before the first retry.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the cap for exponential delays.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Chooses exponential (true) or linear (false) backoff.
    pub fn exponential_backoff(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Sets the exponential growth factor.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Sets the per-attempt time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builds the policy, applying the floors.
    pub fn build(self) -> ResiliencePolicy {
        let multiplier = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            DEFAULT_MULTIPLIER
        };

        ResiliencePolicy {
            name: self.name,
            failure_threshold: self.failure_threshold.max(MIN_FAILURE_THRESHOLD),
            break_duration: self.break_duration.max(MIN_BREAK_DURATION),
            retry_count: self.retry_count.max(MIN_RETRY_COUNT),
            backoff: Backoff::new(
                self.base_delay.max(MIN_BASE_DELAY),
                self.max_delay.max(MIN_MAX_DELAY),
                self.exponential,
                multiplier,
            ),
            timeout: self.timeout.max(MIN_TIMEOUT),
        }
    }
}

/// The fixed set of named policies, built once per engine.
pub struct PolicyCatalog {
    policies: AHashMap<String, Arc<ResiliencePolicy>>,
    fallback: Arc<ResiliencePolicy>,
    warned: Mutex<AHashSet<String>>,
}

impl PolicyCatalog {
    /// Builds the catalog from a base configuration.
    ///
    /// With the circuit breaker disabled the catalog is left empty and every
    /// lookup returns the fallback built from the base configuration.
    pub fn new(config: &ResilienceConfig) -> Self {
        let fallback = Arc::new(base_policy(config, PolicyName::Default).build());

        let policies = if config.circuit_breaker.enabled {
            PolicyName::ALL
                .into_iter()
                .map(|name| {
                    let policy = Arc::new(derive_policy(config, name));
                    (name.as_str().to_string(), policy)
                })
                .collect()
        } else {
            AHashMap::new()
        };

        Self {
            policies,
            fallback,
            warned: Mutex::new(AHashSet::new()),
        }
    }

    /// Returns the named policy, or `default` for an unknown name.
    ///
    /// An unknown name is logged at warn level the first time it is seen
    /// and silently resolved afterwards, so a typo in a hot path surfaces
    /// once instead of flooding the log.
    pub fn resolve(&self, name: &str) -> Arc<ResiliencePolicy> {
        if let Some(policy) = self.policies.get(name) {
            return Arc::clone(policy);
        }

        if self.policies.is_empty() {
            debug!(policy = name, "Catalog is empty, using base policy");
            return Arc::clone(&self.fallback);
        }

        if self.warned.lock().insert(name.to_string()) {
            warn!(
                policy = name,
                fallback = PolicyName::Default.as_str(),
                "Unknown resilience policy requested, falling back to default"
            );
        }

        self.get(PolicyName::Default)
    }

    /// Returns the policy for a known name.
    pub fn get(&self, name: PolicyName) -> Arc<ResiliencePolicy> {
        self.policies
            .get(name.as_str())
            .map(Arc::clone)
            .unwrap_or_else(|| Arc::clone(&self.fallback))
    }

    /// True if the catalog holds no named policies.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Names of the policies held.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// Unknown names that have been requested so far.
    pub fn unknown_names(&self) -> Vec<String> {
        self.warned.lock().iter().cloned().collect()
    }
}

fn base_policy(config: &ResilienceConfig, name: PolicyName) -> PolicyBuilder {
    let cb = &config.circuit_breaker;
    let retry = &config.retry_policy;

    ResiliencePolicy::builder(name.as_str())
        .failure_threshold(count_at_least(cb.exceptions_allowed_before_breaking, 0))
        .break_duration(seconds_at_least(cb.duration_of_break_seconds, 0))
        .retry_count(count_at_least(retry.max_retries, 0))
        .base_delay(seconds_at_least(retry.base_delay_seconds, 0))
        .max_delay(seconds_at_least(retry.max_delay_seconds, 0))
        .exponential_backoff(retry.exponential_backoff)
        .backoff_multiplier(DEFAULT_MULTIPLIER)
        .timeout(seconds_at_least(config.timeout.default_timeout_seconds, 0))
}

fn derive_policy(config: &ResilienceConfig, name: PolicyName) -> ResiliencePolicy {
    let cb = &config.circuit_breaker;
    let retry = &config.retry_policy;
    let timeout = &config.timeout;
    let threshold = cb.exceptions_allowed_before_breaking;
    let break_secs = cb.duration_of_break_seconds;

    let builder = base_policy(config, name);
    match name {
        PolicyName::Default => builder,
        PolicyName::Api => builder
            .failure_threshold(count_at_least(threshold.saturating_add(2), 1))
            .retry_count(count_at_least(retry.max_retries.saturating_add(1), 1))
            .backoff_multiplier(1.5)
            .timeout(seconds_at_least(
                timeout
                    .http_client_timeout_seconds
                    .max(timeout.default_timeout_seconds),
                10,
            )),
        PolicyName::Database => builder
            .failure_threshold(count_at_least(threshold.saturating_sub(2), 1))
            .break_duration(seconds_at_least(break_secs.saturating_add(30), 10))
            .retry_count(count_at_least(retry.max_retries.saturating_sub(1), 1))
            .backoff_multiplier(3.0)
            .timeout(seconds_at_least(timeout.default_timeout_seconds.saturating_sub(10), 10)),
        PolicyName::External => builder
            .failure_threshold(1)
            .break_duration(Duration::from_secs(300))
            .retry_count(2)
            .exponential_backoff(false)
            .timeout(Duration::from_secs(30)),
        PolicyName::Auth => builder
            .failure_threshold(count_at_least(threshold.saturating_sub(1), 1))
            .break_duration(seconds_at_least(break_secs.saturating_add(15), 10))
            .backoff_multiplier(2.5)
            .timeout(seconds_at_least(timeout.default_timeout_seconds.saturating_sub(5), 10)),
    }
    .build()
}

fn count_at_least(value: i64, floor: i64) -> u32 {
    value.max(floor).clamp(0, u32::MAX as i64) as u32
}
