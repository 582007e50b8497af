//! # resilience-policy
//!
//! A resilience policy engine: wraps operations (database calls, HTTP APIs,
//! other external dependencies) with circuit breaking, bounded retry with
//! backoff, and a per-attempt timeout, selected by a logical policy name.
//!
//! ## Policies
//!
//! A [`PolicyExecutor`] owns a fixed catalog of five policies derived from a
//! [`ResilienceConfig`]: `default`, `api`, `database`, `external` and `auth`.
//! Unknown names fall back to `default` and are logged once.
//!
//! ## Composition
//!
//! The async entry points nest the behaviors in a fixed order:
//!
//! - **Circuit breaker** (outermost): counts consecutive failures across all
//!   callers of a policy. Once the threshold is reached the circuit opens and
//!   calls fail fast with [`ExecutionError::CircuitOpen`]. After the break
//!   duration a single half-open probe decides whether it closes again.
//! - **Retry**: up to `retry_count + 1` attempts with linear or capped
//!   exponential backoff. The last failure is returned unchanged.
//! - **Timeout** (innermost): each attempt is bounded, expiry yields
//!   [`ExecutionError::Timeout`].
//!
//! ## Basic Usage
//!
//! ```rust
//! use resilience_policy::{ExecutionError, PolicyExecutor, ResilienceConfig};
//!
//! # async fn example() {
//! let executor = PolicyExecutor::new(ResilienceConfig::default());
//!
//! let result = executor
//!     .execute_async(Some("database"), || async {
//!         // Your call that might fail
//!         Ok::<_, std::io::Error>("row")
//!     })
//!     .await;
//!
//! match result {
//!     Ok(row) => println!("Got {}", row),
//!     Err(ExecutionError::CircuitOpen { policy }) => println!("{} is unavailable", policy),
//!     Err(ExecutionError::Timeout { after, .. }) => println!("Gave up after {:?}", after),
//!     Err(ExecutionError::Action(err)) => println!("Call failed: {}", err),
//! }
//! # }
//! ```
//!
//! ## Synchronous execution
//!
//! [`PolicyExecutor::execute`] only retries using the `default` policy's
//! retry count. It never consults a circuit breaker and never times out.
//!
//! ## Manual overrides
//!
//! [`PolicyExecutor::open_circuit`] and [`PolicyExecutor::close_circuit`]
//! set the observable state only. They do not reset the breaker's counters,
//! so later organic transitions can diverge from an override.
//!
//! ## Features
//!
//! - `prometheus` - Prometheus metrics via `prometheus-client`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod breaker;
mod config;
mod error;
mod executor;
mod hook;
mod metrics;
mod policy;
pub mod prelude;
mod retry;
mod state;
mod timeout;

// Re-exports
pub use breaker::CircuitBreaker;
pub use config::{CircuitBreakerConfig, EngineBuilder, ResilienceConfig, RetryConfig, TimeoutConfig};
pub use error::{ExecutionError, ExecutionResult};
pub use executor::PolicyExecutor;
pub use hook::HookRegistry;
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusSink;
pub use metrics::{AttemptOutcome, ExecutionAttempt, MetricSink, NullMetricSink};
pub use policy::{PolicyBuilder, PolicyCatalog, PolicyName, ResiliencePolicy, UnknownPolicyName};
pub use retry::Backoff;
pub use state::{CircuitState, CircuitStateMap};
