//! Re-exports common types for convenient usage.
//!
//! # Example
//! ```rust,no_run
//! use resilience_policy::prelude::*;
//!
//! let executor = PolicyExecutor::new(ResilienceConfig::default());
//! assert_eq!(executor.circuit_state("api"), CircuitState::Closed);
//! ```

pub use crate::{
    CircuitState, ExecutionError, ExecutionResult, PolicyExecutor, PolicyName, ResilienceConfig,
};
