//! Error types for policy execution.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Result type for policy-guarded operations.
pub type ExecutionResult<T, E> = Result<T, ExecutionError<E>>;

/// Error returned by [`PolicyExecutor`](crate::PolicyExecutor) async entry points.
///
/// The three variants are never converted into one another: a rejected call
/// is always `CircuitOpen`, an attempt that ran out of time is always
/// `Timeout`, and a failure raised by the wrapped action is handed back
/// untouched in `Action`.
#[derive(Debug)]
pub enum ExecutionError<E> {
    /// The action was never invoked because the circuit is open.
    CircuitOpen {
        /// Policy whose circuit rejected the call.
        policy: String,
    },

    /// The last attempt exceeded its per-attempt time budget.
    Timeout {
        /// Policy that applied the time budget.
        policy: String,
        /// The budget that was exceeded.
        after: Duration,
    },

    /// The wrapped action failed; this is the failure of the last attempt.
    Action(E),
}

impl<E> ExecutionError<E> {
    /// Returns true if the call was rejected by an open circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecutionError::CircuitOpen { .. })
    }

    /// Returns true if the last attempt timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }

    /// Returns the action's own failure, if that is what ended the call.
    pub fn action(&self) -> Option<&E> {
        match self {
            ExecutionError::Action(e) => Some(e),
            _ => None,
        }
    }

    /// Consumes the error, returning the action's own failure if present.
    pub fn into_action(self) -> Option<E> {
        match self {
            ExecutionError::Action(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> Display for ExecutionError<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::CircuitOpen { policy } => {
                write!(f, "Circuit for policy '{}' is open", policy)
            }
            ExecutionError::Timeout { policy, after } => write!(
                f,
                "Attempt under policy '{}' timed out after {:?}",
                policy, after
            ),
            ExecutionError::Action(e) => write!(f, "Action error: {}", e),
        }
    }
}

impl<E: Error + 'static> Error for ExecutionError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ExecutionError::CircuitOpen { .. } => None,
            ExecutionError::Timeout { .. } => None,
            ExecutionError::Action(e) => Some(e),
        }
    }
}

/// Outcome of a single failed attempt, passed between the retry loop and the
/// breaker as a plain value.
#[derive(Debug)]
pub(crate) enum Failure<E> {
    Action(E),
    Timeout(Duration),
}

impl<E> Failure<E> {
    pub(crate) fn into_execution_error(self, policy: &str) -> ExecutionError<E> {
        match self {
            Failure::Action(e) => ExecutionError::Action(e),
            Failure::Timeout(after) => ExecutionError::Timeout {
                policy: policy.to_string(),
                after,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Boom;

    impl Display for Boom {
        fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl Error for Boom {}

    #[test]
    fn action_error_exposes_source() {
        let err: ExecutionError<Boom> = ExecutionError::Action(Boom);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Action error: boom");
        assert!(err.action().is_some());
    }

    #[test]
    fn timeout_failure_keeps_policy_name() {
        let failure: Failure<Boom> = Failure::Timeout(Duration::from_secs(10));
        let err = failure.into_execution_error("database");
        assert!(err.is_timeout());
        assert!(!err.is_circuit_open());
        assert!(err.to_string().contains("database"));
        assert!(err.into_action().is_none());
    }
}
