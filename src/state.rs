//! Circuit state machine and the externally observable state map.

use std::fmt;
use std::sync::atomic::Ordering;
use std::time::Duration;

use ahash::RandomState;
use atomic::Atomic;
use dashmap::DashMap;
use tokio::time::Instant;

/// Represents the possible states of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CircuitState {
    /// Circuit is closed and operations are allowed.
    #[default]
    Closed = 0,

    /// Circuit is open and operations are rejected.
    Open = 1,

    /// Circuit is letting a single probe through to test recovery.
    HalfOpen = 2,
}

impl CircuitState {
    /// Lowercase label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State transitions for a single breaker.
pub(crate) struct StateManager {
    state: Atomic<CircuitState>,
    last_transition: parking_lot::Mutex<Instant>,
}

impl StateManager {
    pub(crate) fn new() -> Self {
        Self {
            state: Atomic::new(CircuitState::Closed),
            last_transition: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn current(&self) -> CircuitState {
        self.state.load(Ordering::Acquire)
    }

    /// Duration since the last state transition.
    pub(crate) fn time_in_state(&self) -> Duration {
        self.last_transition.lock().elapsed()
    }

    /// Attempts to transition from one state to another.
    /// Returns true if this caller performed the transition.
    pub(crate) fn transition_from_to(&self, from: CircuitState, to: CircuitState) -> bool {
        let result = self
            .state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if result {
            *self.last_transition.lock() = Instant::now();
        }

        result
    }
}

/// Process-wide view of circuit states keyed by policy name.
///
/// Written by organic breaker transitions and by manual overrides; the last
/// writer wins. Absent names read as [`CircuitState::Closed`]. Reads and
/// writes only lock the shard holding the key, so there is no engine-wide
/// lock for concurrent callers to contend on.
#[derive(Debug, Default)]
pub struct CircuitStateMap {
    states: DashMap<String, CircuitState, RandomState>,
}

impl CircuitStateMap {
    /// Creates an empty map; every name reads as closed.
    pub fn new() -> Self {
        Self {
            states: DashMap::with_hasher(RandomState::new()),
        }
    }

    /// Gets the recorded state for a name, or `Closed` if none was recorded.
    pub fn get(&self, name: &str) -> CircuitState {
        self.states
            .get(name)
            .map(|entry| *entry.value())
            .unwrap_or_default()
    }

    /// Records a state for a name, replacing whatever was there.
    pub fn set(&self, name: &str, state: CircuitState) {
        self.states.insert(name.to_string(), state);
    }

    /// Snapshot of all recorded states.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        self.states
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_names_read_closed() {
        let map = CircuitStateMap::new();
        assert_eq!(map.get("nope"), CircuitState::Closed);
        assert!(map.snapshot().is_empty());
    }

    #[test]
    fn last_writer_wins() {
        let map = CircuitStateMap::new();
        map.set("api", CircuitState::Open);
        map.set("api", CircuitState::HalfOpen);
        assert_eq!(map.get("api"), CircuitState::HalfOpen);
    }

    #[test]
    fn transition_requires_expected_state() {
        let manager = StateManager::new();
        assert!(!manager.transition_from_to(CircuitState::Open, CircuitState::HalfOpen));
        assert!(manager.transition_from_to(CircuitState::Closed, CircuitState::Open));
        assert_eq!(manager.current(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn time_in_state_follows_clock() {
        let manager = StateManager::new();
        assert!(manager.transition_from_to(CircuitState::Closed, CircuitState::Open));
        tokio::time::advance(Duration::from_secs(12)).await;
        assert!(manager.time_in_state() >= Duration::from_secs(12));
    }
}
