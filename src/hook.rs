//! Hook registry for engine events.

use crate::state::CircuitState;
use parking_lot::RwLock;
use std::sync::Arc;

type HookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;

/// A registry for circuit and attempt hooks. Every hook receives the policy name.
pub struct HookRegistry {
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
    on_success: RwLock<Option<HookFn>>,
    on_failure: RwLock<Option<HookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
        }
    }

    /// Sets the hook to call when a circuit opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a circuit closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a circuit half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a guarded attempt succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a guarded attempt fails or times out.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Executes the appropriate hook for a state transition.
    pub fn execute_state_transition_hook(&self, policy: &str, to: CircuitState) {
        let slot = match to {
            CircuitState::Open => &self.on_open,
            CircuitState::Closed => &self.on_close,
            CircuitState::HalfOpen => &self.on_half_open,
        };
        // Clone out so a hook may re-register hooks without deadlocking.
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook(policy);
        }
    }

    /// Executes the success hook.
    pub fn execute_success_hook(&self, policy: &str) {
        let hook = self.on_success.read().clone();
        if let Some(hook) = hook {
            hook(policy);
        }
    }

    /// Executes the failure hook.
    pub fn execute_failure_hook(&self, policy: &str) {
        let hook = self.on_failure.read().clone();
        if let Some(hook) = hook {
            hook(policy);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn transition_hooks_receive_policy_name() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hooks = HookRegistry::new();

        let opened = Arc::clone(&seen);
        hooks.set_on_open(move |policy| opened.lock().push(format!("open:{policy}")));
        let closed = Arc::clone(&seen);
        hooks.set_on_close(move |policy| closed.lock().push(format!("close:{policy}")));

        hooks.execute_state_transition_hook("database", CircuitState::Open);
        hooks.execute_state_transition_hook("database", CircuitState::HalfOpen);
        hooks.execute_state_transition_hook("database", CircuitState::Closed);

        assert_eq!(*seen.lock(), vec!["open:database", "close:database"]);
    }

    #[test]
    fn missing_hooks_are_skipped() {
        let hooks = HookRegistry::new();
        hooks.execute_success_hook("api");
        hooks.execute_failure_hook("api");
    }
}
