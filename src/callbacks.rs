//! Callback plumbing for state transitions.

use crate::State;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Type alias for state-change callback functions.
///
/// Invoked as `(name, from, to)` while the breaker mutex is held, in
/// transition order. Callbacks must not call back into the breaker and
/// should return quickly.
pub type StateChangeFn = Arc<dyn Fn(&str, State, State) + Send + Sync>;

/// Optional observer notified on every state transition.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_state_change: Option<StateChangeFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the observer safely, catching any panic so a misbehaving
    /// callback cannot poison the breaker mutex it runs under.
    pub fn trigger(&self, name: &str, from: State, to: State) {
        if let Some(ref callback) = self.on_state_change {
            let cb = AssertUnwindSafe(callback);
            let _ = catch_unwind(|| cb(name, from, to));
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_state_change", &self.on_state_change.is_some())
            .finish()
    }
}
