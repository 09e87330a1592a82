//! One logical breaker shared by several processes through a data store.
//!
//! The shared state is a serialized `{state, generation, counts, expiry}`
//! record. Admission and outcome application are each one optimistic
//! round-trip against the store: load, inject into the wrapped breaker,
//! delegate, extract, store. Two processes running a round-trip
//! concurrently may overwrite each other (last-writer-wins); the
//! generation counter bounds the damage by discarding counters that belong
//! to an overwritten epoch, exactly as stale outcomes are discarded
//! locally.

use crate::circuit::{CallTag, CircuitBreaker, Settings};
use crate::classifier::Outcome;
use crate::counts::Counts;
use crate::errors::CircuitError;
use crate::storage::{SharedDataStore, StoreError};
use crate::State;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Key prefix shared by every implementation persisting breaker state to a
/// common store.
const SHARED_STATE_PREFIX: &str = "gobreaker:";

/// Snapshot of a breaker persisted in the shared store.
///
/// `state` encodes as an integer, `expiry` as an RFC 3339 timestamp with
/// timezone (`null` stands for the zero instant). Producer and consumer
/// agree byte-for-byte after a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub state: State,
    pub generation: u64,
    pub counts: Counts,
    pub expiry: Option<DateTime<Utc>>,
}

/// Circuit breaker replicating its state through a [`SharedDataStore`].
///
/// Breakers configured with the same name against the same store drive one
/// logical breaker: a trip observed by one process rejects admissions in
/// all of them. Store failures abort the call and surface to the caller;
/// there is no automatic retry.
#[derive(Clone)]
pub struct DistributedCircuitBreaker {
    breaker: CircuitBreaker,
    store: Arc<dyn SharedDataStore>,
}

impl DistributedCircuitBreaker {
    /// Create a distributed breaker over `store`.
    ///
    /// Fails with [`CircuitError::NoSharedStore`] when `store` is `None`.
    /// When the store has no state under the breaker's key yet, the local
    /// initial state seeds it; existing shared state is left untouched.
    pub fn new(
        store: Option<Arc<dyn SharedDataStore>>,
        settings: Settings,
    ) -> Result<Self, CircuitError> {
        Self::from_breaker(store, CircuitBreaker::new(settings))
    }

    pub(crate) fn from_breaker(
        store: Option<Arc<dyn SharedDataStore>>,
        breaker: CircuitBreaker,
    ) -> Result<Self, CircuitError> {
        let store = store.ok_or(CircuitError::NoSharedStore)?;
        let dcb = Self { breaker, store };
        match dcb.load() {
            Ok(_) => {}
            Err(CircuitError::NoSharedState) => {
                dcb.store_state(&dcb.breaker.extract_shared())?;
            }
            Err(error) => return Err(error),
        }
        Ok(dcb)
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    fn key(&self) -> String {
        format!("{}{}", SHARED_STATE_PREFIX, self.breaker.name())
    }

    fn load(&self) -> Result<SharedState, CircuitError> {
        let data = self.store.get(&self.key()).map_err(CircuitError::Store)?;
        match data {
            None => Err(CircuitError::NoSharedState),
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| CircuitError::Store(Box::new(e)))
            }
        }
    }

    fn store_state(&self, state: &SharedState) -> Result<(), CircuitError> {
        let bytes = serde_json::to_vec(state).map_err(|e| CircuitError::Store(Box::new(e)))?;
        self.store
            .set(&self.key(), &bytes)
            .map_err(CircuitError::Store)
    }

    /// One protocol round-trip: load shared state, inject it into the
    /// wrapped breaker, delegate, extract, store. A missing key runs the
    /// phase on the local state and re-seeds the store.
    fn with_shared<R>(&self, phase: impl FnOnce(&CircuitBreaker) -> R) -> Result<R, CircuitError> {
        match self.load() {
            Ok(shared) => self.breaker.inject_shared(shared),
            Err(CircuitError::NoSharedState) => {}
            Err(error) => return Err(error),
        }
        let result = phase(&self.breaker);
        self.store_state(&self.breaker.extract_shared())?;
        Ok(result)
    }

    fn admit(&self) -> Result<CallTag, CircuitError> {
        self.with_shared(|breaker| breaker.admit::<StoreError>())?
    }

    fn settle(&self, tag: CallTag, outcome: Outcome) -> Result<(), CircuitError> {
        self.with_shared(|breaker| breaker.settle(tag, outcome))
    }

    /// Current state of the logical breaker, after applying and persisting
    /// any due time-driven transition.
    pub fn state(&self) -> Result<State, CircuitError> {
        self.with_shared(|breaker| breaker.state())
    }

    /// Snapshot of the shared counters.
    pub fn counts(&self) -> Result<Counts, CircuitError> {
        self.with_shared(|breaker| breaker.counts())
    }

    /// Run `request` if the logical breaker admits it.
    ///
    /// Store failures abort the call and surface as
    /// [`CircuitError::Store`]; a failure of `request` itself takes
    /// precedence over a store failure while recording its outcome.
    pub fn execute<T, E, F>(&self, request: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Any,
    {
        let tag = self.admit().map_err(CircuitError::cast)?;

        match catch_unwind(AssertUnwindSafe(request)) {
            Err(panic) => {
                let _ = self.settle(tag, Outcome::Failure);
                resume_unwind(panic);
            }
            Ok(result) => {
                let outcome = match &result {
                    Ok(_) => self.breaker.outcome_classifier().classify(None),
                    Err(error) => self.breaker.outcome_classifier().classify(Some(error)),
                };
                let stored = self.settle(tag, outcome);
                match result {
                    Ok(value) => {
                        stored.map_err(CircuitError::cast)?;
                        Ok(value)
                    }
                    Err(error) => Err(CircuitError::Execution(error)),
                }
            }
        }
    }

    /// Admit a request without running it. The returned token performs the
    /// outcome round-trip when redeemed.
    pub fn allow(&self) -> Result<DistributedToken, CircuitError> {
        let tag = self.admit()?;
        Ok(DistributedToken {
            breaker: self.clone(),
            tag,
        })
    }
}

impl fmt::Debug for DistributedCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedCircuitBreaker")
            .field("name", &self.breaker.name())
            .finish_non_exhaustive()
    }
}

/// Single-shot handle reporting the outcome of a distributed admission.
pub struct DistributedToken {
    breaker: DistributedCircuitBreaker,
    tag: CallTag,
}

impl DistributedToken {
    /// Report the outcome; `None` means the request produced no error.
    /// Surfaces store failures from the final write.
    pub fn done(self, error: Option<&dyn Any>) -> Result<(), CircuitError> {
        let outcome = self.breaker.breaker.outcome_classifier().classify(error);
        self.breaker.settle(self.tag, outcome)
    }
}

impl fmt::Debug for DistributedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedToken")
            .field("name", &self.breaker.breaker.name())
            .finish_non_exhaustive()
    }
}
