//! Builder API for ergonomic breaker configuration

use crate::callbacks::Callbacks;
use crate::circuit::{CircuitBreaker, Settings, TripFn, TwoStepCircuitBreaker};
use crate::classifier::{OutcomeClassifier, PredicateClassifier};
use crate::counts::Counts;
use crate::distributed::DistributedCircuitBreaker;
use crate::errors::CircuitError;
use crate::storage::SharedDataStore;
use crate::State;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with a fluent API.
///
/// # Examples
///
/// ```rust
/// use breakerbox::CircuitBreaker;
/// use std::time::Duration;
///
/// let breaker = CircuitBreaker::builder("payments")
///     .max_requests(3)
///     .interval(Duration::from_secs(30))
///     .timeout(Duration::from_secs(90))
///     .ready_to_trip(|counts| counts.consecutive_failures > 2)
///     .on_state_change(|name, from, to| {
///         println!("{name}: {from} -> {to}");
///     })
///     .build();
/// assert_eq!(breaker.name(), "payments");
/// ```
pub struct BreakerBuilder {
    settings: Settings,
    ready_to_trip: Option<TripFn>,
    classifier: Option<Arc<dyn OutcomeClassifier>>,
    predicates: PredicateClassifier,
    has_predicates: bool,
    callbacks: Callbacks,
}

impl BreakerBuilder {
    /// Create a new builder for a breaker with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            settings: Settings {
                name: name.into(),
                ..Settings::default()
            },
            ready_to_trip: None,
            classifier: None,
            predicates: PredicateClassifier::new(),
            has_predicates: false,
            callbacks: Callbacks::new(),
        }
    }

    /// Cap of admitted non-excluded requests while half-open; 0 means 1.
    pub fn max_requests(mut self, max_requests: u32) -> Self {
        self.settings.max_requests = max_requests;
        self
    }

    /// Closed-state counter-clearing period; zero disables clearing.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.settings.interval = interval;
        self
    }

    /// Bucket size of the closed-state rolling window; zero or a value not
    /// smaller than the interval selects the classic fixed window.
    pub fn bucket_period(mut self, bucket_period: Duration) -> Self {
        self.settings.bucket_period = bucket_period;
        self
    }

    /// Open-state period before half-open probing; zero means 60 seconds.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Trip decision, called with a counts snapshot whenever a request
    /// fails in the closed state. The default trips after more than five
    /// consecutive failures.
    pub fn ready_to_trip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Counts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Some(Arc::new(predicate));
        self
    }

    /// Install a complete outcome classifier, replacing any per-predicate
    /// closures.
    pub fn classifier(mut self, classifier: Arc<dyn OutcomeClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Classify non-excluded outcomes; the default counts only the absence
    /// of an error as a success.
    pub fn is_successful<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&dyn Any>) -> bool + Send + Sync + 'static,
    {
        self.predicates = self.predicates.successful_when(predicate);
        self.has_predicates = true;
        self
    }

    /// Mark outcomes as neutral, counted neither as success nor failure.
    /// Recommended for caller-side cancellations.
    pub fn is_excluded<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&dyn Any>) -> bool + Send + Sync + 'static,
    {
        self.predicates = self.predicates.excluded_when(predicate);
        self.has_predicates = true;
        self
    }

    /// Observer invoked on every state transition, under the breaker mutex.
    /// It must not call back into the breaker and should return quickly.
    pub fn on_state_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        self.callbacks.on_state_change = Some(Arc::new(callback));
        self
    }

    fn into_parts(
        self,
    ) -> (
        Settings,
        Option<TripFn>,
        Option<Arc<dyn OutcomeClassifier>>,
        Callbacks,
    ) {
        let classifier = match self.classifier {
            Some(classifier) => Some(classifier),
            None if self.has_predicates => {
                Some(Arc::new(self.predicates) as Arc<dyn OutcomeClassifier>)
            }
            None => None,
        };
        (self.settings, self.ready_to_trip, classifier, self.callbacks)
    }

    /// Build the circuit breaker.
    pub fn build(self) -> CircuitBreaker {
        let (settings, ready_to_trip, classifier, callbacks) = self.into_parts();
        CircuitBreaker::with_parts(settings, ready_to_trip, classifier, callbacks)
    }

    /// Build a two-step breaker exposing only admission and accessors.
    pub fn build_two_step(self) -> TwoStepCircuitBreaker {
        TwoStepCircuitBreaker::from_breaker(self.build())
    }

    /// Build a distributed breaker replicating its state through `store`.
    ///
    /// Fails with [`CircuitError::NoSharedStore`] when no store is given
    /// and surfaces any error from seeding the store key.
    pub fn build_distributed(
        self,
        store: Option<Arc<dyn SharedDataStore>>,
    ) -> Result<DistributedCircuitBreaker, CircuitError> {
        DistributedCircuitBreaker::from_breaker(store, self.build())
    }
}
