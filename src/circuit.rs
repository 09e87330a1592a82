//! Circuit breaker core: settings, the state machine, and call admission.
//!
//! The breaker owns one mutex around its mutable core (state, generation,
//! counts, expiry). Admission, outcome application, and every accessor run
//! under that mutex; the wrapped operation itself always runs with the
//! mutex released so a slow call never blocks other callers.

use crate::builder::BreakerBuilder;
use crate::callbacks::Callbacks;
use crate::classifier::{DefaultClassifier, Outcome, OutcomeClassifier};
use crate::counts::{Counts, RollingCounts};
use crate::distributed::SharedState;
use crate::errors::CircuitError;
use crate::State;
use chrono::{DateTime, TimeDelta, Utc};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Open-state period applied when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Trip predicate, consulted with a counts snapshot after every
/// closed-state failure.
pub type TripFn = Arc<dyn Fn(Counts) -> bool + Send + Sync>;

fn default_ready_to_trip(counts: Counts) -> bool {
    counts.consecutive_failures > 5
}

/// Configures a circuit breaker.
///
/// `name` identifies the breaker in callbacks and shared-store keys.
///
/// `max_requests` is the maximum number of non-excluded requests allowed to
/// pass through while the breaker is half-open. Zero means one.
///
/// `interval` is the cyclic period of the closed state after which the
/// breaker clears its internal counts. Zero disables periodic clearing.
///
/// `bucket_period` slices the closed-state interval into a rolling window
/// of `interval / bucket_period` buckets, so the counts consulted by the
/// trip predicate cover a sliding horizon instead of everything since the
/// last clearing. Zero, or any value not smaller than `interval`, selects
/// the classic fixed window.
///
/// `timeout` is the period of the open state, after which the breaker
/// becomes half-open. Zero means 60 seconds.
///
/// Trip and classification predicates, and the state-change callback, are
/// configured through [`BreakerBuilder`].
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub name: String,
    pub max_requests: u32,
    pub interval: Duration,
    pub bucket_period: Duration,
    pub timeout: Duration,
}

fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// Epoch marker captured at admission: the generation, and the window age
/// so a late outcome can find (or miss) its admission bucket.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallTag {
    generation: u64,
    age: u64,
}

#[derive(Debug)]
struct Core {
    state: State,
    generation: u64,
    counts: RollingCounts,
    expiry: Option<DateTime<Utc>>,
}

struct Shared {
    name: String,
    max_requests: u32,
    /// Closed-state clearing period; zero disables clearing.
    interval: TimeDelta,
    /// Per-bucket rotation period; equals `interval` for fixed windows.
    rotation: TimeDelta,
    /// Bucket count of the closed-state window.
    window: usize,
    timeout: TimeDelta,
    ready_to_trip: TripFn,
    classifier: Arc<dyn OutcomeClassifier>,
    callbacks: Callbacks,
    core: Mutex<Core>,
}

impl Shared {
    fn new(
        settings: Settings,
        ready_to_trip: Option<TripFn>,
        classifier: Option<Arc<dyn OutcomeClassifier>>,
        callbacks: Callbacks,
    ) -> Self {
        let max_requests = if settings.max_requests == 0 {
            1
        } else {
            settings.max_requests
        };

        let interval = delta(settings.interval);
        let (rotation, window) = if !settings.interval.is_zero()
            && !settings.bucket_period.is_zero()
            && settings.bucket_period < settings.interval
        {
            let bucket_period = delta(settings.bucket_period);
            let buckets = interval.num_microseconds().unwrap_or(i64::MAX)
                / bucket_period.num_microseconds().unwrap_or(i64::MAX).max(1);
            (bucket_period, buckets.max(1) as usize)
        } else {
            (interval, 1)
        };

        let timeout = if settings.timeout.is_zero() {
            delta(DEFAULT_TIMEOUT)
        } else {
            delta(settings.timeout)
        };

        let shared = Self {
            name: settings.name,
            max_requests,
            interval,
            rotation,
            window,
            timeout,
            ready_to_trip: ready_to_trip.unwrap_or_else(|| Arc::new(default_ready_to_trip)),
            classifier: classifier.unwrap_or_else(|| Arc::new(DefaultClassifier)),
            callbacks,
            core: Mutex::new(Core {
                state: State::Closed,
                generation: 0,
                counts: RollingCounts::new(window),
                expiry: None,
            }),
        };
        {
            let mut core = shared.core.lock().unwrap();
            shared.to_new_generation(&mut core, Utc::now());
        }
        shared
    }

    /// Apply any due time-driven transition and return the effective state.
    fn current_state(&self, core: &mut Core, now: DateTime<Utc>) -> (State, u64) {
        match core.state {
            State::Closed => {
                if let Some(expiry) = core.expiry {
                    if expiry < now {
                        self.rotate(core, expiry, now);
                    }
                }
            }
            State::Open => {
                if let Some(expiry) = core.expiry {
                    if expiry <= now {
                        self.set_state(core, State::HalfOpen, now);
                    }
                }
            }
            State::HalfOpen => {}
        }
        (core.state, core.generation)
    }

    /// Catch the closed-state window up across the elapsed bucket periods.
    /// The generation is bumped whenever the window has fully turned over,
    /// which for a single-bucket window is every rotation.
    fn rotate(&self, core: &mut Core, expiry: DateTime<Utc>, now: DateTime<Utc>) {
        let period = self.rotation.num_microseconds().unwrap_or(i64::MAX).max(1);
        let elapsed = (now - expiry).num_microseconds().unwrap_or(i64::MAX).max(0);
        let periods = elapsed / period + 1;

        core.counts.advance(periods as u64);
        core.expiry = Some(expiry + TimeDelta::microseconds(period.saturating_mul(periods)));
        if core.counts.age() % self.window as u64 == 0 {
            core.generation += 1;
        }
    }

    fn set_state(&self, core: &mut Core, state: State, now: DateTime<Utc>) {
        if core.state == state {
            return;
        }
        let prev = core.state;
        core.state = state;
        self.to_new_generation(core, now);

        match state {
            State::Open => {
                tracing::warn!(breaker = %self.name, from = %prev, "circuit opened");
            }
            State::HalfOpen => {
                tracing::info!(breaker = %self.name, "circuit half-open, probing");
            }
            State::Closed => {
                tracing::info!(breaker = %self.name, "circuit closed");
            }
        }
        self.callbacks.trigger(&self.name, prev, state);
    }

    fn to_new_generation(&self, core: &mut Core, now: DateTime<Utc>) {
        core.generation += 1;
        core.counts.clear();
        self.update_expiry(core, now);
    }

    fn update_expiry(&self, core: &mut Core, now: DateTime<Utc>) {
        core.expiry = match core.state {
            State::Closed => {
                if self.interval.is_zero() {
                    None
                } else {
                    Some(now + self.rotation)
                }
            }
            State::Open => Some(now + self.timeout),
            State::HalfOpen => None,
        };
    }

    fn before_request<E>(&self) -> Result<CallTag, CircuitError<E>> {
        let mut core = self.core.lock().unwrap();
        let now = Utc::now();
        let (state, generation) = self.current_state(&mut core, now);

        match state {
            State::Open => return Err(CircuitError::Open),
            State::HalfOpen => {
                let counts = core.counts.total();
                if counts.requests.saturating_sub(counts.total_exclusions) >= self.max_requests {
                    return Err(CircuitError::TooManyRequests);
                }
            }
            State::Closed => {}
        }

        core.counts.on_request();
        Ok(CallTag {
            generation,
            age: core.counts.age(),
        })
    }

    fn after_request(&self, tag: CallTag, outcome: Outcome) {
        let mut core = self.core.lock().unwrap();
        let now = Utc::now();
        let (state, generation) = self.current_state(&mut core, now);
        // A state change while the call was in flight invalidates its epoch
        if generation != tag.generation {
            return;
        }

        match outcome {
            Outcome::Success => self.on_success(&mut core, state, tag.age, now),
            Outcome::Failure => self.on_failure(&mut core, state, tag.age, now),
            Outcome::Excluded => core.counts.on_exclusion(tag.age),
        }
    }

    fn on_success(&self, core: &mut Core, state: State, age: u64, now: DateTime<Utc>) {
        match state {
            State::Closed => core.counts.on_success(age),
            State::HalfOpen => {
                core.counts.on_success(age);
                if core.counts.total().consecutive_successes >= self.max_requests {
                    self.set_state(core, State::Closed, now);
                }
            }
            State::Open => {}
        }
    }

    fn on_failure(&self, core: &mut Core, state: State, age: u64, now: DateTime<Utc>) {
        match state {
            State::Closed => {
                core.counts.on_failure(age);
                if (self.ready_to_trip)(core.counts.total()) {
                    self.set_state(core, State::Open, now);
                }
            }
            State::HalfOpen => self.set_state(core, State::Open, now),
            State::Open => {}
        }
    }

    fn inject(&self, snapshot: SharedState) {
        let mut core = self.core.lock().unwrap();
        core.state = snapshot.state;
        core.generation = snapshot.generation;
        core.counts.set_total(snapshot.counts);
        core.expiry = snapshot.expiry;
    }

    fn extract(&self) -> SharedState {
        let core = self.core.lock().unwrap();
        SharedState {
            state: core.state,
            generation: core.generation,
            counts: core.counts.total(),
            expiry: core.expiry,
        }
    }
}

/// Thread-safe circuit breaker guarding an unreliable operation.
///
/// Cloning is cheap and every clone drives the same breaker. The breaker is
/// created closed with zeroed counters; it trips open when the configured
/// predicate fires on a closed-state failure, rejects calls while open,
/// and probes recovery through a bounded half-open window once the open
/// timeout elapses.
///
/// # Example
///
/// ```rust
/// use breakerbox::{CircuitBreaker, CircuitError, Settings};
///
/// let breaker = CircuitBreaker::new(Settings::default());
///
/// match breaker.execute(|| Ok::<_, String>("reply")) {
///     Ok(reply) => println!("got: {reply}"),
///     Err(CircuitError::Open) => println!("breaker open, not calling"),
///     Err(error) => println!("call failed: {error}"),
/// }
/// ```
#[derive(Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
}

impl CircuitBreaker {
    /// Create a breaker from plain settings with the stock trip rule and
    /// outcome classifier.
    pub fn new(settings: Settings) -> Self {
        Self::with_parts(settings, None, None, Callbacks::new())
    }

    pub(crate) fn with_parts(
        settings: Settings,
        ready_to_trip: Option<TripFn>,
        classifier: Option<Arc<dyn OutcomeClassifier>>,
        callbacks: Callbacks,
    ) -> Self {
        Self {
            shared: Arc::new(Shared::new(settings, ready_to_trip, classifier, callbacks)),
        }
    }

    /// Create a new circuit breaker builder.
    pub fn builder(name: impl Into<String>) -> BreakerBuilder {
        BreakerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Current state, after applying any due time-driven transition.
    pub fn state(&self) -> State {
        let mut core = self.shared.core.lock().unwrap();
        let (state, _) = self.shared.current_state(&mut core, Utc::now());
        state
    }

    /// Snapshot of the internal counters.
    pub fn counts(&self) -> Counts {
        let core = self.shared.core.lock().unwrap();
        core.counts.total()
    }

    /// Run `request` if the breaker admits it.
    ///
    /// Rejections return [`CircuitError::Open`] or
    /// [`CircuitError::TooManyRequests`] without invoking `request`; a
    /// request error is classified, accounted, and handed back inside
    /// [`CircuitError::Execution`]. A panicking request is accounted as a
    /// failure before the panic resumes.
    pub fn execute<T, E, F>(&self, request: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: Any,
    {
        let tag = self.shared.before_request()?;

        match catch_unwind(AssertUnwindSafe(request)) {
            Err(panic) => {
                self.shared.after_request(tag, Outcome::Failure);
                resume_unwind(panic);
            }
            Ok(result) => {
                let outcome = match &result {
                    Ok(_) => self.shared.classifier.classify(None),
                    Err(error) => self.shared.classifier.classify(Some(error)),
                };
                self.shared.after_request(tag, outcome);
                result.map_err(CircuitError::Execution)
            }
        }
    }

    /// Admit a request without running it. The returned token reports the
    /// outcome in a separate step.
    pub fn allow(&self) -> Result<Token, CircuitError> {
        let tag = self.shared.before_request()?;
        Ok(Token {
            shared: Arc::clone(&self.shared),
            tag,
        })
    }

    pub(crate) fn admit<E>(&self) -> Result<CallTag, CircuitError<E>> {
        self.shared.before_request()
    }

    pub(crate) fn settle(&self, tag: CallTag, outcome: Outcome) {
        self.shared.after_request(tag, outcome);
    }

    pub(crate) fn inject_shared(&self, snapshot: SharedState) {
        self.shared.inject(snapshot);
    }

    pub(crate) fn extract_shared(&self) -> SharedState {
        self.shared.extract()
    }

    pub(crate) fn outcome_classifier(&self) -> &Arc<dyn OutcomeClassifier> {
        &self.shared.classifier
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.shared.name)
            .field("max_requests", &self.shared.max_requests)
            .finish_non_exhaustive()
    }
}

/// Single-shot handle reporting the outcome of an admitted request.
///
/// The token may move to any thread and be redeemed at any later time;
/// consuming it reports exactly once. If the breaker changed epoch while
/// the call was in flight, the report is dropped.
pub struct Token {
    shared: Arc<Shared>,
    tag: CallTag,
}

impl Token {
    /// Report the outcome; `None` means the request produced no error.
    pub fn done(self, error: Option<&dyn Any>) {
        let outcome = self.shared.classifier.classify(error);
        self.shared.after_request(self.tag, outcome);
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token").field("tag", &self.tag).finish()
    }
}

/// Variant of [`CircuitBreaker`] that only checks whether a request can
/// proceed and expects the caller to report the outcome through the token
/// returned by [`allow`](TwoStepCircuitBreaker::allow).
#[derive(Debug, Clone)]
pub struct TwoStepCircuitBreaker {
    breaker: CircuitBreaker,
}

impl TwoStepCircuitBreaker {
    pub fn new(settings: Settings) -> Self {
        Self {
            breaker: CircuitBreaker::new(settings),
        }
    }

    pub(crate) fn from_breaker(breaker: CircuitBreaker) -> Self {
        Self { breaker }
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    pub fn state(&self) -> State {
        self.breaker.state()
    }

    pub fn counts(&self) -> Counts {
        self.breaker.counts()
    }

    /// Check whether a new request can proceed; on success the token must
    /// be redeemed with the outcome.
    pub fn allow(&self) -> Result<Token, CircuitError> {
        self.breaker.allow()
    }
}
