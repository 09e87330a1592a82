//! Outcome classification for reported call results.
//!
//! This module decides how the error (or absence of one) reported for a
//! finished call counts against the breaker: success, failure, or an
//! exclusion that touches neither failure statistics nor streaks.

use std::any::Any;
use std::sync::Arc;

/// Verdict for a finished call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Neutral: counted as a request and an exclusion, nothing else.
    Excluded,
}

/// Decides how a reported error counts against the breaker.
///
/// `classify` consults `is_excluded` first and `is_successful` second, so
/// an error matched by both predicates is excluded. The defaults reproduce
/// the stock behavior: nothing is excluded, and only the absence of an
/// error is a success.
///
/// The error is handed over as `&dyn Any`; implementations downcast to the
/// concrete error types they understand.
///
/// # Examples
///
/// ```rust
/// use breakerbox::{Outcome, OutcomeClassifier, PredicateClassifier};
///
/// // Treat caller-side cancellations as neutral
/// let classifier = PredicateClassifier::new().excluded_when(|error| {
///     error
///         .and_then(|e| e.downcast_ref::<&str>())
///         .is_some_and(|e| *e == "canceled")
/// });
///
/// assert_eq!(classifier.classify(Some(&"canceled")), Outcome::Excluded);
/// assert_eq!(classifier.classify(Some(&"timeout")), Outcome::Failure);
/// assert_eq!(classifier.classify(None), Outcome::Success);
/// ```
pub trait OutcomeClassifier: Send + Sync {
    /// Whether the outcome is neutral, counted neither as success nor as
    /// failure.
    fn is_excluded(&self, error: Option<&dyn Any>) -> bool {
        let _ = error;
        false
    }

    /// Whether the outcome counts as a success.
    fn is_successful(&self, error: Option<&dyn Any>) -> bool {
        error.is_none()
    }

    /// Apply both predicates in precedence order.
    fn classify(&self, error: Option<&dyn Any>) -> Outcome {
        if self.is_excluded(error) {
            Outcome::Excluded
        } else if self.is_successful(error) {
            Outcome::Success
        } else {
            Outcome::Failure
        }
    }
}

/// Classifier with the stock rules: nothing excluded, no error is success.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl OutcomeClassifier for DefaultClassifier {}

/// Type alias for predicate closures over the reported error.
pub type ErrorPredicate = Arc<dyn Fn(Option<&dyn Any>) -> bool + Send + Sync>;

/// Closure-backed classifier.
///
/// Predicates left unset fall back to the stock rules.
#[derive(Clone, Default)]
pub struct PredicateClassifier {
    excluded: Option<ErrorPredicate>,
    successful: Option<ErrorPredicate>,
}

impl PredicateClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the exclusion predicate.
    pub fn excluded_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&dyn Any>) -> bool + Send + Sync + 'static,
    {
        self.excluded = Some(Arc::new(predicate));
        self
    }

    /// Set the success predicate.
    pub fn successful_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(Option<&dyn Any>) -> bool + Send + Sync + 'static,
    {
        self.successful = Some(Arc::new(predicate));
        self
    }
}

impl OutcomeClassifier for PredicateClassifier {
    fn is_excluded(&self, error: Option<&dyn Any>) -> bool {
        match &self.excluded {
            Some(predicate) => predicate(error),
            None => false,
        }
    }

    fn is_successful(&self, error: Option<&dyn Any>) -> bool {
        match &self.successful {
            Some(predicate) => predicate(error),
            None => error.is_none(),
        }
    }
}

impl std::fmt::Debug for PredicateClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("excluded", &self.excluded.is_some())
            .field("successful", &self.successful.is_some())
            .finish()
    }
}
