//! Error types for circuit breaker operations

use crate::storage::StoreError;
use thiserror::Error;

/// Errors that can occur during circuit breaker operations.
///
/// Admission rejections (`Open`, `TooManyRequests`) are returned without
/// running the wrapped operation; `Execution` carries the operation's own
/// error unchanged.
#[derive(Debug, Error)]
pub enum CircuitError<E = StoreError> {
    /// State is open, calls are being rejected.
    #[error("circuit breaker is open")]
    Open,
    /// Half-open admission cap has been reached.
    #[error("too many requests")]
    TooManyRequests,
    /// A distributed breaker was constructed without a store.
    #[error("no shared store")]
    NoSharedStore,
    /// The store holds no state under the breaker's key.
    #[error("no shared state")]
    NoSharedState,
    /// The shared store, or the shared-state codec, failed.
    #[error("shared store failure: {0}")]
    Store(#[source] StoreError),
    /// The wrapped operation failed.
    #[error("{0}")]
    Execution(E),
}

impl CircuitError<StoreError> {
    /// Re-label an infrastructure error against a caller's execution error
    /// type. Store-layer errors never carry an execution payload.
    pub(crate) fn cast<E>(self) -> CircuitError<E> {
        match self {
            CircuitError::Open => CircuitError::Open,
            CircuitError::TooManyRequests => CircuitError::TooManyRequests,
            CircuitError::NoSharedStore => CircuitError::NoSharedStore,
            CircuitError::NoSharedState => CircuitError::NoSharedState,
            CircuitError::Store(error) => CircuitError::Store(error),
            CircuitError::Execution(error) => CircuitError::Store(error),
        }
    }
}

/// Returned when a state ordinal outside the known range is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown state: {0}")]
pub struct UnknownStateError(pub u8);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CircuitError::<String>::Open.to_string(),
            "circuit breaker is open"
        );
        assert_eq!(
            CircuitError::<String>::TooManyRequests.to_string(),
            "too many requests"
        );
        assert_eq!(
            CircuitError::<String>::NoSharedStore.to_string(),
            "no shared store"
        );
        assert_eq!(
            CircuitError::<String>::NoSharedState.to_string(),
            "no shared state"
        );
        assert_eq!(
            CircuitError::Execution("boom".to_string()).to_string(),
            "boom"
        );
    }

    #[test]
    fn test_store_error_source() {
        use std::error::Error as _;

        let inner: StoreError = "connection reset".into();
        let error: CircuitError = CircuitError::Store(inner);
        assert_eq!(error.to_string(), "shared store failure: connection reset");
        assert!(error.source().is_some());
    }
}
