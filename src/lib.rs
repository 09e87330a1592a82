//! Breakerbox - circuit breaker with shared-state replication
//!
//! This crate provides a complete circuit breaker implementation with:
//! - A three-state machine (closed, open, half-open) driven by per-epoch
//!   counters and wall-clock expiries
//! - Generation-tagged accounting that attributes every outcome to the
//!   epoch its request was admitted in, dropping stale reports
//! - Optional rolling-window bucketization of the closed-state failure rate
//! - A distributed variant that replicates breaker state through a
//!   pluggable key/value store
//!
//! # Example
//!
//! ```rust
//! use breakerbox::CircuitBreaker;
//!
//! let breaker = CircuitBreaker::builder("my_service")
//!     .max_requests(2)
//!     .timeout(std::time::Duration::from_secs(30))
//!     .ready_to_trip(|counts| counts.consecutive_failures > 3)
//!     .build();
//!
//! // Execute with breaker protection
//! let reply = breaker.execute(|| {
//!     // Your service call here
//!     Ok::<_, String>("success")
//! });
//! assert!(reply.is_ok());
//!
//! // Check breaker state
//! if breaker.state() == breakerbox::State::Open {
//!     println!("circuit is open, skipping call");
//! }
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod counts;
pub mod distributed;
pub mod errors;
pub mod storage;

pub use builder::BreakerBuilder;
pub use circuit::{CircuitBreaker, Settings, Token, TwoStepCircuitBreaker};
pub use classifier::{DefaultClassifier, Outcome, OutcomeClassifier, PredicateClassifier};
pub use counts::Counts;
pub use distributed::{DistributedCircuitBreaker, DistributedToken, SharedState};
pub use errors::{CircuitError, UnknownStateError};
pub use storage::{MemoryStore, SharedDataStore, StoreError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a circuit breaker.
///
/// Encoded as an integer (`0` closed, `1` half-open, `2` open) in the
/// shared-state record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum State {
    /// Requests pass through unimpeded.
    Closed = 0,
    /// A bounded probing window after the open timeout elapsed.
    HalfOpen = 1,
    /// Requests are rejected without running; an expiry marks when probing
    /// becomes eligible.
    Open = 2,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Closed => f.write_str("closed"),
            State::HalfOpen => f.write_str("half-open"),
            State::Open => f.write_str("open"),
        }
    }
}

impl From<State> for u8 {
    fn from(state: State) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for State {
    type Error = UnknownStateError;

    fn try_from(ordinal: u8) -> Result<Self, Self::Error> {
        match ordinal {
            0 => Ok(State::Closed),
            1 => Ok(State::HalfOpen),
            2 => Ok(State::Open),
            other => Err(UnknownStateError(other)),
        }
    }
}
