//! Shared state storage for distributed breakers.
//!
//! This module defines the store contract consumed by
//! [`DistributedCircuitBreaker`](crate::DistributedCircuitBreaker) and an
//! in-memory realization:
//! - `SharedDataStore`: the minimal key/value contract
//! - `MemoryStore`: thread-safe in-memory store for tests and
//!   single-process sharing

use std::collections::HashMap;
use std::sync::Mutex;

/// Boxed error returned by store operations.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Keeper of the serialized shared state of distributed circuit breakers.
///
/// `get` must distinguish a missing key (`Ok(None)`) from a store failure.
/// `set` persists the byte string verbatim. After a successful `set`, a
/// later `get` on any process must observe at least that write; stores
/// without single-key total-order visibility produce anomalous transitions.
/// Compare-and-swap is not required, so concurrent writers follow
/// last-writer-wins.
pub trait SharedDataStore: Send + Sync {
    /// Fetch the bytes stored under `name`, or `None` for an absent key.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Persist `data` under `name`, replacing any previous value.
    fn set(&self, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Thread-safe in-memory store.
///
/// Useful in tests and for sharing one logical breaker between handles
/// within a single process.
///
/// # Example
///
/// ```rust
/// use breakerbox::{DistributedCircuitBreaker, MemoryStore, Settings};
/// use std::sync::Arc;
///
/// let store = Arc::new(MemoryStore::new());
/// let breaker = DistributedCircuitBreaker::new(
///     Some(store),
///     Settings {
///         name: "shared".to_string(),
///         ..Settings::default()
///     },
/// )
/// .unwrap();
/// assert_eq!(breaker.name(), "shared");
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedDataStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(name).cloned())
    }

    fn set(&self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(name.to_string(), data.to_vec());
        Ok(())
    }
}
