//! At-most-once execution per key.
//!
//! A [`DedupGuard`] maps keys to one-shot gates. The first caller for a key
//! runs the action; every concurrent or later caller for the same key blocks
//! until that action finishes and then observes the same outcome, success or
//! error. The map has its own lock, held only long enough to fetch or insert
//! a gate, so actions for different keys run in parallel.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::error::{Error, Result};

type Gate<V> = Arc<OnceLock<std::result::Result<V, Arc<Error>>>>;

/// Single-flight map from key to the broadcast outcome of one action.
pub struct DedupGuard<K, V> {
    gates: Mutex<HashMap<K, Gate<V>>>,
}

impl<K, V> Default for DedupGuard<K, V> {
    fn default() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> DedupGuard<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `action` unless an action for `key` already ran or is running,
    /// and returns the single outcome for `key`.
    ///
    /// Errors are returned wrapped in [`Error::Shared`].
    pub fn run<F>(&self, key: K, action: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(gates.entry(key).or_default())
        };
        match gate.get_or_init(|| action().map_err(Arc::new)) {
            Ok(value) => Ok(value.clone()),
            Err(err) => Err(Error::Shared(Arc::clone(err))),
        }
    }

    /// Number of keys that have been requested so far.
    pub fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
