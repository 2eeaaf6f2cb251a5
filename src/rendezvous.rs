//! Keyed hand-off between signaling requests
//!
//! A `put` parks a value under a key for a later, unrelated request to
//! `take`. Last writer wins, a take removes unconditionally, and there is no
//! expiry: an entry whose taker never arrives stays until process exit.

use std::collections::HashMap;
use std::sync::Mutex;

/// Keyed single-value registry
pub struct Rendezvous<T> {
    entries: Mutex<HashMap<String, T>>,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Park a value under `key`, replacing any previous occupant
    pub fn put(&self, key: impl Into<String>, value: T) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.into(), value);
        }
    }

    /// Remove and return the value under `key`. A second take for the same
    /// key yields `None` until someone puts again.
    pub fn take(&self, key: &str) -> Option<T> {
        self.entries.lock().ok().and_then(|mut e| e.remove(key))
    }

    /// Number of parked entries
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}
