//! Local durable key-value persistence
//!
//! This module defines the trait for the session-scoped key-value store the
//! core uses to survive reconnects: the player's server-assigned id, answers
//! that could not be delivered upstream, and the last known roster. The
//! abstraction keeps the core testable without a real storage backend;
//! embedding applications typically back it with browser storage or a small
//! on-disk map.

use std::collections::HashMap;

use thiserror::Error;

use crate::session_code::SessionCode;

/// Errors that can occur when persisting to the local store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The backing store rejected the write (quota, serialization, ...)
    #[error("local store write failed: {0}")]
    WriteFailed(String),
}

/// Trait for session-scoped key-value persistence
///
/// Implementations must be durable across reconnects of the same hosting
/// view but may be scoped to a single device; nothing in the core assumes
/// the store is shared between participants.
pub trait KeyStore {
    /// Reads the value stored under `key`, if any
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns [`Error::WriteFailed`] if the backing store rejects the write.
    fn set(&mut self, key: &str, value: &str) -> Result<(), Error>;

    /// Removes the value stored under `key`, if any
    fn remove(&mut self, key: &str);

    /// Lists every key currently present in the store
    fn keys(&self) -> Vec<String>;
}

/// Builds the store key remembering a player's server-assigned id
pub fn player_id_key(code: SessionCode) -> String {
    format!("player-id:{code}")
}

/// Builds the store key caching the last known roster
pub fn roster_key(code: SessionCode) -> String {
    format!("roster:{code}")
}

/// Prefix under which pending answer submissions are stored
pub const PENDING_PREFIX: &str = "pending:";

/// Builds the store key for a pending submission
pub fn pending_key(submission_id: &str) -> String {
    format!("{PENDING_PREFIX}{submission_id}")
}

/// An in-memory [`KeyStore`] backed by a `HashMap`
///
/// Used in tests and as a fallback when no durable storage is available;
/// contents are lost when the value is dropped.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.entries.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());

        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").as_deref(), Some("1"));
        assert_eq!(store.len(), 2);

        store.set("a", "3").unwrap();
        assert_eq!(store.get("a").as_deref(), Some("3"));

        store.remove("a");
        assert_eq!(store.get("a"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_keys() {
        let mut store = MemoryStore::new();
        store.set("pending:x", "1").unwrap();
        store.set("pending:y", "2").unwrap();
        store.set("roster:123456", "{}").unwrap();

        let pending: Vec<_> = store
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(PENDING_PREFIX))
            .collect();
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_key_builders_are_namespaced() {
        let code: SessionCode = "123456".parse().unwrap();
        assert_eq!(player_id_key(code), "player-id:123456");
        assert_eq!(roster_key(code), "roster:123456");
        assert_eq!(pending_key("s-1"), "pending:s-1");
    }
}
