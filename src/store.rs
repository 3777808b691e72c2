//! In-memory key-value store.
//!
//! The store is the single owner of the mapping. Misses and duplicates are
//! ordinary outcomes: they come back as [`StoreError`] values whose text is
//! part of the caller contract, never as panics.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::info;

/// Successful outcome of a store operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Added,
    Found(String),
    Deleted,
    /// Every entry present when the listing was taken, in map order.
    Listing(Vec<(String, String)>),
    Empty,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Added => f.write_str("OK: Key added successfully."),
            Reply::Found(value) => write!(f, "OK: {value}"),
            Reply::Deleted => f.write_str("OK: Key deleted successfully."),
            Reply::Listing(entries) => {
                let lines = entries
                    .iter()
                    .map(|(key, value)| format!("{key} : {value}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                f.write_str(lines.trim())
            }
            Reply::Empty => f.write_str("The key-value store is empty."),
        }
    }
}

/// Expected, non-fatal failures.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("ERROR: Key already exists.")]
    KeyExists,
    #[error("ERROR: Key not found.")]
    KeyNotFound,
    #[error("ERROR: Key does not exist.")]
    KeyDoesNotExist,
}

pub type StoreResult = Result<Reply, StoreError>;

#[derive(Debug, Default)]
pub struct Store {
    entries: RwLock<HashMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `key -> value` only if `key` is absent.
    ///
    /// The absence check and the write happen under one write lock, so of
    /// any number of racing inserts for the same key exactly one wins.
    pub fn insert(&self, key: String, value: String) -> StoreResult {
        let mut entries = self.write();
        match entries.entry(key) {
            Entry::Occupied(slot) => {
                info!(op = "insert", key = %slot.key(), %value, "insert failed: key already exists");
                Err(StoreError::KeyExists)
            }
            Entry::Vacant(slot) => {
                info!(op = "insert", key = %slot.key(), %value, "insert succeeded");
                slot.insert(value);
                Ok(Reply::Added)
            }
        }
    }

    pub fn lookup(&self, key: &str) -> StoreResult {
        let found = self.read().get(key).cloned();
        match found {
            Some(value) => {
                info!(op = "lookup", key, %value, "lookup succeeded");
                Ok(Reply::Found(value))
            }
            None => {
                info!(op = "lookup", key, "lookup failed: key not found");
                Err(StoreError::KeyNotFound)
            }
        }
    }

    /// Remove `key`. Whether the removal found anything decides the outcome,
    /// so only one of several racing deletes can report success.
    pub fn delete(&self, key: &str) -> StoreResult {
        let removed = self.write().remove(key);
        match removed {
            Some(_) => {
                info!(op = "delete", key, "delete succeeded");
                Ok(Reply::Deleted)
            }
            None => {
                info!(op = "delete", key, "delete failed: key does not exist");
                Err(StoreError::KeyDoesNotExist)
            }
        }
    }

    pub fn dump(&self) -> Reply {
        let entries: Vec<(String, String)> = self
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        if entries.is_empty() {
            info!(op = "dump", "dump: store is empty");
            Reply::Empty
        } else {
            info!(op = "dump", entries = entries.len(), "dump: listing all entries");
            Reply::Listing(entries)
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // No operation panics while holding the lock, so a poisoned map is
    // still consistent and safe to keep using.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
