//! Entry collection persistence on top of the key/value substrate.
//!
//! # Responsibility
//! - Serialize whole entry collections under one namespace key.
//! - Own the per-namespace "first entry date" side marker.
//!
//! # Invariants
//! - `load` never fails: absent or malformed payloads load as empty.
//! - `try_load` reports read failures and malformed payloads to the caller.
//! - Writes never panic or propagate errors; they report `false`.
//! - No in-memory caching. The caller owns the in-memory copy.

use crate::model::entry::Entry;
use crate::repo::kv_repo::{KeyValueStore, KvResult};
use log::{debug, error, warn};
use std::sync::Arc;

/// What a strict read found under one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntries {
    Absent,
    Loaded(Vec<Entry>),
    /// A payload exists but does not decode. It is never rewritten by reads.
    Unreadable,
}

impl StoredEntries {
    /// Lenient view: absent and unreadable payloads are empty.
    pub fn into_entries(self) -> Vec<Entry> {
        match self {
            Self::Loaded(entries) => entries,
            Self::Absent | Self::Unreadable => Vec::new(),
        }
    }
}

/// Load/save/remove of JSON entry collections.
#[derive(Clone)]
pub struct PersistenceStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PersistenceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Returns the stored collection, or empty when absent or unreadable.
    pub fn load(&self, key: &str) -> Vec<Entry> {
        match self.try_load(key) {
            Ok(stored) => stored.into_entries(),
            Err(err) => {
                error!(
                    "event=entries_load module=repo status=error key={} error_code=storage_read_failed error={}",
                    key, err
                );
                Vec::new()
            }
        }
    }

    /// Strict read that keeps "absent", "unreadable" and "read failed" apart.
    ///
    /// Callers that write derived data back (migrations) must use this, since
    /// treating a failed read as empty would overwrite real entries.
    pub fn try_load(&self, key: &str) -> KvResult<StoredEntries> {
        let Some(payload) = self.kv.get(key)? else {
            return Ok(StoredEntries::Absent);
        };

        match serde_json::from_str::<Vec<Entry>>(&payload) {
            Ok(entries) => {
                debug!(
                    "event=entries_load module=repo status=ok key={} count={}",
                    key,
                    entries.len()
                );
                Ok(StoredEntries::Loaded(entries))
            }
            Err(err) => {
                // Payload content is user text; only report position metadata.
                warn!(
                    "event=entries_load module=repo status=error key={} error_code=payload_malformed line={} column={} bytes={}",
                    key,
                    err.line(),
                    err.column(),
                    payload.len()
                );
                Ok(StoredEntries::Unreadable)
            }
        }
    }

    /// Serializes and writes the collection. Returns `false` on failure.
    pub fn save(&self, key: &str, entries: &[Entry]) -> bool {
        let payload = match serde_json::to_string(entries) {
            Ok(payload) => payload,
            Err(err) => {
                error!(
                    "event=entries_save module=repo status=error key={} error_code=serialize_failed error={}",
                    key, err
                );
                return false;
            }
        };

        match self.kv.set(key, &payload) {
            Ok(()) => {
                debug!(
                    "event=entries_save module=repo status=ok key={} count={}",
                    key,
                    entries.len()
                );
                true
            }
            Err(err) => {
                error!(
                    "event=entries_save module=repo status=error key={} error_code=storage_write_failed error={}",
                    key, err
                );
                false
            }
        }
    }

    /// Removes a key. Removing an absent key is a success.
    pub fn remove(&self, key: &str) -> bool {
        match self.kv.remove(key) {
            Ok(_) => true,
            Err(err) => {
                error!(
                    "event=entries_remove module=repo status=error key={} error_code=storage_write_failed error={}",
                    key, err
                );
                false
            }
        }
    }

    pub fn load_marker(&self, key: &str) -> Option<i64> {
        match self.kv.get(key) {
            Ok(Some(value)) => value.trim().parse::<i64>().ok(),
            Ok(None) => None,
            Err(err) => {
                error!(
                    "event=marker_load module=repo status=error key={} error={}",
                    key, err
                );
                None
            }
        }
    }

    pub fn save_marker(&self, key: &str, value: i64) -> bool {
        match self.kv.set(key, &value.to_string()) {
            Ok(()) => true,
            Err(err) => {
                error!(
                    "event=marker_save module=repo status=error key={} error={}",
                    key, err
                );
                false
            }
        }
    }

    pub fn clear_marker(&self, key: &str) -> bool {
        self.remove(key)
    }
}
