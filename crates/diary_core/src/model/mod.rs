//! Diary domain model.
//!
//! # Responsibility
//! - Define the canonical entry record and its lifecycle helpers.
//! - Define identities and how they map onto storage namespaces.
//!
//! # Invariants
//! - Every entry is identified by a stable `EntryId`.
//! - Deletion is permanent; there are no tombstones in local storage.

pub mod entry;
pub mod identity;
