//! Local/remote reconciliation.
//!
//! # Responsibility
//! - Merge entry collections under explicit conflict policies.
//! - Push local state to, and pull remote state from, the backend table.
//!
//! # Invariants
//! - Merging never drops an id present in either input.
//! - Remote field-name aliasing is resolved in `remote` only.

pub mod coordinator;
pub mod merge;
pub mod remote;
