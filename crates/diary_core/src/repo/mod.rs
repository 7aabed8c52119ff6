//! Persistence layer.
//!
//! # Responsibility
//! - Define the durable key/value substrate contract.
//! - Isolate SQL and JSON payload details from services.
//!
//! # Invariants
//! - Entry reads degrade to empty collections instead of failing.
//! - Entry writes report success as `bool` and never panic.

pub mod entry_repo;
pub mod kv_repo;
