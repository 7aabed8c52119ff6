//! Use-case services.
//!
//! # Responsibility
//! - Expose the entry store facade that UI layers talk to.
//! - Own debounced persistence and cross-namespace migrations.
//!
//! # Invariants
//! - Only `migration_service` writes across namespaces.

pub mod debounced_writer;
pub mod entry_store;
pub mod migration_service;
