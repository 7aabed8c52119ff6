//! SQLite bootstrap for the key/value substrate.
//!
//! Opening a connection sets the busy timeout and brings the `kv_entries`
//! schema up to `migrations::latest_version()`. Failures surface as
//! `KvError`, the same error callers see for individual reads and writes.

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};
