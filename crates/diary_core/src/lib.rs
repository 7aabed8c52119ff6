//! Core engine for diary entry persistence and sync.
//! This crate is the single source of truth for entry invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod sync;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use logging::{default_log_level, init_logging, init_logging_from_config, logging_status};
pub use model::entry::{
    EditSnapshot, Entry, EntryDraft, EntryId, EntryPatch, EntryStatus, EntryValidationError,
};
pub use model::identity::{Identity, KeyResolver, MigrationResult};
pub use repo::entry_repo::PersistenceStore;
pub use repo::kv_repo::{KeyValueStore, KvError, KvResult, MemoryKvStore, SqliteKvRepository};
pub use service::entry_store::{DerivedStateHook, EntryStore, EntryStoreDeps, NoopDerivedState};
pub use service::migration_service::MigrationCoordinator;
pub use sync::coordinator::{
    LocalReplica, PullReport, PushReport, SyncCoordinator, SyncError, SyncPhase, SyncResult,
    SyncStatus,
};
pub use sync::merge::{merge, MergeOutcome, MergePolicy};
pub use sync::remote::{RemoteEntryTable, RemoteError, SessionProvider};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
