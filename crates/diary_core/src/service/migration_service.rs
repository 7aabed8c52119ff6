//! Cross-namespace migrations.
//!
//! # Responsibility
//! - Move the pre-namespacing payload into the active namespace.
//! - Carry guest entries into a user namespace on login.
//! - Copy user entries back into the guest namespace on logout.
//!
//! # Invariants
//! - This is the only component allowed to write across namespaces.
//! - Every migration is idempotent and reports a `MigrationResult`.
//! - "Nothing to migrate" is a successful no-op, never an error.
//! - A source is cleared only after its destination write succeeded.
//! - Nothing is written when either side cannot be read or decoded; an
//!   unreadable payload stays where it is.

use crate::model::identity::{Identity, KeyResolver, MigrationResult, LEGACY_KEY};
use crate::repo::entry_repo::{PersistenceStore, StoredEntries};
use crate::sync::merge::{merge_with_stats, MergePolicy};
use log::{error, info, warn};
use std::time::Instant;

/// Runs the legacy, login and logout migrations on one primitive.
#[derive(Clone)]
pub struct MigrationCoordinator {
    store: PersistenceStore,
}

impl MigrationCoordinator {
    pub fn new(store: PersistenceStore) -> Self {
        Self { store }
    }

    /// Merges `source` into `destination` and optionally removes `source`.
    ///
    /// The destination is the first merge operand, so `KeepFirst` favours
    /// data already stored under `destination`.
    pub fn migrate(
        &self,
        source: &str,
        destination: &str,
        policy: MergePolicy,
        clear_source: bool,
    ) -> MigrationResult {
        let started_at = Instant::now();
        let source_entries = match self.read_side(source, "source") {
            Ok(StoredEntries::Loaded(entries)) if !entries.is_empty() => entries,
            Ok(StoredEntries::Loaded(_)) => {
                if clear_source {
                    self.store.remove(source);
                }
                return nothing_to_do(source, destination, policy);
            }
            Ok(StoredEntries::Absent) => return nothing_to_do(source, destination, policy),
            Ok(StoredEntries::Unreadable) => {
                return MigrationResult::failed(format!(
                    "{source} holds an unreadable payload; left in place"
                ))
            }
            Err(message) => return MigrationResult::failed(message),
        };

        let destination_entries = match self.read_side(destination, "destination") {
            Ok(StoredEntries::Unreadable) => {
                return MigrationResult::failed(format!(
                    "{destination} holds an unreadable payload; {source} left untouched"
                ))
            }
            Ok(stored) => stored.into_entries(),
            Err(message) => return MigrationResult::failed(message),
        };

        let outcome = merge_with_stats(&destination_entries, &source_entries, policy);

        if !self.store.save(destination, &outcome.entries) {
            error!(
                "event=migrate module=service status=error source={} destination={} policy={} error_code=destination_write_failed",
                source,
                destination,
                policy.as_str()
            );
            return MigrationResult::failed(format!(
                "could not write {destination}; {source} left untouched"
            ));
        }

        if clear_source && !self.store.remove(source) {
            // Destination already holds the merged data; a second run is a no-op merge.
            error!(
                "event=migrate module=service status=error source={} destination={} error_code=source_clear_failed",
                source, destination
            );
        }

        info!(
            "event=migrate module=service status=ok source={} destination={} policy={} merged={} total={} cleared_source={} duration_ms={}",
            source,
            destination,
            policy.as_str(),
            outcome.changed(),
            outcome.entries.len(),
            clear_source,
            started_at.elapsed().as_millis()
        );

        MigrationResult::ok(
            outcome.changed(),
            format!(
                "merged {} entries from {source} into {destination}",
                outcome.changed()
            ),
        )
    }

    fn read_side(&self, key: &str, side: &'static str) -> Result<StoredEntries, String> {
        let stored = self.store.try_load(key).map_err(|err| {
            error!(
                "event=migrate module=service status=error key={} side={} error_code=read_failed error={}",
                key, side, err
            );
            format!("could not read {key}; nothing was written")
        })?;
        if stored == StoredEntries::Unreadable {
            warn!(
                "event=migrate module=service status=error key={} side={} error_code=payload_malformed",
                key, side
            );
        }
        Ok(stored)
    }

    /// Folds the pre-namespacing key into the active namespace.
    pub fn migrate_legacy(&self, active: &Identity) -> MigrationResult {
        self.migrate(
            LEGACY_KEY,
            &KeyResolver::resolve(active),
            MergePolicy::KeepFirst,
            true,
        )
    }

    /// Login: guest entries move into the user namespace; user data wins.
    pub fn migrate_guest_to_user(&self, user_id: &str) -> MigrationResult {
        self.migrate(
            &KeyResolver::resolve(&Identity::Guest),
            &KeyResolver::resolve(&Identity::user(user_id)),
            MergePolicy::KeepFirst,
            true,
        )
    }

    /// Logout: user entries are copied into guest; the user namespace stays.
    pub fn migrate_user_to_guest(&self, user_id: &str) -> MigrationResult {
        self.migrate(
            &KeyResolver::resolve(&Identity::user(user_id)),
            &KeyResolver::resolve(&Identity::Guest),
            MergePolicy::KeepLatest,
            false,
        )
    }
}

fn nothing_to_do(source: &str, destination: &str, policy: MergePolicy) -> MigrationResult {
    info!(
        "event=migrate module=service status=noop source={} destination={} policy={}",
        source,
        destination,
        policy.as_str()
    );
    MigrationResult::nothing_to_do(format!("nothing to migrate from {source}"))
}
