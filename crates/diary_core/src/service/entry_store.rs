//! Entry store facade.
//!
//! # Responsibility
//! - Own the in-memory entry collection of the active namespace.
//! - Provide the add/update/resolve/burn/delete/list surface used by UI layers.
//! - Run namespace migrations on open, login and logout.
//!
//! # Invariants
//! - Memory is mutated before the durable write is scheduled, so a read right
//!   after a mutation always observes it.
//! - Durable writes are debounced; a write still pending when the process dies
//!   is lost. `flush`/`shutdown` narrow that window on orderly teardown.
//! - A failed durable write keeps the store dirty until a later write of the
//!   whole collection lands; `flush` retries it once and reports the outcome.
//! - Derived state is recomputed after every mutation and every merge.
//! - Deleting the last entry clears the first-entry-date marker.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::entry::{Entry, EntryDraft, EntryPatch, EntryValidationError};
use crate::model::identity::{Identity, KeyResolver, MigrationResult};
use crate::repo::entry_repo::PersistenceStore;
use crate::repo::kv_repo::KeyValueStore;
use crate::service::debounced_writer::DebouncedWriter;
use crate::service::migration_service::MigrationCoordinator;
use crate::sync::coordinator::{LocalReplica, ReconcileError};
use crate::sync::merge::{merge_with_stats, MergeOutcome, MergePolicy};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Receives the full collection after every mutation or merge.
///
/// Called synchronously on the mutating thread, outside the store lock.
pub trait DerivedStateHook: Send + Sync {
    fn recompute(&self, entries: &[Entry]);
}

/// Hook that ignores every recompute.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDerivedState;

impl DerivedStateHook for NoopDerivedState {
    fn recompute(&self, _entries: &[Entry]) {}
}

/// Optional collaborators for [`EntryStore::open_with`].
pub struct EntryStoreDeps {
    pub hook: Arc<dyn DerivedStateHook>,
    pub clock: Arc<dyn Clock>,
}

impl Default for EntryStoreDeps {
    fn default() -> Self {
        Self {
            hook: Arc::new(NoopDerivedState),
            clock: Arc::new(SystemClock),
        }
    }
}

struct StoreState {
    identity: Identity,
    entries: Vec<Entry>,
    first_entry_date: Option<i64>,
}

/// Facade over the engine; the only component UI code talks to.
pub struct EntryStore {
    persistence: PersistenceStore,
    migrations: MigrationCoordinator,
    writer: DebouncedWriter,
    write_failed: Arc<AtomicBool>,
    hook: Arc<dyn DerivedStateHook>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    state: Mutex<StoreState>,
    legacy_migration: MigrationResult,
}

impl EntryStore {
    /// Opens the store for `identity` with default collaborators.
    pub fn open(kv: Arc<dyn KeyValueStore>, identity: Identity, config: EngineConfig) -> Self {
        Self::open_with(kv, identity, config, EntryStoreDeps::default())
    }

    /// Folds any legacy payload into `identity`'s namespace, then loads it.
    pub fn open_with(
        kv: Arc<dyn KeyValueStore>,
        identity: Identity,
        config: EngineConfig,
        deps: EntryStoreDeps,
    ) -> Self {
        let persistence = PersistenceStore::new(kv);
        let migrations = MigrationCoordinator::new(persistence.clone());
        let legacy_migration = migrations.migrate_legacy(&identity);

        let (entries, first_entry_date) = load_namespace(&persistence, &identity);
        info!(
            "event=store_open module=service status=ok identity_kind={} count={} legacy_merged={}",
            identity_kind(&identity),
            entries.len(),
            legacy_migration.merged_count
        );

        let store = Self {
            persistence,
            migrations,
            writer: DebouncedWriter::new("entries"),
            write_failed: Arc::new(AtomicBool::new(false)),
            hook: deps.hook,
            clock: deps.clock,
            config,
            state: Mutex::new(StoreState {
                identity,
                entries,
                first_entry_date,
            }),
            legacy_migration,
        };
        store.hook.recompute(&store.list());
        store
    }

    /// Result of the legacy-key migration performed by `open`.
    pub fn legacy_migration(&self) -> &MigrationResult {
        &self.legacy_migration
    }

    /// Creates an active entry and prepends it.
    pub fn add(&self, draft: EntryDraft) -> Result<Entry, EntryValidationError> {
        let entry = Entry::from_draft(draft, self.clock.now_ms())?;
        let snapshot = {
            let mut state = self.lock_state();
            state.entries.insert(0, entry.clone());
            if state.first_entry_date.is_none() {
                state.first_entry_date = Some(entry.timestamp);
            }
            self.persist_later(&state)
        };
        debug!(
            "event=entry_add module=service status=ok entry_id={} count={}",
            entry.id,
            snapshot.len()
        );
        self.hook.recompute(&snapshot);
        Ok(entry)
    }

    /// Applies a partial update after recording an edit snapshot.
    ///
    /// Returns `Ok(false)` when `id` is unknown.
    pub fn update(&self, id: &str, patch: EntryPatch) -> Result<bool, EntryValidationError> {
        let now = self.clock.now_ms();
        let cap = self.config.edit_history_cap;
        let snapshot = {
            let mut state = self.lock_state();
            let Some(position) = state.entries.iter().position(|entry| entry.id == id) else {
                return Ok(false);
            };
            let mut edited = state.entries[position].clone();
            edited.push_edit_snapshot(now, cap);
            edited.apply_patch(patch, now)?;
            state.entries[position] = edited;
            self.persist_later(&state)
        };
        debug!("event=entry_update module=service status=ok entry_id={}", id);
        self.hook.recompute(&snapshot);
        Ok(true)
    }

    /// Marks an entry resolved. Returns `false` when `id` is unknown.
    pub fn resolve(&self, id: &str) -> bool {
        let now = self.clock.now_ms();
        self.mutate_one(id, "entry_resolve", |entry| entry.resolve(now))
    }

    /// Marks an entry burned. Returns `false` when `id` is unknown.
    pub fn burn(&self, id: &str) -> bool {
        let now = self.clock.now_ms();
        self.mutate_one(id, "entry_burn", |entry| entry.burn(now))
    }

    /// Permanently removes an entry. Returns `false` when `id` is unknown.
    pub fn delete(&self, id: &str) -> bool {
        let snapshot = {
            let mut state = self.lock_state();
            let before = state.entries.len();
            state.entries.retain(|entry| entry.id != id);
            if state.entries.len() == before {
                return false;
            }
            if state.entries.is_empty() {
                state.first_entry_date = None;
            }
            self.persist_later(&state)
        };
        debug!(
            "event=entry_delete module=service status=ok entry_id={} remaining={}",
            id,
            snapshot.len()
        );
        self.hook.recompute(&snapshot);
        true
    }

    /// Snapshot of the active collection.
    pub fn list(&self) -> Vec<Entry> {
        self.lock_state().entries.clone()
    }

    pub fn get(&self, id: &str) -> Option<Entry> {
        self.lock_state()
            .entries
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_state().entries.is_empty()
    }

    pub fn identity(&self) -> Identity {
        self.lock_state().identity.clone()
    }

    /// Timestamp of the first entry ever added to the active namespace.
    pub fn first_entry_date(&self) -> Option<i64> {
        self.lock_state().first_entry_date
    }

    /// Switches to `User{user_id}`, carrying guest entries over.
    ///
    /// From another user the switch only reloads; entries never move between
    /// two user namespaces.
    pub fn login(&self, user_id: &str) -> MigrationResult {
        let target = Identity::user(user_id);
        let current = self.identity();
        if current == target {
            return MigrationResult::nothing_to_do(format!("already signed in as {user_id}"));
        }

        if !self.flush() {
            return unsaved_entries_result("login");
        }
        let result = if current.is_guest() {
            self.migrations.migrate_guest_to_user(user_id)
        } else {
            MigrationResult::nothing_to_do("user to user switch does not migrate entries")
        };
        if !result.success {
            warn!(
                "event=login module=service status=error message={}",
                result.message
            );
        }
        self.switch_to(target);
        result
    }

    /// Switches to `Guest`, copying the user's entries into the guest namespace.
    pub fn logout(&self) -> MigrationResult {
        let current = self.identity();
        let Some(user_id) = current.user_id().map(str::to_string) else {
            return MigrationResult::nothing_to_do("already a guest");
        };

        if !self.flush() {
            return unsaved_entries_result("logout");
        }
        let result = self.migrations.migrate_user_to_guest(&user_id);
        if !result.success {
            warn!(
                "event=logout module=service status=error message={}",
                result.message
            );
        }
        self.switch_to(Identity::Guest);
        result
    }

    /// Writes any pending debounced write now.
    ///
    /// When the last durable write failed, the current collection is written
    /// once more. Returns whether storage now matches memory.
    pub fn flush(&self) -> bool {
        self.writer.flush();
        if self.write_failed.load(Ordering::SeqCst) {
            {
                let state = self.lock_state();
                self.persist_later(&state);
            }
            self.writer.flush();
        }
        !self.write_failed.load(Ordering::SeqCst)
    }

    /// Flushes pending writes and cancels the timer for teardown.
    ///
    /// Returns `false` when some entries could not be written.
    pub fn shutdown(&self) -> bool {
        let saved = self.flush();
        self.writer.cancel_all();
        if saved {
            info!("event=store_shutdown module=service status=ok");
        } else {
            error!("event=store_shutdown module=service status=error error_code=unsaved_entries");
        }
        saved
    }

    /// Returns whether memory holds changes that storage does not have yet.
    pub fn has_pending_write(&self) -> bool {
        self.writer.is_pending() || self.write_failed.load(Ordering::SeqCst)
    }

    fn switch_to(&self, identity: Identity) {
        let (entries, first_entry_date) = load_namespace(&self.persistence, &identity);
        let snapshot = {
            let mut state = self.lock_state();
            info!(
                "event=identity_switch module=service status=ok from={} to={} count={}",
                identity_kind(&state.identity),
                identity_kind(&identity),
                entries.len()
            );
            state.identity = identity;
            state.entries = entries;
            state.first_entry_date = first_entry_date;
            state.entries.clone()
        };
        self.hook.recompute(&snapshot);
    }

    fn mutate_one(&self, id: &str, event: &'static str, apply: impl FnOnce(&mut Entry)) -> bool {
        let snapshot = {
            let mut state = self.lock_state();
            let Some(entry) = state.entries.iter_mut().find(|entry| entry.id == id) else {
                return false;
            };
            apply(entry);
            self.persist_later(&state)
        };
        debug!("event={} module=service status=ok entry_id={}", event, id);
        self.hook.recompute(&snapshot);
        true
    }

    /// Schedules a durable write of `state` and returns the collection snapshot.
    fn persist_later(&self, state: &StoreState) -> Vec<Entry> {
        let snapshot = state.entries.clone();
        let key = KeyResolver::resolve(&state.identity);
        let marker_key = KeyResolver::first_entry_marker(&state.identity);
        let marker = state.first_entry_date;
        let persistence = self.persistence.clone();
        let entries = snapshot.clone();
        let write_failed = Arc::clone(&self.write_failed);

        self.writer.schedule(
            Box::new(move || {
                let saved = persistence.save(&key, &entries);
                let marker_saved = match marker {
                    Some(value) => persistence.save_marker(&marker_key, value),
                    None => persistence.clear_marker(&marker_key),
                };
                let failed = !(saved && marker_saved);
                if failed {
                    warn!(
                        "event=entries_persist module=service status=error key={} count={} error_code=write_failed",
                        key,
                        entries.len()
                    );
                }
                write_failed.store(failed, Ordering::SeqCst);
            }),
            self.config.debounce_delay(),
        );
        snapshot
    }

    // Plain data behind the lock; recover it after a panicking holder.
    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LocalReplica for EntryStore {
    fn identity(&self) -> Identity {
        EntryStore::identity(self)
    }

    fn snapshot(&self) -> Vec<Entry> {
        self.list()
    }

    fn reconcile(
        &self,
        expected: &Identity,
        remote: Vec<Entry>,
    ) -> Result<MergeOutcome, ReconcileError> {
        let outcome = {
            let mut state = self.lock_state();
            if &state.identity != expected {
                warn!(
                    "event=sync_reconcile module=service status=rejected reason=identity_changed"
                );
                return Err(ReconcileError::IdentityChanged(state.identity.clone()));
            }
            let outcome = merge_with_stats(&state.entries, &remote, MergePolicy::KeepLatest);
            state.entries = outcome.entries.clone();
            if state.first_entry_date.is_none() {
                state.first_entry_date = earliest_timestamp(&state.entries);
            }
            self.persist_later(&state);
            outcome
        };
        // The merged result must be durable before the pull reports success.
        let saved = self.flush();
        self.hook.recompute(&outcome.entries);
        if !saved {
            return Err(ReconcileError::NotPersisted);
        }
        Ok(outcome)
    }
}

fn load_namespace(persistence: &PersistenceStore, identity: &Identity) -> (Vec<Entry>, Option<i64>) {
    let entries = persistence.load(&KeyResolver::resolve(identity));
    let marker_key = KeyResolver::first_entry_marker(identity);
    let first_entry_date = match persistence.load_marker(&marker_key) {
        Some(value) => Some(value),
        None => {
            let derived = earliest_timestamp(&entries);
            if let Some(value) = derived {
                persistence.save_marker(&marker_key, value);
            }
            derived
        }
    };
    (entries, first_entry_date)
}

fn unsaved_entries_result(operation: &'static str) -> MigrationResult {
    error!(
        "event={} module=service status=error error_code=unsaved_entries",
        operation
    );
    MigrationResult::failed("entries of the active namespace could not be saved; identity unchanged")
}

fn earliest_timestamp(entries: &[Entry]) -> Option<i64> {
    entries.iter().map(|entry| entry.timestamp).min()
}

fn identity_kind(identity: &Identity) -> &'static str {
    match identity {
        Identity::Guest => "guest",
        Identity::User { .. } => "user",
    }
}
