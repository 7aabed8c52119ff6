//! Push/pull orchestration against the remote entry table.
//!
//! # Responsibility
//! - Validate the local identity against the authenticated remote session.
//! - Diff local entries against remote rows and apply inserts/updates/deletes.
//! - Fetch remote rows and hand normalized entries to the local replica.
//!
//! # Invariants
//! - At most one push or pull is in flight per coordinator; a second request
//!   fails immediately with `SyncError::Busy` and touches nothing.
//! - The in-flight slot is released on every exit path, including unwinding.
//! - Every remote write is filtered by the validated user id.

use crate::model::entry::Entry;
use crate::model::identity::Identity;
use crate::sync::merge::MergeOutcome;
use crate::sync::remote::{
    normalize_remote_row, RemoteEntryRow, RemoteEntryTable, RemoteError, SessionProvider,
};
use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// Internal state machine of one sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Validating,
    Pushing,
    Pulling,
}

/// Coarse status exposed to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Another push/pull is in flight.
    Busy,
    /// Local identity and remote session disagree (or there is no session).
    IdentityMismatch {
        expected: Identity,
        actual: Option<Identity>,
    },
    /// The remote fetch failed, so there is no usable result.
    Remote(RemoteError),
    /// Every attempted row failed.
    PartialFailure { attempted: usize, failed: usize },
    /// Remote rows were merged in memory but local storage rejected the write.
    LocalWrite,
}

impl SyncError {
    /// Short text suitable for direct display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Busy => "Sync in progress, try again shortly.",
            Self::IdentityMismatch { .. } => "Please re-authenticate to sync your diary.",
            Self::Remote(_) => "Could not reach the server. Your entries are safe on this device.",
            Self::PartialFailure { .. } => "Sync failed. Your entries are safe on this device.",
            Self::LocalWrite => "Synced entries could not be saved on this device yet.",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Busy => "sync_busy",
            Self::IdentityMismatch { .. } => "identity_mismatch",
            Self::Remote(_) => "remote_failed",
            Self::PartialFailure { .. } => "partial_failure",
            Self::LocalWrite => "local_write_failed",
        }
    }
}

impl Display for SyncError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "sync already in flight"),
            Self::IdentityMismatch { expected, actual } => match actual {
                Some(actual) => write!(f, "identity mismatch: expected {expected}, session is {actual}"),
                None => write!(f, "identity mismatch: expected {expected}, no remote session"),
            },
            Self::Remote(err) => write!(f, "{err}"),
            Self::PartialFailure { attempted, failed } => {
                write!(f, "sync failed for {failed} of {attempted} rows")
            }
            Self::LocalWrite => write!(f, "merged entries could not be written to local storage"),
        }
    }
}

impl Error for SyncError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(value: RemoteError) -> Self {
        Self::Remote(value)
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Per-row outcome counts of one push.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    /// Inserts that hit an existing row and were retried as updates.
    pub conflicts_recovered: usize,
    pub failed: usize,
}

impl PushReport {
    pub fn attempted(&self) -> usize {
        self.succeeded() + self.failed
    }

    pub fn succeeded(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }

    /// Some rows failed but not all of them.
    pub fn has_warnings(&self) -> bool {
        self.failed > 0
    }
}

/// Outcome of one pull.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub fetched: usize,
    pub accepted: usize,
    /// Rows whose owner column is missing or names another user.
    pub skipped_foreign: usize,
    pub skipped_malformed: usize,
    /// Entries inserted or replaced locally.
    pub merged_count: usize,
    pub total_local: usize,
}

impl PullReport {
    pub fn has_warnings(&self) -> bool {
        self.skipped_malformed > 0
    }
}

/// Why a replica refused or could not complete a reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// The active identity changed while the sync was in flight.
    IdentityChanged(Identity),
    /// The merge was applied in memory but could not be persisted.
    NotPersisted,
}

/// Local side of a sync: the owner of the in-memory entry collection.
pub trait LocalReplica {
    fn identity(&self) -> Identity;
    fn snapshot(&self) -> Vec<Entry>;
    /// Merges remote entries into the current local set (remote wins only on a
    /// strictly newer timestamp), persists and recomputes derived state.
    ///
    /// Fails without touching anything when `expected` is no longer the
    /// active identity.
    fn reconcile(
        &self,
        expected: &Identity,
        remote: Vec<Entry>,
    ) -> Result<MergeOutcome, ReconcileError>;
}

/// Orchestrates push/pull with a single in-flight slot.
pub struct SyncCoordinator {
    remote: Arc<dyn RemoteEntryTable>,
    session: Arc<dyn SessionProvider>,
    phase: Mutex<SyncPhase>,
    status: Mutex<SyncStatus>,
    subscribers: Mutex<Vec<Sender<SyncStatus>>>,
}

impl SyncCoordinator {
    pub fn new(remote: Arc<dyn RemoteEntryTable>, session: Arc<dyn SessionProvider>) -> Self {
        Self {
            remote,
            session,
            phase: Mutex::new(SyncPhase::Idle),
            status: Mutex::new(SyncStatus::Idle),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn phase(&self) -> SyncPhase {
        *lock_or_recover(&self.phase)
    }

    pub fn status(&self) -> SyncStatus {
        *lock_or_recover(&self.status)
    }

    pub fn is_busy(&self) -> bool {
        self.phase() != SyncPhase::Idle
    }

    /// Subscribes to status transitions. Dropped receivers are pruned lazily.
    pub fn subscribe(&self) -> Receiver<SyncStatus> {
        let (tx, rx) = unbounded();
        lock_or_recover(&self.subscribers).push(tx);
        rx
    }

    /// Uploads the local collection, making the remote set match it.
    pub fn push<R: LocalReplica + ?Sized>(&self, replica: &R) -> SyncResult<PushReport> {
        let started_at = Instant::now();
        let slot = self.try_begin("push")?;
        let result = self.run_push(&slot, replica);
        self.finish(slot, "push", started_at, result)
    }

    /// Downloads remote rows and merges them into the local collection.
    pub fn pull<R: LocalReplica + ?Sized>(&self, replica: &R) -> SyncResult<PullReport> {
        let started_at = Instant::now();
        let slot = self.try_begin("pull")?;
        let result = self.run_pull(&slot, replica);
        self.finish(slot, "pull", started_at, result)
    }

    fn run_push<R: LocalReplica + ?Sized>(
        &self,
        slot: &SyncSlot<'_>,
        replica: &R,
    ) -> SyncResult<PushReport> {
        let user_id = self.validate_identity(&replica.identity())?;
        slot.advance(SyncPhase::Pushing);

        let local = replica.snapshot();
        let remote_rows = self.remote.fetch(&user_id)?;
        let remote_ids: BTreeSet<String> = remote_rows
            .iter()
            .filter_map(|row| owned_row_id(row, &user_id))
            .collect();
        let local_by_id: BTreeMap<&str, &Entry> =
            local.iter().map(|entry| (entry.id.as_str(), entry)).collect();

        let mut report = PushReport::default();

        for id in remote_ids
            .iter()
            .filter(|id| !local_by_id.contains_key(id.as_str()))
        {
            match self.remote.delete(&user_id, id) {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=sync_push_row module=sync status=error op=delete entry_id={} error={}",
                        id, err
                    );
                }
            }
        }

        for (id, entry) in &local_by_id {
            let row = RemoteEntryRow::from_entry(entry, &user_id);
            if remote_ids.contains(*id) {
                match self.remote.update(&user_id, &row) {
                    Ok(()) => report.updated += 1,
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            "event=sync_push_row module=sync status=error op=update entry_id={} error={}",
                            id, err
                        );
                    }
                }
                continue;
            }

            match self.remote.insert(&user_id, &row) {
                Ok(()) => report.inserted += 1,
                Err(RemoteError::Conflict(_)) => match self.remote.update(&user_id, &row) {
                    Ok(()) => {
                        report.updated += 1;
                        report.conflicts_recovered += 1;
                    }
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            "event=sync_push_row module=sync status=error op=conflict_update entry_id={} error={}",
                            id, err
                        );
                    }
                },
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        "event=sync_push_row module=sync status=error op=insert entry_id={} error={}",
                        id, err
                    );
                }
            }
        }

        if report.attempted() > 0 && report.succeeded() == 0 {
            return Err(SyncError::PartialFailure {
                attempted: report.attempted(),
                failed: report.failed,
            });
        }
        if report.has_warnings() {
            warn!(
                "event=sync_push module=sync status=partial attempted={} failed={}",
                report.attempted(),
                report.failed
            );
        }
        Ok(report)
    }

    fn run_pull<R: LocalReplica + ?Sized>(
        &self,
        slot: &SyncSlot<'_>,
        replica: &R,
    ) -> SyncResult<PullReport> {
        let identity = replica.identity();
        let user_id = self.validate_identity(&identity)?;
        slot.advance(SyncPhase::Pulling);

        let rows = self.remote.fetch(&user_id)?;
        let mut report = PullReport {
            fetched: rows.len(),
            ..PullReport::default()
        };

        let mut incoming = Vec::with_capacity(rows.len());
        for row in &rows {
            match normalize_remote_row(row) {
                Ok(normalized) if normalized.user_id.as_deref() == Some(user_id.as_str()) => {
                    incoming.push(normalized.entry)
                }
                Ok(normalized) => {
                    // Rows without an owner column count as foreign too.
                    report.skipped_foreign += 1;
                    warn!(
                        "event=sync_pull_row module=sync status=skipped reason=foreign_owner entry_id={} has_owner={}",
                        normalized.entry.id,
                        normalized.user_id.is_some()
                    );
                }
                Err(err) => {
                    report.skipped_malformed += 1;
                    warn!(
                        "event=sync_pull_row module=sync status=skipped reason=malformed error={}",
                        err
                    );
                }
            }
        }
        report.accepted = incoming.len();

        if report.skipped_malformed > 0 && report.accepted == 0 {
            return Err(SyncError::PartialFailure {
                attempted: report.fetched,
                failed: report.skipped_malformed,
            });
        }

        let outcome = match replica.reconcile(&identity, incoming) {
            Ok(outcome) => outcome,
            Err(ReconcileError::IdentityChanged(actual)) => {
                return Err(SyncError::IdentityMismatch {
                    expected: identity,
                    actual: Some(actual),
                })
            }
            Err(ReconcileError::NotPersisted) => return Err(SyncError::LocalWrite),
        };
        report.merged_count = outcome.changed();
        report.total_local = outcome.entries.len();
        Ok(report)
    }

    /// Returns the validated user id.
    fn validate_identity(&self, expected: &Identity) -> SyncResult<String> {
        let mismatch = |actual: Option<Identity>| SyncError::IdentityMismatch {
            expected: expected.clone(),
            actual,
        };

        let user_id = match expected.user_id() {
            Some(id) => id.to_string(),
            None => return Err(mismatch(self.session.authenticated_identity())),
        };

        let current = self.session.current_identity();
        if &current != expected {
            return Err(mismatch(Some(current)));
        }

        match self.session.authenticated_identity() {
            Some(actual) if &actual == expected => Ok(user_id),
            other => Err(mismatch(other)),
        }
    }

    fn try_begin(&self, operation: &'static str) -> SyncResult<SyncSlot<'_>> {
        {
            let mut phase = lock_or_recover(&self.phase);
            if *phase != SyncPhase::Idle {
                info!(
                    "event=sync_{} module=sync status=rejected error_code=sync_busy phase={:?}",
                    operation, *phase
                );
                return Err(SyncError::Busy);
            }
            *phase = SyncPhase::Validating;
        }
        self.set_status(SyncStatus::Syncing);
        Ok(SyncSlot {
            coordinator: self,
            finished: false,
        })
    }

    fn finish<T: std::fmt::Debug>(
        &self,
        mut slot: SyncSlot<'_>,
        operation: &'static str,
        started_at: Instant,
        result: SyncResult<T>,
    ) -> SyncResult<T> {
        slot.finished = true;
        drop(slot);

        match &result {
            Ok(report) => {
                self.set_status(SyncStatus::Idle);
                info!(
                    "event=sync_{} module=sync status=ok duration_ms={} report={:?}",
                    operation,
                    started_at.elapsed().as_millis(),
                    report
                );
            }
            Err(err) => {
                self.set_status(SyncStatus::Error);
                error!(
                    "event=sync_{} module=sync status=error duration_ms={} error_code={} error={}",
                    operation,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
            }
        }
        result
    }

    fn set_status(&self, next: SyncStatus) {
        {
            let mut status = lock_or_recover(&self.status);
            if *status == next {
                return;
            }
            *status = next;
        }
        lock_or_recover(&self.subscribers).retain(|tx| tx.send(next).is_ok());
    }
}

/// Holds the in-flight slot; releasing it resets the phase to `Idle`.
struct SyncSlot<'a> {
    coordinator: &'a SyncCoordinator,
    finished: bool,
}

impl SyncSlot<'_> {
    fn advance(&self, next: SyncPhase) {
        *lock_or_recover(&self.coordinator.phase) = next;
    }
}

impl Drop for SyncSlot<'_> {
    fn drop(&mut self) {
        *lock_or_recover(&self.coordinator.phase) = SyncPhase::Idle;
        if !self.finished {
            self.coordinator.set_status(SyncStatus::Error);
        }
    }
}

fn owned_row_id(row: &Value, user_id: &str) -> Option<String> {
    let owner = row
        .get("user_id")
        .or_else(|| row.get("userId"))
        .and_then(Value::as_str);
    if owner != Some(user_id) {
        return None;
    }
    row.get("id").and_then(Value::as_str).map(str::to_string)
}

// The guarded state is plain data, so a poisoned lock is still usable.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
