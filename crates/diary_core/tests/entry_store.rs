use diary_core::clock::ManualClock;
use diary_core::config::EngineConfig;
use diary_core::model::entry::{Entry, EntryDraft, EntryPatch, EntryStatus, EntryValidationError};
use diary_core::model::identity::{Identity, KeyResolver, LEGACY_KEY};
use diary_core::repo::entry_repo::PersistenceStore;
use diary_core::repo::kv_repo::{KeyValueStore, KvError, KvResult, MemoryKvStore};
use diary_core::service::entry_store::{DerivedStateHook, EntryStore, EntryStoreDeps};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingHook {
    calls: AtomicUsize,
    last_len: Mutex<Option<usize>>,
}

impl DerivedStateHook for RecordingHook {
    fn recompute(&self, entries: &[Entry]) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_len.lock().unwrap() = Some(entries.len());
    }
}

struct Harness {
    kv: Arc<MemoryKvStore>,
    clock: Arc<ManualClock>,
    hook: Arc<RecordingHook>,
    store: EntryStore,
}

fn config(debounce_ms: u64, edit_history_cap: usize) -> EngineConfig {
    EngineConfig {
        debounce_ms,
        edit_history_cap,
        ..EngineConfig::default()
    }
}

fn open_with_kv(kv: Arc<MemoryKvStore>, identity: Identity, config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(1_000));
    let hook = Arc::new(RecordingHook::default());
    let store = EntryStore::open_with(
        kv.clone(),
        identity,
        config,
        EntryStoreDeps {
            hook: hook.clone(),
            clock: clock.clone(),
        },
    );
    Harness {
        kv,
        clock,
        hook,
        store,
    }
}

fn open(identity: Identity) -> Harness {
    open_with_kv(Arc::new(MemoryKvStore::new()), identity, config(20, 10))
}

fn draft(content: &str) -> EntryDraft {
    EntryDraft {
        mood_level: 3,
        content: content.to_string(),
        ..EntryDraft::default()
    }
}

fn persisted(kv: &Arc<MemoryKvStore>, identity: &Identity) -> Vec<Entry> {
    PersistenceStore::new(kv.clone()).load(&KeyResolver::resolve(identity))
}

fn marker(kv: &Arc<MemoryKvStore>, identity: &Identity) -> Option<i64> {
    PersistenceStore::new(kv.clone()).load_marker(&KeyResolver::first_entry_marker(identity))
}

#[test]
fn add_prepends_and_is_visible_before_the_write_lands() {
    let h = open_with_kv(
        Arc::new(MemoryKvStore::new()),
        Identity::Guest,
        config(60_000, 10),
    );
    let first = h.store.add(draft("first")).unwrap();
    h.clock.advance(10);
    let second = h.store.add(draft("second")).unwrap();

    let ids: Vec<String> = h.store.list().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![second.id.clone(), first.id.clone()]);
    assert_eq!(second.status, EntryStatus::Active);
    assert!(h.store.has_pending_write());
    assert!(persisted(&h.kv, &Identity::Guest).is_empty());

    h.store.flush();
    assert_eq!(persisted(&h.kv, &Identity::Guest).len(), 2);
    assert_eq!(marker(&h.kv, &Identity::Guest), Some(1_000));
}

#[test]
fn bursts_are_written_after_the_debounce_delay() {
    let h = open(Identity::Guest);
    for index in 0..5 {
        h.store.add(draft(&format!("burst {index}"))).unwrap();
    }
    std::thread::sleep(Duration::from_millis(300));

    assert!(!h.store.has_pending_write());
    assert_eq!(persisted(&h.kv, &Identity::Guest).len(), 5);
}

#[test]
fn add_rejects_out_of_range_mood_without_mutating() {
    let h = open(Identity::Guest);
    let mut bad = draft("bad");
    bad.mood_level = 9;

    assert_eq!(
        h.store.add(bad).unwrap_err(),
        EntryValidationError::MoodLevelOutOfRange(9)
    );
    assert!(h.store.is_empty());
    assert!(!h.store.has_pending_write());
}

#[test]
fn update_records_history_capped_at_config_limit() {
    let h = open_with_kv(Arc::new(MemoryKvStore::new()), Identity::Guest, config(20, 3));
    let entry = h.store.add(draft("v0")).unwrap();

    for version in 1..=5 {
        h.clock.advance(1);
        let patch = EntryPatch {
            content: Some(format!("v{version}")),
            ..EntryPatch::default()
        };
        assert!(h.store.update(&entry.id, patch).unwrap());
    }

    let updated = h.store.get(&entry.id).unwrap();
    assert_eq!(updated.content, "v5");
    assert_eq!(updated.timestamp, entry.timestamp);
    let previous: Vec<&str> = updated
        .edit_history
        .iter()
        .map(|snapshot| snapshot.previous_content.as_str())
        .collect();
    assert_eq!(previous, vec!["v2", "v3", "v4"]);
}

#[test]
fn failed_update_leaves_entry_untouched() {
    let h = open(Identity::Guest);
    let entry = h.store.add(draft("keep")).unwrap();
    let patch = EntryPatch {
        mood_level: Some(0),
        content: Some("changed".to_string()),
        ..EntryPatch::default()
    };

    assert!(h.store.update(&entry.id, patch).is_err());
    let stored = h.store.get(&entry.id).unwrap();
    assert_eq!(stored.content, "keep");
    assert!(stored.edit_history.is_empty());
}

#[test]
fn unknown_ids_are_reported_not_errors() {
    let h = open(Identity::Guest);
    assert!(!h.store.update("missing", EntryPatch::default()).unwrap());
    assert!(!h.store.resolve("missing"));
    assert!(!h.store.burn("missing"));
    assert!(!h.store.delete("missing"));
}

#[test]
fn resolve_and_burn_stamp_the_current_time() {
    let h = open(Identity::Guest);
    let a = h.store.add(draft("a")).unwrap();
    let b = h.store.add(draft("b")).unwrap();

    h.clock.set(5_000);
    assert!(h.store.resolve(&a.id));
    h.clock.set(6_000);
    assert!(h.store.burn(&b.id));

    let a = h.store.get(&a.id).unwrap();
    let b = h.store.get(&b.id).unwrap();
    assert_eq!((a.status, a.resolved_at), (EntryStatus::Resolved, Some(5_000)));
    assert_eq!((b.status, b.burned_at), (EntryStatus::Burned, Some(6_000)));
}

#[test]
fn deleting_the_last_entry_clears_the_marker() {
    let h = open(Identity::Guest);
    let entry = h.store.add(draft("only")).unwrap();
    h.store.flush();
    assert_eq!(marker(&h.kv, &Identity::Guest), Some(1_000));

    assert!(h.store.delete(&entry.id));
    h.store.flush();

    assert!(h.store.is_empty());
    assert_eq!(h.store.first_entry_date(), None);
    assert_eq!(marker(&h.kv, &Identity::Guest), None);
    assert!(persisted(&h.kv, &Identity::Guest).is_empty());
}

#[test]
fn marker_keeps_the_first_date_while_entries_remain() {
    let h = open(Identity::Guest);
    let first = h.store.add(draft("first")).unwrap();
    h.clock.advance(500);
    h.store.add(draft("second")).unwrap();
    assert!(h.store.delete(&first.id));

    assert_eq!(h.store.first_entry_date(), Some(1_000));
}

#[test]
fn every_mutation_recomputes_derived_state() {
    let h = open(Identity::Guest);
    let baseline = h.hook.calls.load(Ordering::SeqCst);

    let entry = h.store.add(draft("x")).unwrap();
    h.store.resolve(&entry.id);
    h.store.delete(&entry.id);

    assert_eq!(h.hook.calls.load(Ordering::SeqCst), baseline + 3);
    assert_eq!(*h.hook.last_len.lock().unwrap(), Some(0));
}

#[test]
fn open_folds_legacy_payload_into_the_active_namespace() {
    let kv = Arc::new(MemoryKvStore::new());
    let legacy = Entry {
        id: "legacy-1".to_string(),
        timestamp: 42,
        mood_level: 2,
        content: "from before".to_string(),
        deadline: String::new(),
        people: Vec::new(),
        triggers: Vec::new(),
        status: EntryStatus::Active,
        resolved_at: None,
        burned_at: None,
        edit_history: Vec::new(),
    };
    assert!(PersistenceStore::new(kv.clone()).save(LEGACY_KEY, &[legacy]));

    let h = open_with_kv(kv, Identity::user("u1"), config(20, 10));

    assert_eq!(h.store.legacy_migration().merged_count, 1);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.store.first_entry_date(), Some(42));
    assert!(h.kv.get(LEGACY_KEY).unwrap().is_none());
}

#[test]
fn login_carries_guest_entries_and_logout_copies_them_back() {
    let h = open(Identity::Guest);
    let entry = h.store.add(draft("guest note")).unwrap();

    let login = h.store.login("u1");
    assert!(login.success);
    assert_eq!(h.store.identity(), Identity::user("u1"));
    assert_eq!(h.store.list(), vec![entry.clone()]);
    assert!(persisted(&h.kv, &Identity::Guest).is_empty());

    let logout = h.store.logout();
    assert!(logout.success);
    assert_eq!(h.store.identity(), Identity::Guest);
    assert_eq!(h.store.list(), vec![entry.clone()]);
    assert_eq!(persisted(&h.kv, &Identity::user("u1")), vec![entry]);
}

#[test]
fn switching_between_users_does_not_mix_namespaces() {
    let h = open(Identity::user("u1"));
    h.store.add(draft("u1 note")).unwrap();

    let result = h.store.login("u2");

    assert!(result.success);
    assert_eq!(result.merged_count, 0);
    assert!(h.store.is_empty());
    assert_eq!(persisted(&h.kv, &Identity::user("u1")).len(), 1);
}

#[test]
fn shutdown_persists_pending_writes() {
    let kv = Arc::new(MemoryKvStore::new());
    {
        let h = open_with_kv(kv.clone(), Identity::Guest, config(60_000, 10));
        h.store.add(draft("late")).unwrap();
        h.store.shutdown();
    }
    assert_eq!(persisted(&kv, &Identity::Guest).len(), 1);
}

#[test]
fn dropping_without_shutdown_loses_the_pending_write() {
    let kv = Arc::new(MemoryKvStore::new());
    {
        let h = open_with_kv(kv.clone(), Identity::Guest, config(60_000, 10));
        h.store.add(draft("lost")).unwrap();
    }
    assert!(persisted(&kv, &Identity::Guest).is_empty());
}

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct SwitchableKv {
    inner: MemoryKvStore,
    reject_writes: AtomicBool,
}

impl KeyValueStore for SwitchableKv {
    fn get(&self, key: &str) -> KvResult<Option<String>> {
        self.inner.get(key)
    }
    fn set(&self, key: &str, value: &str) -> KvResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(KvError::Unavailable("disk full".to_string()));
        }
        self.inner.set(key, value)
    }
    fn remove(&self, key: &str) -> KvResult<bool> {
        self.inner.remove(key)
    }
}

fn open_switchable(identity: Identity) -> (Arc<SwitchableKv>, EntryStore) {
    let kv = Arc::new(SwitchableKv::default());
    let store = EntryStore::open_with(
        kv.clone(),
        identity,
        config(20, 10),
        EntryStoreDeps {
            hook: Arc::new(RecordingHook::default()),
            clock: Arc::new(ManualClock::new(1_000)),
        },
    );
    (kv, store)
}

#[test]
fn failed_write_stays_pending_until_a_flush_lands() {
    let (kv, store) = open_switchable(Identity::Guest);
    kv.reject_writes.store(true, Ordering::SeqCst);
    store.add(draft("kept in memory")).unwrap();

    assert!(!store.flush());
    assert!(store.has_pending_write());
    assert_eq!(store.len(), 1);

    kv.reject_writes.store(false, Ordering::SeqCst);
    assert!(store.flush());
    assert!(!store.has_pending_write());
    let stored = PersistenceStore::new(kv.clone()).load(&KeyResolver::resolve(&Identity::Guest));
    assert_eq!(stored.len(), 1);
}

#[test]
fn later_mutation_rewrites_after_a_failed_write() {
    let (kv, store) = open_switchable(Identity::Guest);
    kv.reject_writes.store(true, Ordering::SeqCst);
    store.add(draft("first")).unwrap();
    assert!(!store.flush());

    kv.reject_writes.store(false, Ordering::SeqCst);
    store.add(draft("second")).unwrap();
    std::thread::sleep(Duration::from_millis(300));

    assert!(!store.has_pending_write());
    let stored = PersistenceStore::new(kv.clone()).load(&KeyResolver::resolve(&Identity::Guest));
    assert_eq!(stored.len(), 2);
}

#[test]
fn login_keeps_identity_when_entries_cannot_be_saved() {
    let (kv, store) = open_switchable(Identity::Guest);
    kv.reject_writes.store(true, Ordering::SeqCst);
    store.add(draft("unsaved")).unwrap();

    let result = store.login("u1");

    assert!(!result.success);
    assert_eq!(store.identity(), Identity::Guest);
    assert_eq!(store.len(), 1);
    assert!(!store.shutdown());
}

#[test]
fn status_patch_is_stamped_like_resolve() {
    let h = open(Identity::Guest);
    let entry = h.store.add(draft("patched")).unwrap();
    h.clock.set(7_000);

    let patch = EntryPatch {
        status: Some(EntryStatus::Resolved),
        ..EntryPatch::default()
    };
    assert!(h.store.update(&entry.id, patch).unwrap());

    let stored = h.store.get(&entry.id).unwrap();
    assert_eq!(stored.status, EntryStatus::Resolved);
    assert_eq!(stored.resolved_at, Some(7_000));
}
