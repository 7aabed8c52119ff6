//! Remote entry table contracts and the remote row boundary.
//!
//! # Responsibility
//! - Define the collaborator traits consumed by sync (remote table, session).
//! - Own the one place where remote field-name variants are normalized.
//!
//! # Invariants
//! - Writes always use the canonical lower-cased remote column names.
//! - Aliased remote names never leak past `normalize_remote_row`.
//! - Every remote write carries the owning user id as a filter.

use crate::model::entry::{Entry, EntryStatus};
use crate::model::identity::Identity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Remote table failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Primary-key collision on insert.
    Conflict(String),
    /// Row to update/delete is not visible for this user.
    NotFound(String),
    /// Network/backend failure.
    Transport(String),
    /// Row payload could not be mapped to an entry.
    Decode(String),
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict(id) => write!(f, "remote row already exists: {id}"),
            Self::NotFound(id) => write!(f, "remote row not found: {id}"),
            Self::Transport(message) => write!(f, "remote transport failure: {message}"),
            Self::Decode(message) => write!(f, "remote row malformed: {message}"),
        }
    }
}

impl Error for RemoteError {}

/// Canonical row shape written to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntryRow {
    pub id: String,
    pub timestamp: i64,
    pub moodlevel: u8,
    pub content: String,
    pub deadline: String,
    pub people: Vec<String>,
    pub triggers: Vec<String>,
    pub status: String,
    pub resolvedat: Option<i64>,
    pub burnedat: Option<i64>,
    pub user_id: String,
}

impl RemoteEntryRow {
    pub fn from_entry(entry: &Entry, user_id: &str) -> Self {
        Self {
            id: entry.id.clone(),
            timestamp: entry.timestamp,
            moodlevel: entry.mood_level,
            content: entry.content.clone(),
            deadline: entry.deadline.clone(),
            people: entry.people.clone(),
            triggers: entry.triggers.clone(),
            status: entry.status.as_str().to_string(),
            resolvedat: entry.resolved_at,
            burnedat: entry.burned_at,
            user_id: user_id.to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        // Plain struct of strings/ints/vecs; serialization cannot fail.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Entry decoded from a remote row plus its owner column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRow {
    pub user_id: Option<String>,
    pub entry: Entry,
}

/// Backend table holding entries of every user.
pub trait RemoteEntryTable: Send + Sync {
    /// Fetches rows whose owner column equals `user_id`.
    fn fetch(&self, user_id: &str) -> RemoteResult<Vec<Value>>;
    /// Inserts one row. Returns `Conflict` when the id already exists.
    fn insert(&self, user_id: &str, row: &RemoteEntryRow) -> RemoteResult<()>;
    /// Updates the row matching `row.id AND user_id`.
    fn update(&self, user_id: &str, row: &RemoteEntryRow) -> RemoteResult<()>;
    /// Deletes the row matching `id AND user_id`.
    fn delete(&self, user_id: &str, id: &str) -> RemoteResult<()>;
}

/// Identity/session collaborator.
pub trait SessionProvider: Send + Sync {
    fn current_identity(&self) -> Identity;
    /// Identity the remote session is authenticated as, if any.
    fn authenticated_identity(&self) -> Option<Identity>;
}

/// Maps one remote row onto the canonical entry shape.
///
/// Accepts `moodLevel|moodlevel|mood_level`, `resolvedAt|resolvedat|resolved_at`,
/// `burnedAt|burnedat|burned_at` and `user_id|userId`. Timestamps may arrive
/// as integers, floats or numeric strings. Remote rows carry no edit history.
pub fn normalize_remote_row(value: &Value) -> RemoteResult<NormalizedRow> {
    let object = value
        .as_object()
        .ok_or_else(|| RemoteError::Decode("row is not an object".to_string()))?;

    let id = pick_string(object, &["id"])
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| RemoteError::Decode("missing id".to_string()))?;
    let timestamp = pick_i64(object, &["timestamp"])
        .ok_or_else(|| RemoteError::Decode(format!("missing timestamp for {id}")))?;
    let mood_level = pick_i64(object, &["moodlevel", "moodLevel", "mood_level"])
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| RemoteError::Decode(format!("missing mood level for {id}")))?;
    let status = match pick_string(object, &["status"]) {
        Some(value) => EntryStatus::parse(&value)
            .ok_or_else(|| RemoteError::Decode(format!("unknown status `{value}` for {id}")))?,
        None => EntryStatus::Active,
    };

    let entry = Entry {
        timestamp,
        mood_level,
        content: pick_string(object, &["content"]).unwrap_or_default(),
        deadline: pick_string(object, &["deadline"]).unwrap_or_default(),
        people: pick_strings(object, &["people"]),
        triggers: pick_strings(object, &["triggers"]),
        status,
        resolved_at: pick_i64(object, &["resolvedat", "resolvedAt", "resolved_at"]),
        burned_at: pick_i64(object, &["burnedat", "burnedAt", "burned_at"]),
        edit_history: Vec::new(),
        id,
    };
    entry
        .validate()
        .map_err(|err| RemoteError::Decode(format!("{err} for {}", entry.id)))?;

    Ok(NormalizedRow {
        user_id: pick_string(object, &["user_id", "userId"]),
        entry,
    })
}

fn pick<'a>(object: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| object.get(*name))
        .find(|value| !value.is_null())
}

fn pick_string(object: &Map<String, Value>, names: &[&str]) -> Option<String> {
    match pick(object, names)? {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        _ => None,
    }
}

fn pick_i64(object: &Map<String, Value>, names: &[&str]) -> Option<i64> {
    match pick(object, names)? {
        Value::Number(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|float| float as i64)),
        Value::String(value) => value.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn pick_strings(object: &Map<String, Value>, names: &[&str]) -> Vec<String> {
    match pick(object, names) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// In-process remote table keyed by entry id.
///
/// Mirrors backend semantics: inserts collide on id across users, updates and
/// deletes only see rows owned by the filtering user.
#[derive(Debug, Default)]
pub struct MemoryRemoteTable {
    rows: Mutex<BTreeMap<String, Value>>,
}

impl MemoryRemoteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw row as-is, bypassing canonical naming.
    pub fn seed_raw(&self, row: Value) {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if let Ok(mut rows) = self.rows.lock() {
            rows.insert(id, row);
        }
    }

    pub fn row(&self, id: &str) -> Option<Value> {
        self.rows.lock().ok()?.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.rows
            .lock()
            .map(|rows| rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> RemoteResult<std::sync::MutexGuard<'_, BTreeMap<String, Value>>> {
        self.rows
            .lock()
            .map_err(|_| RemoteError::Transport("remote table lock poisoned".to_string()))
    }
}

fn owned_by(row: &Value, user_id: &str) -> bool {
    row.get("user_id")
        .or_else(|| row.get("userId"))
        .and_then(Value::as_str)
        == Some(user_id)
}

impl RemoteEntryTable for MemoryRemoteTable {
    fn fetch(&self, user_id: &str) -> RemoteResult<Vec<Value>> {
        Ok(self
            .lock()?
            .values()
            .filter(|row| owned_by(row, user_id))
            .cloned()
            .collect())
    }

    fn insert(&self, user_id: &str, row: &RemoteEntryRow) -> RemoteResult<()> {
        let mut rows = self.lock()?;
        if rows.contains_key(&row.id) {
            return Err(RemoteError::Conflict(row.id.clone()));
        }
        let mut stored = row.clone();
        stored.user_id = user_id.to_string();
        rows.insert(row.id.clone(), stored.to_value());
        Ok(())
    }

    fn update(&self, user_id: &str, row: &RemoteEntryRow) -> RemoteResult<()> {
        let mut rows = self.lock()?;
        match rows.get(&row.id) {
            Some(existing) if owned_by(existing, user_id) => {
                let mut stored = row.clone();
                stored.user_id = user_id.to_string();
                rows.insert(row.id.clone(), stored.to_value());
                Ok(())
            }
            _ => Err(RemoteError::NotFound(row.id.clone())),
        }
    }

    fn delete(&self, user_id: &str, id: &str) -> RemoteResult<()> {
        let mut rows = self.lock()?;
        match rows.get(id) {
            Some(existing) if owned_by(existing, user_id) => {
                rows.remove(id);
                Ok(())
            }
            _ => Err(RemoteError::NotFound(id.to_string())),
        }
    }
}
