//! Diary entry domain model.
//!
//! # Responsibility
//! - Define the canonical entry record persisted per namespace.
//! - Own status transitions and the bounded edit history.
//!
//! # Invariants
//! - `id` is stable and never reused for another entry in a namespace.
//! - `mood_level` stays in `1..=5`.
//! - `edit_history` never grows beyond the configured cap; oldest go first.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable entry identifier in text form.
///
/// Kept as `String` because remote rows and legacy payloads carry opaque ids.
pub type EntryId = String;

pub const MIN_MOOD_LEVEL: u8 = 1;
pub const MAX_MOOD_LEVEL: u8 = 5;
pub const DEFAULT_EDIT_HISTORY_CAP: usize = 10;

/// Lifecycle state of a diary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Processing,
    Resolved,
    Burned,
}

impl EntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Burned => "burned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "processing" => Some(Self::Processing),
            "resolved" => Some(Self::Resolved),
            "burned" => Some(Self::Burned),
            _ => None,
        }
    }
}

/// Snapshot of the editable fields taken right before an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSnapshot {
    pub edited_at: i64,
    pub previous_content: String,
    pub previous_mood_level: u8,
    pub previous_deadline: String,
    #[serde(default)]
    pub previous_people: Vec<String>,
    #[serde(default)]
    pub previous_triggers: Vec<String>,
}

/// Canonical diary record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: EntryId,
    /// Creation instant in epoch milliseconds. Sort key and merge tie-breaker.
    pub timestamp: i64,
    pub mood_level: u8,
    pub content: String,
    #[serde(default)]
    pub deadline: String,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burned_at: Option<i64>,
    #[serde(default)]
    pub edit_history: Vec<EditSnapshot>,
}

/// Caller-provided fields for a new entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryDraft {
    pub mood_level: u8,
    pub content: String,
    pub deadline: String,
    pub people: Vec<String>,
    pub triggers: Vec<String>,
}

/// Partial update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryPatch {
    pub mood_level: Option<u8>,
    pub content: Option<String>,
    pub deadline: Option<String>,
    pub people: Option<Vec<String>>,
    pub triggers: Option<Vec<String>>,
    pub status: Option<EntryStatus>,
}

/// Validation failures for entry writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValidationError {
    MoodLevelOutOfRange(u8),
    EmptyId,
}

impl Display for EntryValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MoodLevelOutOfRange(value) => write!(
                f,
                "mood level {value} is outside {MIN_MOOD_LEVEL}..={MAX_MOOD_LEVEL}"
            ),
            Self::EmptyId => write!(f, "entry id cannot be empty"),
        }
    }
}

impl Error for EntryValidationError {}

impl Entry {
    /// Creates an active entry with a generated stable id.
    pub fn from_draft(draft: EntryDraft, timestamp: i64) -> Result<Self, EntryValidationError> {
        validate_mood_level(draft.mood_level)?;
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            mood_level: draft.mood_level,
            content: draft.content,
            deadline: draft.deadline,
            people: draft.people,
            triggers: draft.triggers,
            status: EntryStatus::Active,
            resolved_at: None,
            burned_at: None,
            edit_history: Vec::new(),
        })
    }

    /// Checks persisted/imported state.
    pub fn validate(&self) -> Result<(), EntryValidationError> {
        if self.id.trim().is_empty() {
            return Err(EntryValidationError::EmptyId);
        }
        validate_mood_level(self.mood_level)
    }

    /// Records the current editable fields, evicting the oldest snapshots
    /// beyond `cap`.
    pub fn push_edit_snapshot(&mut self, edited_at: i64, cap: usize) {
        self.edit_history.push(EditSnapshot {
            edited_at,
            previous_content: self.content.clone(),
            previous_mood_level: self.mood_level,
            previous_deadline: self.deadline.clone(),
            previous_people: self.people.clone(),
            previous_triggers: self.triggers.clone(),
        });
        if self.edit_history.len() > cap {
            let overflow = self.edit_history.len() - cap;
            self.edit_history.drain(..overflow);
        }
    }

    /// Applies a partial update in place. The caller snapshots beforehand.
    ///
    /// A status change is stamped with `at`, as `resolve`/`burn` would.
    pub fn apply_patch(&mut self, patch: EntryPatch, at: i64) -> Result<(), EntryValidationError> {
        if let Some(mood_level) = patch.mood_level {
            validate_mood_level(mood_level)?;
            self.mood_level = mood_level;
        }
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(deadline) = patch.deadline {
            self.deadline = deadline;
        }
        if let Some(people) = patch.people {
            self.people = people;
        }
        if let Some(triggers) = patch.triggers {
            self.triggers = triggers;
        }
        if let Some(status) = patch.status {
            self.set_status(status, at);
        }
        Ok(())
    }

    /// Moves to `status`, keeping the lifecycle stamps consistent with it.
    pub fn set_status(&mut self, status: EntryStatus, at: i64) {
        if status == self.status {
            return;
        }
        match status {
            EntryStatus::Resolved => self.resolve(at),
            EntryStatus::Burned => self.burn(at),
            other => {
                self.status = other;
                self.resolved_at = None;
                self.burned_at = None;
            }
        }
    }

    pub fn resolve(&mut self, at: i64) {
        self.status = EntryStatus::Resolved;
        self.resolved_at = Some(at);
    }

    pub fn burn(&mut self, at: i64) {
        self.status = EntryStatus::Burned;
        self.burned_at = Some(at);
    }
}

fn validate_mood_level(value: u8) -> Result<(), EntryValidationError> {
    if (MIN_MOOD_LEVEL..=MAX_MOOD_LEVEL).contains(&value) {
        Ok(())
    } else {
        Err(EntryValidationError::MoodLevelOutOfRange(value))
    }
}
