//! Identity and storage namespace resolution.
//!
//! # Invariants
//! - Key resolution is pure and total: every identity maps to exactly one key.
//! - Guest and user namespaces never share a key.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const GUEST_NAMESPACE_KEY: &str = "entries:guest";
pub const USER_NAMESPACE_PREFIX: &str = "entries:user:";
/// Pre-namespacing key written by older builds.
pub const LEGACY_KEY: &str = "entries:legacy";

const FIRST_ENTRY_MARKER_PREFIX: &str = "first_entry_date:";

/// Who owns the active namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Guest,
    User { id: String },
}

impl Identity {
    pub fn user(id: impl Into<String>) -> Self {
        Self::User { id: id.into() }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Guest => None,
            Self::User { id } => Some(id.as_str()),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Self::Guest)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guest => write!(f, "guest"),
            Self::User { id } => write!(f, "user:{id}"),
        }
    }
}

/// Maps identities to storage keys.
pub struct KeyResolver;

impl KeyResolver {
    /// `Guest -> "entries:guest"`, `User{id} -> "entries:user:<id>"`.
    pub fn resolve(identity: &Identity) -> String {
        match identity {
            Identity::Guest => GUEST_NAMESPACE_KEY.to_string(),
            Identity::User { id } => format!("{USER_NAMESPACE_PREFIX}{id}"),
        }
    }

    /// Side-table key for the "first entry date" marker of one namespace.
    pub fn first_entry_marker(identity: &Identity) -> String {
        format!("{FIRST_ENTRY_MARKER_PREFIX}{identity}")
    }
}

/// Outcome of a migration or merge, reported for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    pub success: bool,
    pub merged_count: usize,
    pub message: String,
}

impl MigrationResult {
    pub fn ok(merged_count: usize, message: impl Into<String>) -> Self {
        Self {
            success: true,
            merged_count,
            message: message.into(),
        }
    }

    pub fn nothing_to_do(message: impl Into<String>) -> Self {
        Self::ok(0, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            merged_count: 0,
            message: message.into(),
        }
    }
}
