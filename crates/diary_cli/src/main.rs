//! CLI smoke entry point.
//!
//! # Responsibility
//! - Provide a minimal executable to verify `diary_core` linkage.
//! - Exercise one in-memory add/flush cycle with deterministic output.

use diary_core::{EngineConfig, EntryDraft, EntryStore, Identity, SqliteKvRepository};
use std::process::ExitCode;
use std::sync::Arc;

fn main() -> ExitCode {
    println!("diary_core ping={}", diary_core::ping());
    println!("diary_core version={}", diary_core::core_version());

    let kv = match SqliteKvRepository::open_in_memory() {
        Ok(kv) => kv,
        Err(err) => {
            eprintln!("diary_core store=error error={err}");
            return ExitCode::FAILURE;
        }
    };
    let store = EntryStore::open(Arc::new(kv), Identity::Guest, EngineConfig::default());
    let draft = EntryDraft {
        mood_level: 3,
        content: "smoke".to_string(),
        ..EntryDraft::default()
    };
    if let Err(err) = store.add(draft) {
        eprintln!("diary_core add=error error={err}");
        return ExitCode::FAILURE;
    }
    if !store.shutdown() {
        eprintln!("diary_core shutdown=error error=unsaved_entries");
        return ExitCode::FAILURE;
    }
    println!("diary_core entries={}", store.len());
    ExitCode::SUCCESS
}
