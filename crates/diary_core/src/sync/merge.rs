//! Pure merge of two entry collections keyed by entry id.
//!
//! # Invariants
//! - The output id set is the union of both input id sets.
//! - Output is sorted by `timestamp DESC, id ASC`.
//! - `KeepLatest` replaces only on a strictly newer `timestamp`; ties keep
//!   the first collection's value.

use crate::model::entry::Entry;
use std::collections::HashMap;

/// Conflict policy applied when both collections carry the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    KeepFirst,
    KeepSecond,
    KeepLatest,
}

impl MergePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeepFirst => "keep_first",
            Self::KeepSecond => "keep_second",
            Self::KeepLatest => "keep_latest",
        }
    }
}

/// Merged collection plus how `second` contributed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub entries: Vec<Entry>,
    /// Ids from `second` that were absent in `first`.
    pub inserted: usize,
    /// Ids from `second` that replaced a value from `first`.
    pub replaced: usize,
}

impl MergeOutcome {
    pub fn changed(&self) -> usize {
        self.inserted + self.replaced
    }
}

/// Merges `second` into `first` under `policy`.
pub fn merge(first: &[Entry], second: &[Entry], policy: MergePolicy) -> Vec<Entry> {
    merge_with_stats(first, second, policy).entries
}

/// Same as [`merge`], also counting inserts and replacements.
pub fn merge_with_stats(first: &[Entry], second: &[Entry], policy: MergePolicy) -> MergeOutcome {
    let mut by_id: HashMap<&str, &Entry> = HashMap::with_capacity(first.len() + second.len());
    for entry in first {
        by_id.insert(entry.id.as_str(), entry);
    }

    let mut inserted = 0;
    let mut replaced = 0;
    for candidate in second {
        match by_id.get(candidate.id.as_str()).copied() {
            None => {
                by_id.insert(candidate.id.as_str(), candidate);
                inserted += 1;
            }
            Some(existing) => {
                if should_replace(existing, candidate, policy) {
                    by_id.insert(candidate.id.as_str(), candidate);
                    replaced += 1;
                }
            }
        }
    }

    let mut entries: Vec<Entry> = by_id.into_values().cloned().collect();
    sort_newest_first(&mut entries);

    MergeOutcome {
        entries,
        inserted,
        replaced,
    }
}

/// Sorts by `timestamp DESC`, then `id ASC`.
pub fn sort_newest_first(entries: &mut [Entry]) {
    entries.sort_by(|left, right| {
        right
            .timestamp
            .cmp(&left.timestamp)
            .then_with(|| left.id.cmp(&right.id))
    });
}

fn should_replace(existing: &Entry, candidate: &Entry, policy: MergePolicy) -> bool {
    match policy {
        MergePolicy::KeepFirst => false,
        MergePolicy::KeepSecond => true,
        MergePolicy::KeepLatest => candidate.timestamp > existing.timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::{merge, merge_with_stats, MergePolicy};
    use crate::model::entry::{Entry, EntryStatus};
    use std::collections::BTreeSet;

    fn entry(id: &str, timestamp: i64, content: &str) -> Entry {
        Entry {
            id: id.to_string(),
            timestamp,
            mood_level: 3,
            content: content.to_string(),
            deadline: String::new(),
            people: Vec::new(),
            triggers: Vec::new(),
            status: EntryStatus::Active,
            resolved_at: None,
            burned_at: None,
            edit_history: Vec::new(),
        }
    }

    const POLICIES: [MergePolicy; 3] = [
        MergePolicy::KeepFirst,
        MergePolicy::KeepSecond,
        MergePolicy::KeepLatest,
    ];

    #[test]
    fn output_is_sorted_newest_first() {
        let a = vec![entry("1", 100, "a"), entry("3", 300, "c")];
        let b = vec![entry("2", 200, "b")];
        let merged = merge(&a, &b, MergePolicy::KeepFirst);
        let ids: Vec<&str> = merged.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);
    }

    #[test]
    fn keep_first_keeps_existing_value() {
        let merged = merge(
            &[entry("1", 100, "local")],
            &[entry("1", 900, "remote")],
            MergePolicy::KeepFirst,
        );
        assert_eq!(merged[0].content, "local");
    }

    #[test]
    fn keep_second_overwrites_unconditionally() {
        let merged = merge(
            &[entry("1", 900, "local")],
            &[entry("1", 100, "remote")],
            MergePolicy::KeepSecond,
        );
        assert_eq!(merged[0].content, "remote");
    }

    #[test]
    fn keep_latest_replaces_only_on_strictly_newer_timestamp() {
        let newer = merge(
            &[entry("1", 100, "local")],
            &[entry("1", 101, "remote")],
            MergePolicy::KeepLatest,
        );
        assert_eq!(newer[0].content, "remote");

        let tie = merge(
            &[entry("1", 100, "local")],
            &[entry("1", 100, "remote")],
            MergePolicy::KeepLatest,
        );
        assert_eq!(tie[0].content, "local");
    }

    #[test]
    fn merge_is_idempotent_for_every_policy() {
        let a = vec![entry("1", 100, "a1"), entry("2", 250, "a2")];
        let b = vec![
            entry("2", 300, "b2"),
            entry("3", 50, "b3"),
            entry("1", 100, "b1"),
        ];
        for policy in POLICIES {
            let once = merge(&a, &b, policy);
            let twice = merge(&once, &b, policy);
            assert_eq!(once, twice, "policy {}", policy.as_str());
        }
    }

    #[test]
    fn merge_never_loses_ids() {
        let a = vec![entry("1", 1, "x"), entry("2", 2, "x")];
        let b = vec![entry("2", 3, "y"), entry("4", 4, "y")];
        let expected: BTreeSet<&str> = ["1", "2", "4"].into_iter().collect();
        for policy in POLICIES {
            let merged = merge(&a, &b, policy);
            let ids: BTreeSet<&str> = merged.iter().map(|e| e.id.as_str()).collect();
            assert_eq!(ids, expected);
            assert_eq!(merged.len(), expected.len());
        }
    }

    #[test]
    fn stats_count_inserts_and_replacements() {
        let outcome = merge_with_stats(
            &[entry("1", 100, "a")],
            &[entry("1", 200, "b"), entry("2", 50, "c")],
            MergePolicy::KeepLatest,
        );
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.replaced, 1);
        assert_eq!(outcome.changed(), 2);
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        assert!(merge(&[], &[], MergePolicy::KeepLatest).is_empty());
    }
}
