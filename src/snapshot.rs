//! Snapshots: the merged, per-cycle view of every source handed to the renderer.

use std::{collections::BTreeMap, sync::Arc};

use serde::Serialize;
use tokio::time::Instant;

/// How a snapshot entry's value was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryOrigin {
    /// Fetched during this cycle
    Fetched,
    /// Served from a still-fresh cache entry without fetching
    Cached,
    /// The fetch failed and the last good value was reused
    StaleCache,
    /// The fetch failed, nothing was cached and the descriptor's fallback was used
    Fallback,
}

impl EntryOrigin {
    /// Whether values of this origin are shown with a stale badge
    pub fn is_stale(self) -> bool {
        matches!(self, Self::StaleCache | Self::Fallback)
    }
}

/// One source's value in a snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry<V> {
    pub value: V,
    /// When the value was obtained from upstream (or synthesised, for fallbacks)
    pub as_of: Instant,
    pub stale: bool,
    pub origin: EntryOrigin,
}

impl<V> SnapshotEntry<V> {
    pub fn new(value: V, as_of: Instant, origin: EntryOrigin) -> Self {
        Self {
            value,
            as_of,
            stale: origin.is_stale(),
            origin,
        }
    }
}

/// Immutable map from source key to its current value
///
/// Sources that have not completed a first fetch, or whose fetch and fallback both
/// failed this cycle, are absent. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Snapshot<V> {
    entries: Arc<BTreeMap<String, SnapshotEntry<V>>>,
    generation: u64,
}

impl<V> Snapshot<V> {
    pub fn new(generation: u64, entries: BTreeMap<String, SnapshotEntry<V>>) -> Self {
        Self {
            entries: Arc::new(entries),
            generation,
        }
    }

    /// An empty snapshot
    pub fn empty(generation: u64) -> Self {
        Self::new(generation, BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&SnapshotEntry<V>> {
        self.entries.get(key)
    }

    pub fn value(&self, key: &str) -> Option<&V> {
        self.get(key).map(|entry| &entry.value)
    }

    /// `Some(true)` when the key is present and stale, `None` when absent
    pub fn is_stale(&self, key: &str) -> Option<bool> {
        self.get(key).map(|entry| entry.stale)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SnapshotEntry<V>)> {
        self.entries.iter().map(|(key, entry)| (key.as_str(), entry))
    }

    /// Keys whose values are stale
    pub fn stale_keys(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, entry)| entry.stale)
            .map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The controller start/stop epoch this snapshot was produced in
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_staleness_follows_origin() {
        let now = Instant::now();
        assert!(!SnapshotEntry::new(1, now, EntryOrigin::Fetched).stale);
        assert!(!SnapshotEntry::new(1, now, EntryOrigin::Cached).stale);
        assert!(SnapshotEntry::new(1, now, EntryOrigin::StaleCache).stale);
        assert!(SnapshotEntry::new(1, now, EntryOrigin::Fallback).stale);
    }

    #[test]
    fn test_lookup_and_stale_keys() {
        let now = Instant::now();
        let mut entries = BTreeMap::new();
        entries.insert(
            "idx".to_string(),
            SnapshotEntry::new(100, now, EntryOrigin::Fetched),
        );
        entries.insert(
            "sdr".to_string(),
            SnapshotEntry::new(7, now, EntryOrigin::Fallback),
        );
        let snapshot = Snapshot::new(3, entries);

        assert_eq!(snapshot.value("idx"), Some(&100));
        assert_eq!(snapshot.is_stale("sdr"), Some(true));
        assert_eq!(snapshot.is_stale("missing"), None);
        assert_eq!(snapshot.stale_keys().collect::<Vec<_>>(), vec!["sdr"]);
        assert_eq!(snapshot.generation(), 3);
        assert_eq!(snapshot.len(), 2);
    }
}
