use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};
use serde::{Deserialize, Deserializer, Serialize};

use crate::capacity::Capacity;

/// One reason an entry is exempt from automatic eviction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Protection {
    Favorite,
    Pinned,
    Tag(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProtectionFlags {
    pub favorite: bool,
    pub pinned: bool,
    pub tags: BTreeSet<String>,
}

impl ProtectionFlags {
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.favorite || self.pinned || !self.tags.is_empty()
    }

    fn set(&mut self, protection: Protection, value: bool) {
        match protection {
            Protection::Favorite => self.favorite = value,
            Protection::Pinned => self.pinned = value,
            Protection::Tag(name) => {
                if value {
                    self.tags.insert(name);
                } else {
                    self.tags.remove(&name);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    content: String,
    flags: ProtectionFlags,
}

impl Entry {
    fn new(content: String) -> Self {
        Self {
            content,
            flags: ProtectionFlags::default(),
        }
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn flags(&self) -> &ProtectionFlags {
        &self.flags
    }

    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.flags.is_protected()
    }
}

/// Result of [`ProtectedStore::add`]. A full store is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// Appended as the most recent entry; `evicted` lists what made room.
    Added { evicted: Vec<String> },
    /// Already stored; moved to the most recent position.
    Promoted,
    /// Already the most recent entry.
    AlreadyLatest,
    /// Blank content is never stored.
    Empty,
    /// Protected entries fill the whole soft cap, so nothing can be evicted
    /// to make room. The store is unchanged.
    BlockedByProtection,
}

impl AddOutcome {
    #[must_use]
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            Self::Added { .. } | Self::Promoted | Self::AlreadyLatest
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub evicted: Vec<String>,
    pub target_reached: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapacityReport {
    pub capacity: Capacity,
    pub evicted: Vec<String>,
    pub target_reached: bool,
    pub protected_count: usize,
    /// Protected entries alone exceed the hard cap. Reported, never corrected.
    pub protected_exceeds_hard_cap: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub imported: usize,
    pub evicted: Vec<String>,
}

/// Flat, order-preserving view of a store, shaped like the persisted files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default, deserialize_with = "strings_only")]
    pub history: Vec<String>,
    #[serde(default)]
    pub favorites: Vec<String>,
    #[serde(default)]
    pub pins: Vec<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, BTreeSet<String>>,
}

/// A list whose non-string items are dropped; anything but a list is an
/// error.
fn strings_only<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Vec::<serde_json::Value>::deserialize(deserializer)?;
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::String(text) => Some(text),
            _ => None,
        })
        .collect())
}

/// Ordered, de-duplicated history, oldest first.
///
/// Invariants:
/// - content is unique; re-adding moves the entry to the most recent slot.
/// - automatic eviction only ever removes unprotected entries, oldest first.
/// - `len() <= capacity().soft()` unless protected entries alone exceed it.
#[derive(Debug, Clone, Default)]
pub struct ProtectedStore {
    entries: Vec<Entry>,
    capacity: Capacity,
}

impl ProtectedStore {
    #[must_use]
    pub fn new(capacity: Capacity) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Rebuild a store from persisted or exported data.
    #[must_use]
    pub fn from_snapshot(capacity: Capacity, snapshot: &StoreSnapshot) -> Self {
        let mut store = Self::new(capacity);
        store.import(snapshot);
        store
    }

    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn contents(&self) -> Vec<&str> {
        self.entries.iter().map(Entry::content).collect()
    }

    #[must_use]
    pub fn position(&self, content: &str) -> Option<usize> {
        self.entries.iter().position(|entry| entry.content == content)
    }

    #[must_use]
    pub fn contains(&self, content: &str) -> bool {
        self.position(content).is_some()
    }

    #[must_use]
    pub fn protected_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_protected()).count()
    }

    pub fn add(&mut self, content: impl Into<String>) -> AddOutcome {
        let content = content.into();
        if content.trim().is_empty() {
            return AddOutcome::Empty;
        }

        if let Some(index) = self.position(&content) {
            if index + 1 == self.entries.len() {
                return AddOutcome::AlreadyLatest;
            }
            let entry = self.entries.remove(index);
            self.entries.push(entry);
            return AddOutcome::Promoted;
        }

        let soft = self.capacity.soft();
        if self.protected_count() >= soft {
            debug!(
                "Rejecting new entry: {} protected entries fill soft cap {soft}",
                self.protected_count()
            );
            return AddOutcome::BlockedByProtection;
        }

        let report = self.evict(soft - 1);
        self.entries.push(Entry::new(content));
        AddOutcome::Added {
            evicted: report.evicted,
        }
    }

    /// Remove the oldest unprotected entries until `len() <= target` or only
    /// protected entries remain.
    pub fn evict(&mut self, target: usize) -> EvictionReport {
        let mut evicted = Vec::new();
        while self.entries.len() > target {
            let Some(index) = self.entries.iter().position(|entry| !entry.is_protected()) else {
                break;
            };
            evicted.push(self.entries.remove(index).content);
        }

        EvictionReport {
            target_reached: self.entries.len() <= target,
            evicted,
        }
    }

    pub fn apply_capacity_change(&mut self, capacity: Capacity) -> CapacityReport {
        self.capacity = capacity;
        let report = self.evict(capacity.soft());
        let protected_count = self.protected_count();
        let protected_exceeds_hard_cap = protected_count > capacity.hard();

        if !report.target_reached {
            warn!(
                "{protected_count} protected entries exceed the soft cap of {}",
                capacity.soft()
            );
        }

        CapacityReport {
            capacity,
            evicted: report.evicted,
            target_reached: report.target_reached,
            protected_count,
            protected_exceeds_hard_cap,
        }
    }

    pub fn remove(&mut self, content: &str) -> bool {
        let Some(index) = self.position(content) else {
            return false;
        };
        self.entries.remove(index);
        true
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Entry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Set or clear one protection on `content`.
    ///
    /// Returns `None` when the content is not stored. Clearing the last
    /// protection makes the entry evictable again, so eviction is re-applied
    /// against the soft cap and its report returned.
    pub fn set_protected(
        &mut self,
        content: &str,
        protection: Protection,
        value: bool,
    ) -> Option<EvictionReport> {
        let index = self.position(content)?;
        self.entries[index].flags.set(protection, value);

        if value {
            Some(EvictionReport {
                evicted: Vec::new(),
                target_reached: self.entries.len() <= self.capacity.soft(),
            })
        } else {
            Some(self.evict(self.capacity.soft()))
        }
    }

    /// Explicit user clear: drops every unprotected entry.
    pub fn clear_unprotected(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(Entry::is_protected);
        before - self.entries.len()
    }

    /// Positions of entries containing `query`, ignoring case, oldest first.
    #[must_use]
    pub fn search(&self, query: &str) -> Vec<usize> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.content.to_lowercase().contains(&query))
            .map(|(index, _)| index)
            .collect()
    }

    /// Join the entries at `positions` with newlines, in the given order.
    #[must_use]
    pub fn combine(&self, positions: &[usize]) -> Option<String> {
        let parts: Vec<&str> = positions
            .iter()
            .filter_map(|&index| self.entries.get(index).map(Entry::content))
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n"))
    }

    #[must_use]
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::default();
        for entry in &self.entries {
            snapshot.history.push(entry.content.clone());
            if entry.flags.favorite {
                snapshot.favorites.push(entry.content.clone());
            }
            if entry.flags.pinned {
                snapshot.pins.push(entry.content.clone());
            }
            if !entry.flags.tags.is_empty() {
                snapshot
                    .tags
                    .insert(entry.content.clone(), entry.flags.tags.clone());
            }
        }
        snapshot
    }

    /// Merge `snapshot` into the store.
    ///
    /// History is appended with latest-wins de-duplication, protection flags
    /// are applied before eviction so protected imports survive, then the
    /// store is evicted to its soft cap. Flags for content absent from the
    /// merged history are ignored.
    pub fn import(&mut self, snapshot: &StoreSnapshot) -> ImportReport {
        let mut imported = 0;
        for content in &snapshot.history {
            if content.trim().is_empty() {
                continue;
            }
            if let Some(index) = self.position(content) {
                let entry = self.entries.remove(index);
                self.entries.push(entry);
            } else {
                self.entries.push(Entry::new(content.clone()));
            }
            imported += 1;
        }

        for content in &snapshot.favorites {
            self.flag(content, Protection::Favorite);
        }
        for content in &snapshot.pins {
            self.flag(content, Protection::Pinned);
        }
        for (content, tags) in &snapshot.tags {
            for tag in tags {
                self.flag(content, Protection::Tag(tag.clone()));
            }
        }

        let report = self.evict(self.capacity.soft());
        ImportReport {
            imported,
            evicted: report.evicted,
        }
    }

    fn flag(&mut self, content: &str, protection: Protection) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.content == content) {
            entry.flags.set(protection, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AddOutcome, Capacity, Protection, ProtectedStore, StoreSnapshot};
    use crate::capacity::HARD_CAPACITY;

    fn store_with(capacity: usize, items: &[&str]) -> ProtectedStore {
        let mut store = ProtectedStore::new(Capacity::new(capacity));
        for item in items {
            store.add(*item);
        }
        store
    }

    #[test]
    fn add_evicts_oldest_when_over_capacity() {
        let store = store_with(3, &["A", "B", "C", "D"]);
        assert_eq!(store.contents(), vec!["B", "C", "D"]);
    }

    #[test]
    fn eviction_skips_protected_entries() {
        let mut store = store_with(3, &["A", "B", "C", "D"]);
        store.set_protected("B", Protection::Favorite, true);

        store.add("E");
        store.add("F");

        assert_eq!(store.contents(), vec!["B", "E", "F"]);
        assert!(store.len() <= 3);
    }

    #[test]
    fn add_is_blocked_when_protected_entries_fill_capacity() {
        let mut store = store_with(2, &["X", "Y"]);
        store.set_protected("X", Protection::Favorite, true);
        store.set_protected("Y", Protection::Favorite, true);

        let outcome = store.add("Z");

        assert_eq!(outcome, AddOutcome::BlockedByProtection);
        assert!(!outcome.is_stored());
        assert_eq!(store.contents(), vec!["X", "Y"]);
    }

    #[test]
    fn re_adding_moves_entry_to_most_recent_position() {
        let mut store = store_with(10, &["A", "B"]);
        assert_eq!(store.add("A"), AddOutcome::Promoted);
        assert_eq!(store.contents(), vec!["B", "A"]);
        assert_eq!(store.add("A"), AddOutcome::AlreadyLatest);
    }

    #[test]
    fn promoted_entry_keeps_its_flags() {
        let mut store = store_with(10, &["A", "B"]);
        store.set_protected("A", Protection::Pinned, true);
        store.add("A");

        let entry = store.get(1).expect("promoted entry should be last");
        assert_eq!(entry.content(), "A");
        assert!(entry.flags().pinned);
    }

    #[test]
    fn blank_content_is_not_stored() {
        let mut store = ProtectedStore::new(Capacity::new(3));
        assert_eq!(store.add("  \n"), AddOutcome::Empty);
        assert!(store.is_empty());
    }

    #[test]
    fn added_outcome_lists_evicted_content() {
        let mut store = store_with(2, &["A", "B"]);
        assert_eq!(
            store.add("C"),
            AddOutcome::Added {
                evicted: vec!["A".to_string()]
            }
        );
    }

    #[test]
    fn evict_reports_unreachable_target() {
        let mut store = store_with(5, &["A", "B", "C"]);
        store.set_protected("A", Protection::Favorite, true);
        store.set_protected("B", Protection::Tag("work".to_string()), true);

        let report = store.evict(1);

        assert_eq!(report.evicted, vec!["C".to_string()]);
        assert!(!report.target_reached);
        assert_eq!(store.contents(), vec!["A", "B"]);
    }

    #[test]
    fn capacity_change_evicts_down_to_new_soft_cap() {
        let mut store = store_with(10, &["A", "B", "C", "D", "E"]);
        store.set_protected("A", Protection::Pinned, true);

        let report = store.apply_capacity_change(Capacity::new(2));

        assert_eq!(report.evicted, vec!["B".to_string(), "C".to_string(), "D".to_string()]);
        assert!(report.target_reached);
        assert!(!report.protected_exceeds_hard_cap);
        assert_eq!(store.contents(), vec!["A", "E"]);
    }

    #[test]
    fn protected_import_past_hard_cap_is_reported_not_corrected() {
        let items: Vec<String> = (0..HARD_CAPACITY + 2).map(|index| format!("item-{index}")).collect();
        let mut store = ProtectedStore::new(Capacity::new(HARD_CAPACITY));

        let imported = store.import(&StoreSnapshot {
            history: items.clone(),
            favorites: items,
            ..StoreSnapshot::default()
        });
        let report = store.apply_capacity_change(Capacity::new(HARD_CAPACITY));

        assert_eq!(imported.imported, HARD_CAPACITY + 2);
        assert!(imported.evicted.is_empty());
        assert!(report.evicted.is_empty());
        assert!(!report.target_reached);
        assert!(report.protected_exceeds_hard_cap);
        assert_eq!(report.protected_count, HARD_CAPACITY + 2);
        assert_eq!(store.len(), HARD_CAPACITY + 2);
    }

    #[test]
    fn capacity_change_never_removes_protected_entries() {
        let mut store = store_with(10, &["A", "B", "C"]);
        for item in ["A", "B", "C"] {
            store.set_protected(item, Protection::Favorite, true);
        }

        let report = store.apply_capacity_change(Capacity::new(1));

        assert!(report.evicted.is_empty());
        assert!(!report.target_reached);
        assert_eq!(report.protected_count, 3);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn clearing_last_protection_reapplies_eviction() {
        let mut store = store_with(3, &["A", "B", "C"]);
        for item in ["A", "B", "C"] {
            store.set_protected(item, Protection::Favorite, true);
        }
        store.apply_capacity_change(Capacity::new(2));
        assert_eq!(store.len(), 3);

        let report = store
            .set_protected("A", Protection::Favorite, false)
            .expect("content should exist");

        assert_eq!(report.evicted, vec!["A".to_string()]);
        assert_eq!(store.contents(), vec!["B", "C"]);
    }

    #[test]
    fn entry_with_remaining_tag_stays_protected() {
        let mut store = store_with(5, &["A"]);
        store.set_protected("A", Protection::Tag("work".to_string()), true);
        store.set_protected("A", Protection::Favorite, true);
        store.set_protected("A", Protection::Favorite, false);

        let entry = store.get(0).expect("entry should exist");
        assert!(entry.is_protected());
        assert!(entry.flags().tags.contains("work"));
    }

    #[test]
    fn set_protected_on_missing_content_returns_none() {
        let mut store = store_with(5, &["A"]);
        assert!(store.set_protected("missing", Protection::Favorite, true).is_none());
    }

    #[test]
    fn explicit_removal_ignores_protection() {
        let mut store = store_with(5, &["A", "B"]);
        store.set_protected("A", Protection::Favorite, true);

        assert!(store.remove("A"));
        assert!(!store.remove("A"));
        assert_eq!(store.contents(), vec!["B"]);

        let removed = store.remove_at(0).expect("index 0 should exist");
        assert_eq!(removed.content(), "B");
        assert!(store.remove_at(0).is_none());
    }

    #[test]
    fn clear_unprotected_keeps_protected_entries() {
        let mut store = store_with(5, &["A", "B", "C"]);
        store.set_protected("B", Protection::Pinned, true);

        assert_eq!(store.clear_unprotected(), 2);
        assert_eq!(store.contents(), vec!["B"]);
    }

    #[test]
    fn search_is_case_insensitive() {
        let store = store_with(5, &["Hello world", "bye", "HELLO again"]);
        assert_eq!(store.search("hello"), vec![0, 2]);
        assert!(store.search("   ").is_empty());
        assert!(store.search("missing").is_empty());
    }

    #[test]
    fn combine_joins_selected_entries_in_order() {
        let store = store_with(5, &["one", "two", "three"]);
        assert_eq!(store.combine(&[2, 0]).as_deref(), Some("three\none"));
        assert_eq!(store.combine(&[1, 9]).as_deref(), Some("two"));
        assert!(store.combine(&[9]).is_none());
    }

    #[test]
    fn snapshot_import_preserves_content_and_flags() {
        let mut store = store_with(5, &["A", "B", "C"]);
        store.set_protected("A", Protection::Favorite, true);
        store.set_protected("B", Protection::Pinned, true);
        store.set_protected("C", Protection::Tag("code".to_string()), true);

        let restored = ProtectedStore::from_snapshot(Capacity::new(5), &store.snapshot());

        assert_eq!(restored.contents(), store.contents());
        assert!(restored.get(0).is_some_and(|entry| entry.flags().favorite));
        assert!(restored.get(1).is_some_and(|entry| entry.flags().pinned));
        assert!(
            restored
                .get(2)
                .is_some_and(|entry| entry.flags().tags.contains("code"))
        );
    }

    #[test]
    fn import_merges_with_latest_wins_and_protects_before_evicting() {
        let mut store = store_with(3, &["A", "B", "C"]);
        let snapshot = StoreSnapshot {
            history: vec!["old".to_string(), "B".to_string(), " ".to_string()],
            favorites: vec!["old".to_string(), "not-stored".to_string()],
            ..StoreSnapshot::default()
        };

        let report = store.import(&snapshot);

        assert_eq!(report.imported, 2);
        assert_eq!(report.evicted, vec!["A".to_string()]);
        assert_eq!(store.contents(), vec!["C", "old", "B"]);
        assert!(store.get(1).is_some_and(|entry| entry.flags().favorite));
    }
}
