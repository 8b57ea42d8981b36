// Copyright 2019-2025 Parity Technologies (UK) Ltd.
// This file is dual-licensed as Apache-2.0 or MIT.
// see LICENSE for license details.

//! The transactional in-memory store the data source writes into and
//! evaluation reads from.
//!
//! All state lives behind one [`parking_lot::RwLock`], following the same
//! lock-scoping discipline as an online client's cached runtime state: take
//! the lock, copy or clone out exactly what's needed, drop the lock before
//! doing anything that could block or allocate unboundedly.

use flagstream_transport::{ChangeSet, Intent, ItemDescriptor, Kind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
struct StoreData {
    initialized: bool,
    kinds: HashMap<Kind, HashMap<Arc<str>, ItemDescriptor>>,
}

/// An in-memory, version-aware store of flag and segment data.
///
/// Writes come from [`crate::data_source::DataSource`] applying a
/// [`flagstream_transport::ChangeSet`] either as a full basis (replace
/// everything) or a delta (apply each item only if its version is newer than
/// what's stored). Reads are lock-free beyond the RW-lock's read path and
/// never block on a write in progress for longer than a clone.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    /// Construct an empty, uninitialized store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Whether the store has received at least one basis since construction.
    pub fn is_initialized(&self) -> bool {
        self.data.read().initialized
    }

    /// Fetch one item by kind and key. Returns `None` if the kind, key, or
    /// item (including tombstones, which are not returned) is absent.
    pub fn get(&self, kind: &Kind, key: &str) -> Option<ItemDescriptor> {
        let guard = self.data.read();
        let item = guard.kinds.get(kind)?.get(key)?;
        if item.is_deleted() {
            None
        } else {
            Some(item.clone())
        }
    }

    /// Fetch every live (non-tombstone) item of one kind, keyed by item key.
    pub fn get_all(&self, kind: &Kind) -> HashMap<Arc<str>, ItemDescriptor> {
        let guard = self.data.read();
        guard
            .kinds
            .get(kind)
            .map(|items| {
                items
                    .iter()
                    .filter(|(_, item)| !item.is_deleted())
                    .map(|(key, item)| (key.clone(), item.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fetch every live item across every kind, keyed by kind then item key.
    pub fn get_all_kinds(&self) -> HashMap<Kind, HashMap<Arc<str>, ItemDescriptor>> {
        let guard = self.data.read();
        guard
            .kinds
            .iter()
            .map(|(kind, items)| {
                let live: HashMap<Arc<str>, ItemDescriptor> = items
                    .iter()
                    .filter(|(_, item)| !item.is_deleted())
                    .map(|(key, item)| (key.clone(), item.clone()))
                    .collect();
                (kind.clone(), live)
            })
            .collect()
    }

    /// Apply a full basis: replaces the entire store contents with the
    /// change set's collections in one atomic write, and marks the store
    /// initialized. Tombstones in a basis are dropped rather than stored,
    /// since a basis is a complete snapshot and an absent key already means
    /// "not present".
    pub fn set_basis(&self, change_set: ChangeSet) {
        let mut kinds: HashMap<Kind, HashMap<Arc<str>, ItemDescriptor>> = HashMap::new();
        for collection in change_set.collections {
            let entry = kinds.entry(collection.kind).or_default();
            for item in collection.items {
                if !item.item.is_deleted() {
                    entry.insert(item.key, item.item);
                }
            }
        }
        let mut guard = self.data.write();
        guard.kinds = kinds;
        guard.initialized = true;
    }

    /// Apply an incremental delta: each item is written only if it has no
    /// existing entry or its version is strictly greater than what's stored.
    /// Tombstones are written (not dropped) so that a later, older-versioned
    /// put for the same key is correctly rejected as stale.
    ///
    /// Returns, per kind and key, whether that item actually changed the
    /// store (`true`) or was rejected as stale or version-equal (`false`).
    /// A version-equal update is treated the same as a stale one: deltas are
    /// replayed across reconnections, and re-applying the same version must
    /// be a safe no-op.
    ///
    /// Panics are never used for out-of-order data; stale items are silently
    /// ignored, which is the expected steady-state behavior when deltas
    /// arrive out of order or are replayed.
    pub fn apply_delta(&self, change_set: ChangeSet) -> HashMap<Kind, HashMap<Arc<str>, bool>> {
        debug_assert!(!change_set.intent.is_basis());
        let mut updated: HashMap<Kind, HashMap<Arc<str>, bool>> = HashMap::new();
        let mut guard = self.data.write();
        for collection in change_set.collections {
            let entry = guard.kinds.entry(collection.kind.clone()).or_default();
            let updated_keys = updated.entry(collection.kind).or_default();
            for item in collection.items {
                let changed = match entry.get(&item.key) {
                    Some(existing) => item.item.version > existing.version,
                    None => true,
                };
                updated_keys.insert(item.key.clone(), changed);
                if changed {
                    entry.insert(item.key, item.item);
                }
            }
        }
        updated
    }

    /// Apply a change set, dispatching to [`Self::set_basis`] or
    /// [`Self::apply_delta`] based on its intent. A change set with
    /// [`Intent::None`] is a no-op. Returns the per-item updated map for a
    /// delta; `None` for a basis or no-op application, since those don't have
    /// a meaningful per-item changed/unchanged distinction.
    pub fn apply_change_set(
        &self,
        change_set: ChangeSet,
    ) -> Option<HashMap<Kind, HashMap<Arc<str>, bool>>> {
        match change_set.intent {
            Intent::None => None,
            Intent::TransferFull => {
                self.set_basis(change_set);
                None
            }
            Intent::TransferChanges => Some(self.apply_delta(change_set)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flagstream_transport::{flag_kind, Collection, CollectionItem, Selector};
    use serde_json::json;

    fn change_set(intent: Intent, items: Vec<(&str, i64, Option<serde_json::Value>)>) -> ChangeSet {
        ChangeSet {
            intent,
            collections: vec![Collection {
                kind: flag_kind(),
                items: items
                    .into_iter()
                    .map(|(key, version, object)| CollectionItem {
                        key: Arc::from(key),
                        item: ItemDescriptor { version, object },
                    })
                    .collect(),
            }],
            selector: Selector::default(),
        }
    }

    #[test]
    fn starts_uninitialized() {
        let store = MemoryStore::new();
        assert!(!store.is_initialized());
        assert!(store.get(&flag_kind(), "f").is_none());
    }

    #[test]
    fn set_basis_replaces_everything_and_initializes() {
        let store = MemoryStore::new();
        store.set_basis(change_set(
            Intent::TransferFull,
            vec![("a", 1, Some(json!({"on": true})))],
        ));
        assert!(store.is_initialized());
        assert_eq!(store.get(&flag_kind(), "a").unwrap().version, 1);

        store.set_basis(change_set(Intent::TransferFull, vec![("b", 1, Some(json!({})))]));
        assert!(store.get(&flag_kind(), "a").is_none());
        assert!(store.get(&flag_kind(), "b").is_some());
    }

    #[test]
    fn delta_rejects_stale_versions() {
        let store = MemoryStore::new();
        store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("a", 5, Some(json!({"v": 5})))],
        ));
        store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("a", 3, Some(json!({"v": 3})))],
        ));
        assert_eq!(store.get(&flag_kind(), "a").unwrap().version, 5);

        store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("a", 7, Some(json!({"v": 7})))],
        ));
        assert_eq!(store.get(&flag_kind(), "a").unwrap().version, 7);
    }

    #[test]
    fn delta_tombstone_removes_visibility_but_blocks_stale_resurrection() {
        let store = MemoryStore::new();
        store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("a", 1, Some(json!({})))],
        ));
        store.apply_delta(change_set(Intent::TransferChanges, vec![("a", 2, None)]));
        assert!(store.get(&flag_kind(), "a").is_none());

        // A stale put at version 1 must not resurrect the deleted item.
        store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("a", 1, Some(json!({})))],
        ));
        assert!(store.get(&flag_kind(), "a").is_none());
    }

    #[test]
    fn delta_reports_which_items_actually_changed() {
        let store = MemoryStore::new();
        store.set_basis(change_set(
            Intent::TransferFull,
            vec![("f", 10, Some(json!({"on": true})))],
        ));

        let updated = store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("f", 9, Some(json!({"on": false})))],
        ));
        assert_eq!(updated[&flag_kind()]["f"], false);
        assert_eq!(store.get(&flag_kind(), "f").unwrap().version, 10);

        let updated = store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("f", 10, Some(json!({"on": false})))],
        ));
        assert_eq!(updated[&flag_kind()]["f"], false);
        assert_eq!(store.get(&flag_kind(), "f").unwrap().version, 10);

        let updated = store.apply_delta(change_set(
            Intent::TransferChanges,
            vec![("f", 11, Some(json!({"on": false})))],
        ));
        assert_eq!(updated[&flag_kind()]["f"], true);
        assert_eq!(store.get(&flag_kind(), "f").unwrap().version, 11);
    }

    #[test]
    fn get_all_excludes_tombstones() {
        let store = MemoryStore::new();
        store.set_basis(change_set(
            Intent::TransferFull,
            vec![("a", 1, Some(json!({}))), ("b", 1, Some(json!({})))],
        ));
        store.apply_delta(change_set(Intent::TransferChanges, vec![("a", 2, None)]));
        let all = store.get_all(&flag_kind());
        assert_eq!(all.len(), 1);
        assert!(all.contains_key("b"));
    }

    #[test]
    fn intent_none_change_set_is_a_no_op() {
        let store = MemoryStore::new();
        store.apply_change_set(ChangeSet::none());
        assert!(!store.is_initialized());
    }
}
