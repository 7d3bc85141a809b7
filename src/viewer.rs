//! Per-overlay viewer tracking.
//!
//! A [`ViewerSet`] decides who may see an overlay and keeps one
//! [`ViewerRecord`] per admitted viewer. It never talks to the network: every
//! side effect (initial send, restoration) is handed in as a callback and run
//! after the record lock has been released.

use crate::metadata::insert_first;
use crate::types::{ViewerId, ViewerInfo};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub type ViewCondition = Arc<dyn Fn(&ViewerInfo) -> bool + Send + Sync>;
pub type Supplier<T> = Arc<dyn Fn() -> Option<T> + Send + Sync>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// Everything an overlay remembers about one viewer.
pub struct ViewerRecord<T> {
    /// Explicit override. Wins over the supplier.
    pub state: Option<T>,
    pub supplier: Option<Supplier<T>>,
    /// Break-speed override in ticks (`-1` = vanilla).
    pub break_speed: Option<i32>,
    pub metadata: HashMap<String, Value>,
}

impl<T> Default for ViewerRecord<T> {
    fn default() -> Self {
        Self {
            state: None,
            supplier: None,
            break_speed: None,
            metadata: HashMap::new(),
        }
    }
}

impl<T: Clone> Clone for ViewerRecord<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            supplier: self.supplier.clone(),
            break_speed: self.break_speed,
            metadata: self.metadata.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ViewerRecord<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewerRecord")
            .field("state", &self.state)
            .field("supplier", &self.supplier.is_some())
            .field("break_speed", &self.break_speed)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl<T: Clone> ViewerRecord<T> {
    pub fn with_supplier(supplier: Supplier<T>) -> Self {
        Self {
            supplier: Some(supplier),
            ..Self::default()
        }
    }

    /// Override, else whatever the supplier yields.
    pub fn resolved(&self) -> Option<T> {
        self.state
            .clone()
            .or_else(|| self.supplier.as_ref().and_then(|supplier| supplier()))
    }
}

// ---------------------------------------------------------------------------
// ViewerSet
// ---------------------------------------------------------------------------

pub struct ViewerSet<T> {
    conditions: RwLock<Vec<ViewCondition>>,
    records: RwLock<HashMap<ViewerId, ViewerRecord<T>>>,
}

impl<T> Default for ViewerSet<T> {
    fn default() -> Self {
        Self {
            conditions: RwLock::new(Vec::new()),
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl<T: Clone> ViewerSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Visibility
    // -----------------------------------------------------------------------

    pub fn add_condition(&self, condition: impl Fn(&ViewerInfo) -> bool + Send + Sync + 'static) {
        self.conditions.write().push(Arc::new(condition));
    }

    /// Conjunction of all conditions; an empty set admits everyone.
    pub fn can_view(&self, viewer: &ViewerInfo) -> bool {
        let conditions = self.conditions.read().clone();
        conditions.iter().all(|condition| condition(viewer))
    }

    pub fn is_viewer(&self, id: &ViewerId) -> bool {
        self.records.read().contains_key(id)
    }

    /// Snapshot of the viewer's record.
    pub fn get(&self, id: &ViewerId) -> Option<ViewerRecord<T>> {
        self.records.read().get(id).cloned()
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Admits `viewer` if every condition passes. An existing record is
    /// returned as is and `notify` only runs for a fresh insertion.
    pub fn attempt_add(&self, viewer: &ViewerInfo, notify: impl FnOnce()) -> Option<ViewerRecord<T>> {
        if !self.can_view(viewer) {
            return None;
        }

        let (record, inserted) = {
            let mut records = self.records.write();
            match records.entry(viewer.id) {
                std::collections::hash_map::Entry::Occupied(existing) => {
                    (existing.get().clone(), false)
                }
                std::collections::hash_map::Entry::Vacant(slot) => {
                    (slot.insert(ViewerRecord::default()).clone(), true)
                }
            }
        };

        if inserted {
            notify();
        }
        Some(record)
    }

    /// Adds without checking conditions, replacing any existing record.
    pub fn add(&self, id: ViewerId) -> ViewerRecord<T> {
        self.insert(id, ViewerRecord::default())
    }

    pub fn add_with_supplier(&self, id: ViewerId, supplier: Supplier<T>) -> ViewerRecord<T> {
        self.insert(id, ViewerRecord::with_supplier(supplier))
    }

    fn insert(&self, id: ViewerId, record: ViewerRecord<T>) -> ViewerRecord<T> {
        self.records.write().insert(id, record.clone());
        record
    }

    /// Idempotent. `restore` runs only when a record was actually removed.
    pub fn remove(&self, id: &ViewerId, restore: impl FnOnce()) -> bool {
        let removed = self.records.write().remove(id).is_some();
        if removed {
            restore();
        }
        removed
    }

    /// Drops the record without any side effect (viewer went offline).
    pub fn prune(&self, id: &ViewerId) -> bool {
        self.records.write().remove(id).is_some()
    }

    pub fn clear(&self) -> Vec<ViewerId> {
        self.records.write().drain().map(|(id, _)| id).collect()
    }

    pub fn with_record_mut<R>(&self, id: &ViewerId, f: impl FnOnce(&mut ViewerRecord<T>) -> R) -> Option<R> {
        self.records.write().get_mut(id).map(f)
    }

    pub fn for_each_mut(&self, mut f: impl FnMut(&ViewerId, &mut ViewerRecord<T>)) {
        for (id, record) in self.records.write().iter_mut() {
            f(id, record);
        }
    }

    pub fn ids(&self) -> Vec<ViewerId> {
        self.records.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn break_speed(&self, id: &ViewerId) -> Option<i32> {
        self.records.read().get(id).and_then(|r| r.break_speed)
    }

    // -----------------------------------------------------------------------
    // Per-viewer metadata
    // -----------------------------------------------------------------------

    /// First write wins. `false` if the viewer is unknown or the key exists.
    pub fn add_metadata(&self, id: &ViewerId, key: impl Into<String>, value: Value) -> bool {
        let key = key.into();
        self.with_record_mut(id, |record| insert_first(&mut record.metadata, key, value))
            .unwrap_or(false)
    }

    pub fn remove_metadata(&self, id: &ViewerId, key: &str) -> Option<Value> {
        self.with_record_mut(id, |record| record.metadata.remove(key))
            .flatten()
    }

    pub fn has_metadata(&self, id: &ViewerId, key: &str) -> bool {
        self.records
            .read()
            .get(id)
            .is_some_and(|record| record.metadata.contains_key(key))
    }

    pub fn metadata(&self, id: &ViewerId, key: &str) -> Option<Value> {
        self.records
            .read()
            .get(id)
            .and_then(|record| record.metadata.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockState, GameMode};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn viewer() -> ViewerInfo {
        ViewerInfo::new(ViewerId::random(), 1, "world")
    }

    #[test]
    fn empty_condition_set_admits_everyone() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        assert!(set.can_view(&viewer()));
    }

    #[test]
    fn failing_condition_has_no_side_effects() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        set.add_condition(|v| v.game_mode == GameMode::Creative);

        let calls = AtomicUsize::new(0);
        let v = viewer();
        assert!(set
            .attempt_add(&v, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .is_none());
        assert!(!set.is_viewer(&v.id));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn attempt_add_notifies_once() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        let calls = AtomicUsize::new(0);
        let v = viewer();

        set.attempt_add(&v, || {
            calls.fetch_add(1, Ordering::SeqCst);
        });
        set.with_record_mut(&v.id, |r| r.state = Some(BlockState::new("minecraft:gold_block")));

        let again = set
            .attempt_add(&v, || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(again.state, Some(BlockState::new("minecraft:gold_block")));
    }

    #[test]
    fn notify_may_reenter_the_set() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        let v = viewer();
        set.attempt_add(&v, || {
            assert!(set.is_viewer(&v.id));
        });
    }

    #[test]
    fn removal_is_idempotent() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        let v = viewer();
        set.add(v.id);

        let restores = AtomicUsize::new(0);
        let bump = || {
            restores.fetch_add(1, Ordering::SeqCst);
        };
        assert!(set.remove(&v.id, bump));
        assert!(!set.remove(&v.id, bump));
        assert_eq!(restores.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn override_beats_supplier() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        let id = ViewerId::random();
        set.add_with_supplier(id, Arc::new(|| Some(BlockState::new("minecraft:dirt"))));
        assert_eq!(
            set.get(&id).unwrap().resolved(),
            Some(BlockState::new("minecraft:dirt"))
        );

        set.with_record_mut(&id, |r| r.state = Some(BlockState::new("minecraft:stone")));
        assert_eq!(
            set.get(&id).unwrap().resolved(),
            Some(BlockState::new("minecraft:stone"))
        );
    }

    #[test]
    fn viewer_metadata_is_first_write_wins() {
        let set: ViewerSet<BlockState> = ViewerSet::new();
        let id = ViewerId::random();
        assert!(!set.add_metadata(&id, "k", json!(1)));

        set.add(id);
        assert!(set.add_metadata(&id, "k", json!(1)));
        assert!(!set.add_metadata(&id, "k", json!(2)));
        assert_eq!(set.metadata(&id, "k"), Some(json!(1)));
        assert!(set.has_metadata(&id, "k"));
        assert_eq!(set.remove_metadata(&id, "k"), Some(json!(1)));
        assert!(!set.has_metadata(&id, "k"));
    }
}
