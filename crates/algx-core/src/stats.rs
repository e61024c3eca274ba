//! # Statistics
//!
//! Small, bounded structures the statistics subsystem maintains per entity and
//! per column, and the manager that owns them.
//!
//! ## Bounded occurrence map
//!
//! [`BoundedOccurrenceMap`] counts occurrences of keys in an ordered map whose
//! size never exceeds its capacity. Eviction is by **key order**, not by count,
//! and it differs between the single and the bulk operations:
//!
//! - `put` evicts the *smallest* key once the map is over capacity;
//! - `put_all` and `set_all` evict from the *largest* end.
//!
//! Keeping the smallest keys on bulk load and the largest on incremental updates
//! is the established behavior and is reproduced as is.
//!
//! ## Running extrema
//!
//! [`AggregateKind`] carries the sign a running `MIN` or `MAX` statistic uses to
//! decide whether a freshly observed value replaces the tracked one.
//!
//! ## Statistics manager
//!
//! [`StatisticsManager`] keeps row counts per entity and a [`ColumnStatistic`]
//! per `(entity, column)`. It implements [`StatisticsOracle`] and is the usual
//! second tier of an entity handle's row-count fallback. Updates are serialized
//! behind a `parking_lot` lock so the manager can be shared between planners.

use crate::catalog::StatisticsOracle;
use crate::entity::EntityId;
use crate::rex::ScalarValue;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

/// Selectivity used when nothing better is known about a predicate.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Number of most-observed values tracked per column by default.
pub const DEFAULT_TOP_K: usize = 10;

/// Fixed-capacity ordered map from key to occurrence count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundedOccurrenceMap<K: Ord> {
    entries: BTreeMap<K, u64>,
    capacity: usize,
}

impl<K: Ord + Clone> BoundedOccurrenceMap<K> {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<u64> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Sum of all tracked occurrence counts.
    pub fn total(&self) -> u64 {
        self.entries.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &u64)> {
        self.entries.iter()
    }

    /// Count one occurrence of `key`. Over capacity, the smallest key goes.
    pub fn put(&mut self, key: K) {
        *self.entries.entry(key).or_insert(0) += 1;
        if self.entries.len() > self.capacity {
            self.entries.pop_first();
        }
    }

    /// Count one occurrence of each key, then trim from the largest end.
    pub fn put_all(&mut self, keys: impl IntoIterator<Item = K>) {
        for key in keys {
            *self.entries.entry(key).or_insert(0) += 1;
        }
        self.trim_largest();
    }

    /// Remove one occurrence of `key`; the entry disappears at zero.
    pub fn remove(&mut self, key: &K) {
        if let Some(count) = self.entries.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.entries.remove(key);
            }
        }
    }

    /// Replace the contents wholesale, then trim from the largest end.
    pub fn set_all(&mut self, entries: BTreeMap<K, u64>) {
        self.entries = entries;
        self.entries.retain(|_, count| *count > 0);
        self.trim_largest();
    }

    fn trim_largest(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_last();
        }
    }
}

/// Whether a running extremum prefers smaller or larger values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Min,
    Max,
}

impl AggregateKind {
    /// `-1` for `Min`, `+1` for `Max`.
    pub fn signum(self) -> i32 {
        match self {
            AggregateKind::Min => -1,
            AggregateKind::Max => 1,
        }
    }

    /// Whether a candidate comparing `ordering` against the current value
    /// should replace it.
    pub fn replaces(self, ordering: Ordering) -> bool {
        ordering as i32 == self.signum()
    }

    /// Whether `candidate` should replace `current`.
    pub fn prefers<T: Ord>(self, candidate: &T, current: &T) -> bool {
        self.replaces(candidate.cmp(current))
    }
}

/// Observed values of one column: extrema plus the most frequent values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnStatistic<T: Ord> {
    min: Option<T>,
    max: Option<T>,
    frequencies: BoundedOccurrenceMap<T>,
    observed: u64,
}

impl<T: Ord + Clone> ColumnStatistic<T> {
    pub fn new(top_k: usize) -> Self {
        Self {
            min: None,
            max: None,
            frequencies: BoundedOccurrenceMap::new(top_k),
            observed: 0,
        }
    }

    pub fn min(&self) -> Option<&T> {
        self.min.as_ref()
    }

    pub fn max(&self) -> Option<&T> {
        self.max.as_ref()
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn frequencies(&self) -> &BoundedOccurrenceMap<T> {
        &self.frequencies
    }

    pub fn observe(&mut self, value: T) {
        Self::update_extremum(&mut self.min, &value, AggregateKind::Min);
        Self::update_extremum(&mut self.max, &value, AggregateKind::Max);
        self.frequencies.put(value);
        self.observed += 1;
    }

    pub fn observe_all(&mut self, values: Vec<T>) {
        for value in &values {
            Self::update_extremum(&mut self.min, value, AggregateKind::Min);
            Self::update_extremum(&mut self.max, value, AggregateKind::Max);
        }
        self.observed += values.len() as u64;
        self.frequencies.put_all(values);
    }

    fn update_extremum(slot: &mut Option<T>, value: &T, kind: AggregateKind) {
        let replace = match slot {
            None => true,
            Some(current) => kind.prefers(value, current),
        };
        if replace {
            *slot = Some(value.clone());
        }
    }

    /// Estimated fraction of rows equal to `value`.
    pub fn equality_selectivity(&self, value: &T) -> f64 {
        if self.observed == 0 {
            return DEFAULT_FILTER_SELECTIVITY;
        }
        match self.frequencies.get(value) {
            Some(count) => count as f64 / self.observed as f64,
            None => {
                let outside = (self.min.as_ref().is_some_and(|m| value < m))
                    || (self.max.as_ref().is_some_and(|m| value > m));
                if outside {
                    0.0
                } else {
                    DEFAULT_FILTER_SELECTIVITY
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct ManagerState {
    row_counts: HashMap<EntityId, f64>,
    columns: HashMap<(EntityId, usize), ColumnStatistic<ScalarValue>>,
}

/// Per-entity row counts and per-column statistics.
#[derive(Debug)]
pub struct StatisticsManager {
    state: RwLock<ManagerState>,
    top_k: usize,
}

impl Default for StatisticsManager {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

impl StatisticsManager {
    pub fn new(top_k: usize) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            top_k,
        }
    }

    pub fn row_count(&self, id: EntityId) -> Option<f64> {
        self.state.read().row_counts.get(&id).copied()
    }

    pub fn set_row_count(&self, id: EntityId, row_count: f64) {
        self.state.write().row_counts.insert(id, row_count);
    }

    /// Apply a row delta. Removing from an unknown entity records zero.
    pub fn update_row_count(&self, id: EntityId, delta: u64, adding: bool) {
        let mut state = self.state.write();
        let current = state.row_counts.get(&id).copied();
        let updated = match (current, adding) {
            (Some(n), true) => n + delta as f64,
            (None, true) => delta as f64,
            (Some(n), false) => (n - delta as f64).max(0.0),
            (None, false) => 0.0,
        };
        trace!(entity = %id, updated, "row count updated");
        state.row_counts.insert(id, updated);
    }

    /// Fold an index size into the row count: the mean of the two when a count
    /// is known, the index size otherwise.
    pub fn set_index_size(&self, id: EntityId, index_size: u64) {
        let mut state = self.state.write();
        let updated = match state.row_counts.get(&id) {
            Some(n) => (n + index_size as f64) / 2.0,
            None => index_size as f64,
        };
        state.row_counts.insert(id, updated);
    }

    pub fn delete_entity(&self, id: EntityId) {
        let mut state = self.state.write();
        state.row_counts.remove(&id);
        state.columns.retain(|(entity, _), _| *entity != id);
    }

    pub fn observe(&self, id: EntityId, column: usize, value: ScalarValue) {
        let top_k = self.top_k;
        self.state
            .write()
            .columns
            .entry((id, column))
            .or_insert_with(|| ColumnStatistic::new(top_k))
            .observe(value);
    }

    pub fn column(&self, id: EntityId, column: usize) -> Option<ColumnStatistic<ScalarValue>> {
        self.state.read().columns.get(&(id, column)).cloned()
    }
}

impl StatisticsOracle for StatisticsManager {
    fn row_count_for(&self, id: EntityId) -> Option<f64> {
        self.row_count(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_evicts_smallest_key() {
        let mut map = BoundedOccurrenceMap::new(3);
        for k in [5, 3, 9, 7] {
            map.put(k);
        }
        assert_eq!(map.len(), 3);
        assert!(!map.contains(&3));
        assert!(map.contains(&9));
    }

    #[test]
    fn test_put_all_evicts_largest_keys() {
        let mut map = BoundedOccurrenceMap::new(3);
        map.put_all([5, 3, 9, 7, 1]);
        assert_eq!(map.len(), 3);
        let keys: Vec<i32> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 3, 5]);
    }

    #[test]
    fn test_single_and_bulk_eviction_differ() {
        let keys = [4, 2, 8, 6];
        let mut single = BoundedOccurrenceMap::new(3);
        for k in keys {
            single.put(k);
        }
        let mut bulk = BoundedOccurrenceMap::new(3);
        bulk.put_all(keys);
        assert_ne!(single, bulk);
        assert!(!single.contains(&2));
        assert!(!bulk.contains(&8));
    }

    #[test]
    fn test_remove_decrements_then_deletes() {
        let mut map = BoundedOccurrenceMap::new(4);
        map.put("a");
        map.put("a");
        map.remove(&"a");
        assert_eq!(map.get(&"a"), Some(1));
        map.remove(&"a");
        assert!(!map.contains(&"a"));
        map.remove(&"missing");
        assert!(map.is_empty());
    }

    #[test]
    fn test_set_all_replaces_and_trims() {
        let mut map = BoundedOccurrenceMap::new(2);
        map.put(100);
        map.set_all(BTreeMap::from([(1, 3), (2, 1), (3, 7)]));
        assert_eq!(map.len(), 2);
        assert!(!map.contains(&100));
        assert!(!map.contains(&3));
        assert_eq!(map.total(), 4);
    }

    #[test]
    fn test_aggregate_kind_replacement() {
        assert_eq!(AggregateKind::Min.signum(), -1);
        assert_eq!(AggregateKind::Max.signum(), 1);
        assert!(AggregateKind::Min.prefers(&1, &2));
        assert!(!AggregateKind::Min.prefers(&2, &2));
        assert!(AggregateKind::Max.prefers(&3, &2));
    }

    #[test]
    fn test_column_statistic_tracks_extrema_and_selectivity() {
        let mut stat = ColumnStatistic::new(2);
        stat.observe_all(vec![4, 1, 1, 9]);
        assert_eq!(stat.min(), Some(&1));
        assert_eq!(stat.max(), Some(&9));
        assert_eq!(stat.equality_selectivity(&1), 0.5);
        assert_eq!(stat.equality_selectivity(&100), 0.0);
        assert_eq!(stat.equality_selectivity(&9), DEFAULT_FILTER_SELECTIVITY);
    }

    #[test]
    fn test_manager_row_count_updates() {
        let manager = StatisticsManager::default();
        let id = EntityId(1);
        manager.update_row_count(id, 10, true);
        manager.update_row_count(id, 4, true);
        assert_eq!(manager.row_count_for(id), Some(14.0));
        manager.update_row_count(id, 20, false);
        assert_eq!(manager.row_count(id), Some(0.0));

        let unknown = EntityId(2);
        manager.update_row_count(unknown, 5, false);
        assert_eq!(manager.row_count(unknown), Some(0.0));
    }

    #[test]
    fn test_manager_index_size_and_delete() {
        let manager = StatisticsManager::default();
        let id = EntityId(3);
        manager.set_index_size(id, 50);
        assert_eq!(manager.row_count(id), Some(50.0));
        manager.set_index_size(id, 150);
        assert_eq!(manager.row_count(id), Some(100.0));

        manager.observe(id, 0, ScalarValue::Int64(1));
        assert!(manager.column(id, 0).is_some());
        manager.delete_entity(id);
        assert_eq!(manager.row_count(id), None);
        assert!(manager.column(id, 0).is_none());
    }
}
