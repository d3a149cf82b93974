// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The top-level index: a binary-searched array of segments sharing one
//! ART spill buffer (spec.md §3–§4.6).

use crate::art::Tree;
use crate::binary_search::partition_point;
use crate::config::IndexConfig;
use crate::key::IndexKey;
use crate::model::{epsilon_for, segment_partition};
use crate::segment::Segment;
use crate::value::IndexValue;
use std::sync::{Arc, RwLock};

/// A concurrent, in-memory, ordered index mapping fixed-width integer
/// keys to values.
///
/// See the crate-level docs for the overall design. An `Index` is always
/// built from an initial sorted key set via [`bulk_load`](Self::bulk_load);
/// the segment array then grows organically (new trailing segments, and
/// per-segment expansions) as further keys are inserted.
pub struct Index<K, V> {
    config: IndexConfig,
    tree: Tree<K, V>,
    segments: RwLock<Vec<Arc<Segment<K, V>>>>,
}

impl<K: IndexKey, V: IndexValue> Index<K, V> {
    /// Builds an index from a sorted, deduplicated `(key, value)` slice,
    /// using [`IndexConfig::default`] (spec.md §4.1, §4.6).
    ///
    /// # Panics
    ///
    /// Panics if `pairs` is not strictly increasing by key. A bulk-load
    /// seeing non-monotone keys has no recovery path (spec.md §4.6, §6,
    /// §7: "terminate the process"), the same way the original's
    /// `RT_ASSERT` aborts via `exit(0)` rather than returning an error
    /// (`alt_index.h:21-26,871`).
    pub fn bulk_load(pairs: &[(K, V)]) -> Self {
        Self::bulk_load_with_config(pairs, IndexConfig::default())
    }

    /// As [`bulk_load`](Self::bulk_load), with an explicit [`IndexConfig`].
    ///
    /// # Panics
    ///
    /// Panics if `pairs` is not strictly increasing by key; see
    /// [`bulk_load`](Self::bulk_load).
    pub fn bulk_load_with_config(pairs: &[(K, V)], config: IndexConfig) -> Self {
        assert!(!pairs.is_empty(), "bulk_load requires at least one pair");

        for (i, window) in pairs.windows(2).enumerate() {
            assert!(
                window[1].0 > window[0].0,
                "bulk_load keys are not strictly increasing at index {}",
                i + 1
            );
        }

        let keys: Vec<K> = pairs.iter().map(|(k, _)| *k).collect();
        let epsilon = epsilon_for(keys.len(), config.gpl_epsilon_divisor);
        let bounds = segment_partition(&keys, epsilon);

        let tree = Tree::new(
            config.fast_pointer_buffer_capacity,
            config.max_stored_prefix_length,
        );

        let mut offset = 0;
        let mut segments = Vec::with_capacity(bounds.len());
        for (i, bound) in bounds.iter().enumerate() {
            let model = bound.model();
            let capacity = capacity_for(bound.num_items, config.slot_array_growth);
            // Fast pointers cache the LCA of a segment's own first key and
            // the *next* segment's first key, so any later-inserted key
            // anywhere in the predicted range `[first_key, next_first_key)`
            // hits the same node, not just the keys actually loaded
            // (`alt_index.h::buildFastPointer`). The last segment has no
            // successor to pair with, so it reuses buffer index 0, exactly
            // as the original's `buildFastPointer` does; `get` falls back
            // to a root descent if that index isn't registered.
            let fast_pointer_index = match bounds.get(i + 1) {
                Some(next) => tree.build_fast_pointer(bound.first_key, next.first_key),
                None => 0,
            };

            let segment = Segment::new(bound.first_key, model, capacity, fast_pointer_index);
            for (key, value) in &pairs[offset..offset + bound.num_items] {
                segment.insert(*key, *value, &tree);
            }
            segments.push(Arc::new(segment));
            offset += bound.num_items;
        }

        Self {
            config,
            tree,
            segments: RwLock::new(segments),
        }
    }

    /// Looks up `key` (spec.md §4.3).
    pub fn find(&self, key: K) -> Option<V> {
        self.segment_for(key).find(key, &self.tree)
    }

    /// Inserts or overwrites `key` -> `value` (spec.md §4.3).
    pub fn insert(&self, key: K, value: V) {
        let segment = self.segment_for(key);
        segment.insert(key, value, &self.tree);
        self.reconfigure_if_needed(&segment);
    }

    /// Overwrites `key` -> `value` if it exists, otherwise inserts it
    /// (spec.md §4.3 `update`).
    pub fn update(&self, key: K, value: V) {
        let segment = self.segment_for(key);
        segment.update(key, value, &self.tree);
    }

    /// Removes `key`, returning whether it was present (spec.md §4.3).
    pub fn remove(&self, key: K) -> bool {
        self.segment_for(key).remove(key, &self.tree)
    }

    /// Collects up to `len` entries with key >= `start`, in ascending
    /// order, appending them to `out` (spec.md §4.4).
    pub fn range_scan(&self, out: &mut Vec<(K, V)>, start: K, len: usize) {
        if len == 0 {
            return;
        }

        let segments = self.segments.read().expect("segments lock poisoned");
        let start_idx = segment_index_for(&segments, start);

        let mut candidates = Vec::new();
        for segment in &segments[start_idx..] {
            segment.collect_slots(start, &mut candidates);
        }
        drop(segments);

        self.tree.range_scan(start, len * 2 + 16, &mut candidates);

        candidates.sort_unstable_by_key(|(k, _)| *k);
        candidates.dedup_by_key(|(k, _)| *k);

        out.extend(candidates.into_iter().take(len));
    }

    fn segment_for(&self, key: K) -> Arc<Segment<K, V>> {
        let segments = self.segments.read().expect("segments lock poisoned");
        let idx = segment_index_for(&segments, key);
        Arc::clone(&segments[idx])
    }

    /// After a successful insert, checks whether the segment it landed
    /// in needs a fresh expansion, a trailing sentinel segment, or an
    /// eager drain into its already-installed expansion (spec.md §4.4).
    fn reconfigure_if_needed(&self, segment: &Arc<Segment<K, V>>) {
        if segment.needs_expansion() {
            segment.install_expansion_if_absent();
            self.append_trailing_sentinel_if_tail(segment);
        }
        if segment.needs_eager_drain() {
            self.drain_and_promote(segment);
        }
    }

    /// If `segment` is currently the last entry in the array, appends a
    /// fresh segment covering the key range just past it, reusing its
    /// model and capacity verbatim (spec.md §4.4, grounded in
    /// `alt_index.h::insert`'s "last gpl model" branch: the appended
    /// segment is a safety valve, not a well-fitted model, so it carries
    /// over its predecessor's `(a, b)` unchanged).
    fn append_trailing_sentinel_if_tail(&self, segment: &Arc<Segment<K, V>>) {
        let mut segments = self.segments.write().expect("segments lock poisoned");
        let is_tail = segments.last().is_some_and(|s| Arc::ptr_eq(s, segment));
        if !is_tail {
            return;
        }

        let model = segment.model;
        let new_first_key_f64 = segment.first_key.as_f64() + (segment.num_items as f64) / model.a;
        let new_first_key = K::from_f64_round(new_first_key_f64);
        let fast_pointer_index = self.tree.build_fast_pointer(segment.first_key, new_first_key);

        let sentinel = Segment::new(new_first_key, model, segment.num_items, fast_pointer_index);
        segments.push(Arc::new(sentinel));
    }

    /// Drains a fully-saturated segment's remaining slot-resident data
    /// into its expansion, then replaces its array entry with that
    /// expansion directly, dropping a level of indirection (spec.md
    /// §4.4, `alt_index.h::insert`'s `nodes[node_pos] = nodes[node_pos]->expandNode`).
    fn drain_and_promote(&self, segment: &Arc<Segment<K, V>>) {
        let Some(expansion) = segment.expansion_arc() else {
            return;
        };
        segment.drain_into(&expansion, &self.tree);

        let mut segments = self.segments.write().expect("segments lock poisoned");
        if let Some(slot) = segments.iter_mut().find(|s| Arc::ptr_eq(s, segment)) {
            *slot = expansion;
        }
    }

    /// The error bound GPL used to build this index's initial segments.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }
}

/// Computes a segment's slot-array capacity from its exact key count and
/// the configured growth factor `g` (spec.md §3: `num_items = len * (1 + g)`).
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn capacity_for(num_keys: usize, g: f64) -> usize {
    ((num_keys as f64) * (1.0 + g)).ceil().max(1.0) as usize
}

/// Finds the index of the last segment whose `first_key <= key`
/// (spec.md §4.3, grounded in `alt_index.h`'s `binary_search` over
/// `node_keys`).
fn segment_index_for<K: IndexKey, V>(segments: &[Arc<Segment<K, V>>], key: K) -> usize {
    partition_point(segments, |segment| segment.first_key <= key).saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "not strictly increasing")]
    fn bulk_load_rejects_non_monotonic_keys() {
        let pairs = [(1u64, 10u64), (1, 20)];
        let _ = Index::bulk_load(&pairs);
    }

    #[test]
    fn bulk_load_then_find_every_key() {
        let pairs: Vec<(u64, u64)> = (0..2_000).map(|i| (i, i + 1)).collect();
        let index = Index::bulk_load(&pairs);
        for i in 0..2_000 {
            assert_eq!(index.find(i), Some(i + 1));
        }
        assert_eq!(index.find(2_000), None);
    }

    #[test]
    fn insert_new_key_past_initial_range() {
        let pairs: Vec<(u64, u64)> = (0..100).map(|i| (i, i)).collect();
        let index = Index::bulk_load(&pairs);
        index.insert(1_000_000, 42);
        assert_eq!(index.find(1_000_000), Some(42));
    }

    #[test]
    fn overwrite_via_insert() {
        let pairs = [(1u64, 10u64), (2, 20), (3, 30)];
        let index = Index::bulk_load(&pairs);
        index.insert(2, 200);
        assert_eq!(index.find(2), Some(200));
    }

    #[test]
    fn remove_then_reinsert() {
        let pairs: Vec<(u64, u64)> = (0..50).map(|i| (i, i)).collect();
        let index = Index::bulk_load(&pairs);
        assert!(index.remove(10));
        assert_eq!(index.find(10), None);
        index.insert(10, 999);
        assert_eq!(index.find(10), Some(999));
    }

    #[test]
    fn range_scan_collects_ascending_entries() {
        let pairs: Vec<(u64, u64)> = (0..1_000).map(|i| (i, i)).collect();
        let index = Index::bulk_load(&pairs);
        let mut out = Vec::new();
        index.range_scan(&mut out, 500, 10);
        assert_eq!(out.len(), 10);
        let keys: Vec<u64> = out.iter().map(|(k, _)| *k).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert_eq!(keys[0], 500);
    }

    #[test]
    fn insert_drives_segment_to_expand_and_trailing_sentinel() {
        let pairs: Vec<(u64, u64)> = (0..8).map(|i| (i * 10, i)).collect();
        let index = Index::bulk_load_with_config(
            &pairs,
            IndexConfig::default().slot_array_growth(0.1),
        );

        for i in 0..200u64 {
            index.insert(1_000 + i, i);
        }
        for i in 0..200u64 {
            assert_eq!(index.find(1_000 + i), Some(i));
        }
        for (k, v) in &pairs {
            assert_eq!(index.find(*k), Some(*v));
        }
    }

    #[test]
    fn concurrent_disjoint_inserts() {
        use std::thread;

        let pairs: Vec<(u64, u64)> = (0..16).map(|i| (i * 1000, i)).collect();
        let index = Arc::new(Index::bulk_load(&pairs));

        thread::scope(|scope| {
            for t in 0..12u64 {
                let index = Arc::clone(&index);
                scope.spawn(move || {
                    for i in 0..200u64 {
                        let key = 100_000 + t * 1_000 + i;
                        index.insert(key, key);
                    }
                });
            }
        });

        for t in 0..12u64 {
            for i in 0..200u64 {
                let key = 100_000 + t * 1_000 + i;
                assert_eq!(index.find(key), Some(key));
            }
        }
    }
}
