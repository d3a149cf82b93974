// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Segments: one linear model plus a slot array, with lazy expansion
//! under write pressure (spec.md §4.3, §4.4).

pub mod slot;

use crate::art::Tree;
use crate::key::IndexKey;
use crate::model::LinearModel;
use crate::value::IndexValue;
use crossbeam_utils::Backoff;
use slot::Item;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

/// One partition of the key domain: a linear model predicting slot
/// offsets, a slot array serving most reads/writes, and (once
/// saturated) a reference to a replacement segment of double capacity.
pub struct Segment<K, V> {
    pub first_key: K,
    pub model: LinearModel,
    pub num_items: usize,
    pub fast_pointer_index: usize,
    slots: Vec<Item<K, V>>,
    num_inserts: AtomicUsize,
    // `OnceLock` gives us "install exactly once" for free, standing in
    // for the original's `allocating_expansion` flag plus a raw pointer
    // CAS (spec.md §4.4). `Arc`, rather than `Box`, lets the owning
    // index lift a fully-drained expansion out of its parent and install
    // it directly into the segment array (see `Index`'s eager-drain
    // swap), without requiring unique ownership of the parent.
    expansion: OnceLock<Arc<Segment<K, V>>>,
}

impl<K: IndexKey, V: IndexValue> Segment<K, V> {
    pub fn new(first_key: K, model: LinearModel, num_items: usize, fast_pointer_index: usize) -> Self {
        assert!(num_items > 0, "a segment must have at least one slot");
        Self {
            first_key,
            model,
            num_items,
            fast_pointer_index,
            slots: (0..num_items).map(|_| Item::new_empty(K::zero(), V::sentinel())).collect(),
            num_inserts: AtomicUsize::new(0),
            expansion: OnceLock::new(),
        }
    }

    pub fn predict_slot(&self, key: K) -> usize {
        self.model.predict_clamped(key, self.num_items)
    }

    pub fn expansion(&self) -> Option<&Segment<K, V>> {
        self.expansion.get().map(std::convert::AsRef::as_ref)
    }

    /// Clones out a handle to the installed expansion, suitable for an
    /// owning index to promote directly into its segment array.
    pub fn expansion_arc(&self) -> Option<Arc<Segment<K, V>>> {
        self.expansion.get().cloned()
    }

    pub fn num_inserts(&self) -> usize {
        self.num_inserts.load(Ordering::Acquire)
    }

    /// Per-segment trigger: more successful writes than slots, and no
    /// expansion installed yet (spec.md §4.4).
    pub fn needs_expansion(&self) -> bool {
        self.expansion.get().is_none() && self.num_inserts() > self.num_items
    }

    /// Eager-drain trigger (spec.md §4.4: "When `num_inserts > 2 ·
    /// num_items`").
    pub fn needs_eager_drain(&self) -> bool {
        self.expansion.get().is_some() && self.num_inserts() > 2 * self.num_items
    }

    /// Builds and installs a double-capacity expansion if one isn't
    /// already present, returning it either way. Safe to call
    /// concurrently from multiple writers; exactly one build wins.
    pub fn install_expansion_if_absent(&self) -> &Segment<K, V> {
        if self.expansion.get().is_none() {
            let capacity = self.num_items * 2;
            let a = self.model.a * 2.0;
            let b = -a * self.first_key.as_f64();
            let built = Segment::new(self.first_key, LinearModel { a, b }, capacity, self.fast_pointer_index);
            let _ = self.expansion.set(Arc::new(built));
        }
        self.expansion
            .get()
            .expect("just installed or raced with another installer")
    }

    /// Evicts every occupied, non-tombstone slot into `target` (spec.md
    /// §4.4 eager drain: "for each occupied parent slot with non-zero
    /// key, evict into the expansion").
    pub fn drain_into(&self, target: &Segment<K, V>, tree: &Tree<K, V>) {
        for item in &self.slots {
            let backoff = Backoff::new();
            loop {
                let Some(snap) = item.snapshot() else {
                    backoff.spin();
                    continue;
                };
                if snap.empty || snap.key == K::zero() {
                    break;
                }
                if !item.check(snap.version) {
                    backoff.spin();
                    continue;
                }
                target.insert(snap.key, snap.value, tree);
                break;
            }
        }
    }

    /// `insert(k, v)` (spec.md §4.3), including overwrite-in-place when
    /// the predicted slot already holds `k`: the distilled steps only
    /// enumerate the miss paths (empty / sparse-recovered), which would
    /// leave a stale slot value observable by `find` if a caller
    /// re-inserts an existing key (see the bulk-load-then-overwrite
    /// scenario in the test suite). Falling through to the ART in that
    /// case, as the literal original C++ does, shadows the new value
    /// behind the slot's stale one since `find` always checks the slot
    /// first.
    pub fn insert(&self, key: K, value: V, tree: &Tree<K, V>) {
        let slot_idx = self.predict_slot(key);
        let item = &self.slots[slot_idx];
        let backoff = Backoff::new();

        if let Some(exp) = self.expansion() {
            // Dynamic retraining redirects every write to the expansion;
            // along the way, evict whatever this physical slot currently
            // holds so it isn't silently orphaned (mirrors `evictData` +
            // `insertToExpand`).
            loop {
                let Some(snap) = item.snapshot() else {
                    backoff.spin();
                    continue;
                };
                if snap.empty {
                    break;
                }
                let Some(_write) = item.upgrade(snap.version) else {
                    backoff.spin();
                    continue;
                };
                item.store(snap.key, snap.value, true);
                item.write_unlock();
                if snap.key != K::zero() && snap.key != key {
                    exp.insert(snap.key, snap.value, tree);
                }
                break;
            }
            exp.insert(key, value, tree);
            self.num_inserts.fetch_add(1, Ordering::AcqRel);
            return;
        }

        loop {
            let Some(snap) = item.snapshot() else {
                backoff.spin();
                continue;
            };

            if snap.empty || snap.key == K::zero() || snap.key == key {
                let Some(_write) = item.upgrade(snap.version) else {
                    backoff.spin();
                    continue;
                };
                item.store(key, value, false);
                item.write_unlock();
                break;
            }

            tree.put(key, value);
            break;
        }

        self.num_inserts.fetch_add(1, Ordering::AcqRel);
    }

    /// `find(k)` (spec.md §4.3).
    ///
    /// A miss on this segment's own slot array is only a real miss (no
    /// ART fallback) at the root of an expansion chain: a key that
    /// collided into the ART before this segment's expansion existed
    /// must still be reachable once that slot gets evicted and reads
    /// empty. Once we've recursed into at least one expansion, an empty
    /// or mismatched slot always falls through to the ART.
    pub fn find(&self, key: K, tree: &Tree<K, V>) -> Option<V> {
        self.find_at(key, tree, true)
    }

    fn find_at(&self, key: K, tree: &Tree<K, V>, is_root: bool) -> Option<V> {
        let slot_idx = self.predict_slot(key);
        let item = &self.slots[slot_idx];
        let backoff = Backoff::new();

        loop {
            let Some(snap) = item.snapshot() else {
                backoff.spin();
                continue;
            };

            if snap.empty {
                return match self.expansion() {
                    Some(exp) => exp.find_at(key, tree, false),
                    None if is_root => None,
                    None => tree.get_via_fast_pointer(key, self.fast_pointer_index),
                };
            }

            if snap.key == key {
                if !item.check(snap.version) {
                    backoff.spin();
                    continue;
                }
                return Some(snap.value);
            }

            return match self.expansion() {
                Some(exp) => exp.find_at(key, tree, false),
                None => tree.get_via_fast_pointer(key, self.fast_pointer_index),
            };
        }
    }

    /// `update(k, v)` (spec.md §4.3).
    pub fn update(&self, key: K, value: V, tree: &Tree<K, V>) {
        if let Some(exp) = self.expansion() {
            exp.update(key, value, tree);
            return;
        }

        let slot_idx = self.predict_slot(key);
        let item = &self.slots[slot_idx];
        let backoff = Backoff::new();

        loop {
            let Some(snap) = item.snapshot() else {
                backoff.spin();
                continue;
            };
            if !snap.empty && snap.key == key {
                let Some(_write) = item.upgrade(snap.version) else {
                    backoff.spin();
                    continue;
                };
                item.store(key, value, false);
                item.write_unlock();
                return;
            }
            break;
        }

        tree.put(key, value);
    }

    /// `remove(k)` (spec.md §4.3).
    pub fn remove(&self, key: K, tree: &Tree<K, V>) -> bool {
        let slot_idx = self.predict_slot(key);
        let item = &self.slots[slot_idx];
        let backoff = Backoff::new();

        loop {
            let Some(snap) = item.snapshot() else {
                backoff.spin();
                continue;
            };
            if !snap.empty && snap.key == key {
                let Some(_write) = item.upgrade(snap.version) else {
                    backoff.spin();
                    continue;
                };
                item.clear_key(K::zero());
                item.write_unlock();
                return true;
            }
            break;
        }

        if let Some(exp) = self.expansion() {
            return exp.remove(key, tree);
        }
        tree.remove(key)
    }

    /// Appends this segment's (and any expansion's) slot-resident
    /// entries with key >= `start` to `out`, unsorted. The caller is
    /// responsible for merging with ART-resident entries and sorting.
    pub fn collect_slots(&self, start: K, out: &mut Vec<(K, V)>) {
        if let Some(exp) = self.expansion() {
            exp.collect_slots(start, out);
            return;
        }

        for item in &self.slots {
            if let Some(snap) = item.snapshot() {
                if !snap.empty && snap.key != K::zero() && snap.key >= start && item.check(snap.version) {
                    out.push((snap.key, snap.value));
                }
            }
        }
    }
}
