// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The fast-pointer buffer (spec.md §4.5, §4.7).
//!
//! Each segment caches an index into this append-only table, pointing
//! at the ART node that is the least common ancestor of every key the
//! segment could spill into the tree. A probe that misses its segment's
//! slot array can jump straight to that node instead of re-descending
//! from the ART root.
//!
//! Entries are only ever appended during bulk-load or trailing-segment
//! creation, which spec.md §5 scopes to a single-writer reconfiguration
//! boundary; an `RwLock` around the backing vector is therefore never
//! contended by point operations, which only ever call [`get`](FastPointerBuffer::get)
//! or [`rewrite`](FastPointerBuffer::rewrite).

use crate::art::node::Node;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};
use std::sync::RwLock;

/// A tiny exclusive spin lock, used only while an ART node growth
/// rewrites the node a fast-pointer entry refers to (grounded in
/// `concurrency.h`'s `spin_lock`).
#[derive(Debug, Default)]
struct SpinLock(AtomicBool);

impl SpinLock {
    fn lock(&self) {
        while self.0.swap(true, Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    fn unlock(&self) {
        self.0.store(false, Ordering::Release);
    }
}

struct Entry<K, V> {
    node: AtomicPtr<Node<K, V>>,
    lock: SpinLock,
}

/// Append-only table of cached ART subtree roots.
pub struct FastPointerBuffer<K, V> {
    entries: RwLock<Vec<Entry<K, V>>>,
}

impl<K, V> Default for FastPointerBuffer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FastPointerBuffer<K, V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(Vec::with_capacity(capacity)),
        }
    }

    /// Returns the existing index for `node` if already registered,
    /// otherwise appends a new entry (spec.md §4.5: "idempotent by
    /// identity").
    pub fn push_idempotent(&self, node: *mut Node<K, V>) -> usize {
        {
            let entries = self.entries.read().expect("fast pointer buffer poisoned");
            for (i, entry) in entries.iter().enumerate() {
                if entry.node.load(Ordering::Acquire) == node {
                    return i;
                }
            }
        }
        let mut entries = self.entries.write().expect("fast pointer buffer poisoned");
        // Re-check under the write lock in case of a concurrent insert.
        for (i, entry) in entries.iter().enumerate() {
            if entry.node.load(Ordering::Acquire) == node {
                return i;
            }
        }
        entries.push(Entry {
            node: AtomicPtr::new(node),
            lock: SpinLock::default(),
        });
        entries.len() - 1
    }

    /// Returns the registered index for `node`, if any, by identity
    /// (spec.md §4.5: "if the mutated node was the segment's fast
    /// pointer..."; grounded in `FastPointerBuffer.h::getFastPointerIndex`).
    /// Called by the tree before retiring or reparenting a node so the
    /// caller can [`rewrite`](Self::rewrite) any entry that targeted it.
    pub fn find_index(&self, node: *mut Node<K, V>) -> Option<usize> {
        let entries = self.entries.read().expect("fast pointer buffer poisoned");
        entries
            .iter()
            .position(|entry| entry.node.load(Ordering::Acquire) == node)
    }

    /// Reads the node currently cached at `index`, or a null pointer if
    /// `index` isn't registered (the caller falls back to a root descent).
    pub fn get(&self, index: usize) -> *mut Node<K, V> {
        let entries = self.entries.read().expect("fast pointer buffer poisoned");
        entries
            .get(index)
            .map_or(std::ptr::null_mut(), |entry| entry.node.load(Ordering::Acquire))
    }

    /// Atomically rewrites the node at `index`, serialized against other
    /// rewrites of the same entry (used when the cached node is replaced
    /// by ART node growth).
    pub fn rewrite(&self, index: usize, node: *mut Node<K, V>) {
        let entries = self.entries.read().expect("fast pointer buffer poisoned");
        let entry = &entries[index];
        entry.lock.lock();
        entry.node.store(node, Ordering::Release);
        entry.lock.unlock();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("fast pointer buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy(tag: usize) -> *mut Node<u64, u64> {
        tag as *mut Node<u64, u64>
    }

    #[test]
    fn push_idempotent_reuses_existing_index_by_identity() {
        let buffer = FastPointerBuffer::<u64, u64>::new();
        let a = buffer.push_idempotent(dummy(1));
        let b = buffer.push_idempotent(dummy(2));
        let a_again = buffer.push_idempotent(dummy(1));
        assert_eq!(a, a_again);
        assert_ne!(a, b);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn get_on_unregistered_index_returns_null() {
        let buffer = FastPointerBuffer::<u64, u64>::new();
        assert!(buffer.get(0).is_null());
        buffer.push_idempotent(dummy(1));
        assert!(buffer.get(5).is_null());
    }

    #[test]
    fn find_index_locates_registered_node_by_identity() {
        let buffer = FastPointerBuffer::<u64, u64>::new();
        let idx = buffer.push_idempotent(dummy(7));
        assert_eq!(buffer.find_index(dummy(7)), Some(idx));
        assert_eq!(buffer.find_index(dummy(8)), None);
    }

    #[test]
    fn rewrite_replaces_entry_observed_via_get_and_find_index() {
        let buffer = FastPointerBuffer::<u64, u64>::new();
        let idx = buffer.push_idempotent(dummy(1));
        buffer.rewrite(idx, dummy(2));
        assert_eq!(buffer.get(idx), dummy(2));
        assert_eq!(buffer.find_index(dummy(1)), None);
        assert_eq!(buffer.find_index(dummy(2)), Some(idx));
    }

    #[test]
    fn is_empty_tracks_entry_count() {
        let buffer = FastPointerBuffer::<u64, u64>::new();
        assert!(buffer.is_empty());
        buffer.push_idempotent(dummy(1));
        assert!(!buffer.is_empty());
    }
}
