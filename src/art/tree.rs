// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The optimistic-lock-coupled adaptive radix tree.
//!
//! Grounded in `OptimizedART/Tree.cpp`'s `lookup`/`insert`/`remove` and
//! `lookupRange`: every descent re-validates the parent's version after
//! reading a child pointer (lock coupling), and every write takes its
//! locks at the last possible moment so readers are never blocked
//! (spec.md §4.2, §6).
//!
//! The root is always allocated as an [`N256`](super::node::Body::N256),
//! so it never needs to grow and no node ever needs replacing without a
//! parent to repoint (matching the original's `root(new N256(...))`).

use crate::art::fast_pointer::FastPointerBuffer;
use crate::art::node::{
    is_leaf, leaf_to_raw, node_to_raw, raw_to_leaf, raw_to_node, Body, Leaf, Node, EMPTY_MARKER,
    MAX_PREFIX_LEN,
};
use crate::epoch::pin_guard;
use crate::key::IndexKey;
use crate::value::IndexValue;
use crossbeam_utils::Backoff;
use std::sync::atomic::Ordering;

enum PrefixCheck {
    Match { new_level: usize },
    NoMatch,
}

fn check_prefix<K, V>(node: &Node<K, V>, key: &[u8], level: usize) -> PrefixCheck {
    let prefix_len = node.prefix_len as usize;
    if prefix_len == 0 {
        return PrefixCheck::Match { new_level: level };
    }
    let stored = node.stored_prefix();
    let compare_len = stored.len().min(key.len().saturating_sub(level));
    for (i, &b) in stored[..compare_len].iter().enumerate() {
        if key[level + i] != b {
            return PrefixCheck::NoMatch;
        }
    }
    // Bytes beyond MAX_PREFIX_LEN (only possible for key types wider than
    // this tree currently ships) are matched optimistically: assumed
    // equal here, verified against the full leaf key once one is found.
    PrefixCheck::Match {
        new_level: level + prefix_len,
    }
}

/// The ART-backed spill buffer for one index.
pub struct Tree<K, V> {
    root: Box<Node<K, V>>,
    fast_pointers: FastPointerBuffer<K, V>,
    /// `IndexConfig::max_stored_prefix_length`, clamped to `MAX_PREFIX_LEN`;
    /// every node this tree allocates stores at most this many prefix
    /// bytes inline (spec.md §4.5).
    max_prefix_len: usize,
}

impl<K: IndexKey, V: IndexValue> Default for Tree<K, V> {
    fn default() -> Self {
        Self::new(256, MAX_PREFIX_LEN)
    }
}

impl<K: IndexKey, V: IndexValue> Tree<K, V> {
    pub fn new(fast_pointer_capacity: usize, max_stored_prefix_length: usize) -> Self {
        let max_prefix_len = max_stored_prefix_length.min(MAX_PREFIX_LEN);
        Self {
            root: Box::new(Node {
                lock: crate::lock::OptLock::new(),
                prefix: [0; MAX_PREFIX_LEN],
                prefix_len: 0,
                stored_prefix_cap: max_prefix_len as u8,
                match_level: 0,
                body: Body::N256 {
                    children: std::array::from_fn(|_| std::sync::atomic::AtomicPtr::new(std::ptr::null_mut())),
                    count: 0,
                },
            }),
            fast_pointers: FastPointerBuffer::with_capacity(fast_pointer_capacity),
            max_prefix_len,
        }
    }

    fn root_ptr(&self) -> *mut Node<K, V> {
        (&*self.root as *const Node<K, V>).cast_mut()
    }

    /// Looks up `key`, restarting on any optimistic-lock conflict.
    pub fn get(&self, key: K) -> Option<V> {
        let bytes = key.to_be_bytes_vec();
        let _guard = pin_guard();
        let backoff = Backoff::new();

        'restart: loop {
            let mut node = self.root_ptr();
            let mut node_ref = unsafe { &*node };
            let mut version = match node_ref.lock.read_lock() {
                Some(v) => v,
                None => {
                    backoff.spin();
                    continue 'restart;
                }
            };
            let mut level = 0usize;

            loop {
                match check_prefix(node_ref, &bytes, level) {
                    PrefixCheck::NoMatch => {
                        if !node_ref.lock.check(version) {
                            backoff.spin();
                            continue 'restart;
                        }
                        return None;
                    }
                    PrefixCheck::Match { new_level } => level = new_level,
                }

                if level >= bytes.len() {
                    if !node_ref.lock.check(version) {
                        backoff.spin();
                        continue 'restart;
                    }
                    return None;
                }

                let byte = bytes[level];
                let child = node_ref.get_child(byte);
                if !node_ref.lock.check(version) {
                    backoff.spin();
                    continue 'restart;
                }

                if child.is_null() {
                    return None;
                }

                if is_leaf(child) {
                    let leaf = unsafe { &*raw_to_leaf::<K, V>(child) };
                    return if leaf.key == key { Some(leaf.value) } else { None };
                }

                let next = unsafe { raw_to_node::<K, V>(child) };
                let next_ref = unsafe { &*next };
                let next_version = match next_ref.lock.read_lock() {
                    Some(v) => v,
                    None => {
                        backoff.spin();
                        continue 'restart;
                    }
                };
                if !node_ref.lock.check(version) {
                    backoff.spin();
                    continue 'restart;
                }

                node = next;
                node_ref = next_ref;
                version = next_version;
                level += 1;
            }
        }
    }

    /// Inserts or overwrites `key` -> `value`.
    pub fn put(&self, key: K, value: V) {
        let bytes = key.to_be_bytes_vec();
        let leaf = Box::new(Leaf { key, value });
        let _guard = pin_guard();
        let backoff = Backoff::new();

        'restart: loop {
            let mut node = self.root_ptr();
            let mut node_ref = unsafe { &*node };
            let mut version = match node_ref.lock.read_lock() {
                Some(v) => v,
                None => {
                    backoff.spin();
                    continue 'restart;
                }
            };
            let mut level = 0usize;

            loop {
                match check_prefix(node_ref, &bytes, level) {
                    PrefixCheck::NoMatch => {
                        // Prefix diverges: split this node under a new N4.
                        let Some(write_version) = node_ref.lock.upgrade_to_write_lock(version) else {
                            backoff.spin();
                            continue 'restart;
                        };

                        let stored = node_ref.stored_prefix();
                        let mut divergence = 0;
                        while divergence < stored.len()
                            && level + divergence < bytes.len()
                            && stored[divergence] == bytes[level + divergence]
                        {
                            divergence += 1;
                        }

                        let shared_prefix = &stored[..divergence];
                        let node_byte = stored[divergence];
                        let key_byte = bytes[level + divergence];

                        // The new N4 takes over `node`'s old slot in its
                        // parent, so it sits at the same absolute depth
                        // `node` did (`N4(..., node->getMatchLevel())`,
                        // `Tree.cpp:645`).
                        let mut new_n4 = Node::new_n4(shared_prefix, self.max_prefix_len, node_ref.match_level);
                        let remaining_old_prefix_len = node_ref.prefix_len as usize - divergence - 1;
                        // SAFETY: we hold the write lock; no reader can observe
                        // the torn intermediate state before the CAS-equivalent
                        // publish below (the parent's child slot swap).
                        unsafe {
                            let node_mut = &mut *(node as *mut Node<K, V>);
                            let shift = divergence + 1;
                            node_mut.prefix.copy_within(shift..shift + remaining_old_prefix_len.min(MAX_PREFIX_LEN.saturating_sub(shift)), 0);
                            node_mut.prefix_len = remaining_old_prefix_len as u32;
                            node_mut.match_level += divergence as u32 + 1;
                        }
                        new_n4.insert_child(node_byte, node as *mut _ as *mut u8);
                        new_n4.insert_child(key_byte, leaf_to_raw(leaf));
                        let new_n4_ptr = Box::into_raw(Box::new(new_n4));

                        // `node` keeps living (reparented under the new N4),
                        // but it no longer presents the full prefix a fast
                        // pointer may have cached against it; repoint that
                        // entry at the N4, which now carries the shared
                        // prefix in its place (spec.md §4.5 insert case 1).
                        if let Some(idx) = self.fast_pointers.find_index(node) {
                            self.fast_pointers.rewrite(idx, new_n4_ptr);
                        }

                        node_ref.lock.write_unlock();
                        let _ = write_version;
                        return self.publish_replacement(&bytes, level, node, new_n4_ptr, &backoff);
                    }
                    PrefixCheck::Match { new_level } => level = new_level,
                }

                if level >= bytes.len() {
                    // A key that is a strict prefix of another key cannot
                    // occur: IndexKey is fixed-width, so this is unreachable
                    // for well-formed callers.
                    if !node_ref.lock.check(version) {
                        backoff.spin();
                        continue 'restart;
                    }
                    return;
                }

                let byte = bytes[level];
                let child = node_ref.get_child(byte);
                if !node_ref.lock.check(version) {
                    backoff.spin();
                    continue 'restart;
                }

                if child.is_null() {
                    let Some(_write_version) = node_ref.lock.upgrade_to_write_lock(version) else {
                        backoff.spin();
                        continue 'restart;
                    };

                    if node_ref.is_full() {
                        let grown = Box::into_raw(Box::new(node_ref.grown()));
                        // If an upper layer cached `node` as a fast pointer,
                        // repoint it at the grown replacement before `node`
                        // is retired (spec.md §4.5 insert case 2).
                        if let Some(idx) = self.fast_pointers.find_index(node) {
                            self.fast_pointers.rewrite(idx, grown);
                        }
                        node_ref.lock.write_unlock_obsolete();
                        unsafe {
                            let guard = pin_guard();
                            let old = node;
                            guard.defer_unchecked(move || {
                                drop(Box::from_raw(old));
                            });
                        }
                        self.publish_replacement(&bytes, level.saturating_sub(1), node, grown, &backoff);
                        continue 'restart;
                    }

                    unsafe {
                        let node_mut = &mut *(node as *mut Node<K, V>);
                        node_mut.insert_child(byte, leaf_to_raw(leaf));
                    }
                    node_ref.lock.write_unlock();
                    return;
                }

                if is_leaf(child) {
                    let Some(_write_version) = node_ref.lock.upgrade_to_write_lock(version) else {
                        backoff.spin();
                        continue 'restart;
                    };

                    let existing = unsafe { &*raw_to_leaf::<K, V>(child) };
                    if existing.key == key {
                        unsafe {
                            node_ref.change_child(byte, leaf_to_raw(leaf));
                        }
                        node_ref.lock.write_unlock();
                        let guard = pin_guard();
                        let old = unsafe { raw_to_leaf::<K, V>(child) };
                        unsafe {
                            guard.defer_unchecked(move || drop(Box::from_raw(old)));
                        }
                        return;
                    }

                    // Leaf collision: build a new N4 from the longest common
                    // byte prefix of the two keys beyond `level + 1`.
                    let existing_bytes = existing.key.to_be_bytes_vec();
                    let mut shared_start = level + 1;
                    while shared_start < bytes.len()
                        && shared_start < existing_bytes.len()
                        && bytes[shared_start] == existing_bytes[shared_start]
                    {
                        shared_start += 1;
                    }
                    let shared_prefix = &bytes[level + 1..shared_start];
                    // The new N4 is reached by dispatching on `byte` from
                    // `node_ref` (depth `level`), so it sits one byte deeper.
                    let mut new_n4 = Node::new_n4(shared_prefix, self.max_prefix_len, level as u32 + 1);
                    if shared_start < bytes.len() && shared_start < existing_bytes.len() {
                        new_n4.insert_child(existing_bytes[shared_start], child);
                        new_n4.insert_child(bytes[shared_start], leaf_to_raw(leaf));
                    } else {
                        // One key is a byte-for-byte duplicate of the other's
                        // remaining path; unreachable for distinct fixed-width
                        // keys, kept only so this branch cannot panic.
                        new_n4.insert_child(bytes[shared_start.min(bytes.len() - 1)], leaf_to_raw(leaf));
                    }
                    let new_ptr = node_to_raw(Box::new(new_n4));
                    unsafe {
                        node_ref.change_child(byte, new_ptr);
                    }
                    node_ref.lock.write_unlock();
                    return;
                }

                let next = unsafe { raw_to_node::<K, V>(child) };
                let next_ref = unsafe { &*next };
                let next_version = match next_ref.lock.read_lock() {
                    Some(v) => v,
                    None => {
                        backoff.spin();
                        continue 'restart;
                    }
                };
                if !node_ref.lock.check(version) {
                    backoff.spin();
                    continue 'restart;
                }

                node = next;
                node_ref = next_ref;
                version = next_version;
                level += 1;
            }
        }
    }

    /// Re-descends from the root to `level` and repoints the parent's
    /// child slot at `replacement`, used after a prefix split or node
    /// growth produced a new node that must replace `old` in its
    /// parent. Falls back to a full restart if the tree changed shape
    /// underneath us (the caller is expected to simply retry the whole
    /// operation in that case, which is always safe).
    fn publish_replacement(
        &self,
        bytes: &[u8],
        target_level: usize,
        old: *mut Node<K, V>,
        replacement: *mut Node<K, V>,
        backoff: &Backoff,
    ) {
        if target_level == 0 {
            // Replacing the root itself never happens: the root is a
            // fixed N256 that never grows and has no parent to patch.
            unreachable!("the ART root never splits or grows");
        }

        loop {
            let mut node = self.root_ptr();
            let mut level = 0usize;
            loop {
                let node_ref = unsafe { &*node };
                let Some(version) = node_ref.lock.read_lock() else {
                    backoff.spin();
                    break;
                };
                if level + 1 == target_level {
                    let byte = bytes[level];
                    let Some(_w) = node_ref.lock.upgrade_to_write_lock(version) else {
                        backoff.spin();
                        break;
                    };
                    let current = node_ref.get_child(byte);
                    if current == old {
                        node_ref.change_child(byte, replacement.cast::<u8>());
                    }
                    node_ref.lock.write_unlock();
                    return;
                }
                let byte = bytes[level];
                let child = node_ref.get_child(byte);
                if child.is_null() || is_leaf(child) || !node_ref.lock.check(version) {
                    backoff.spin();
                    break;
                }
                node = unsafe { raw_to_node::<K, V>(child) };
                level += 1;
            }
        }
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove(&self, key: K) -> bool {
        let bytes = key.to_be_bytes_vec();
        let _guard = pin_guard();
        let backoff = Backoff::new();

        'restart: loop {
            let mut node = self.root_ptr();
            let mut node_ref = unsafe { &*node };
            let mut version = match node_ref.lock.read_lock() {
                Some(v) => v,
                None => {
                    backoff.spin();
                    continue 'restart;
                }
            };
            let mut level = 0usize;

            loop {
                match check_prefix(node_ref, &bytes, level) {
                    PrefixCheck::NoMatch => {
                        if !node_ref.lock.check(version) {
                            backoff.spin();
                            continue 'restart;
                        }
                        return false;
                    }
                    PrefixCheck::Match { new_level } => level = new_level,
                }

                if level >= bytes.len() {
                    if !node_ref.lock.check(version) {
                        backoff.spin();
                        continue 'restart;
                    }
                    return false;
                }

                let byte = bytes[level];
                let child = node_ref.get_child(byte);
                if !node_ref.lock.check(version) {
                    backoff.spin();
                    continue 'restart;
                }

                if child.is_null() {
                    return false;
                }

                if is_leaf(child) {
                    let leaf = unsafe { &*raw_to_leaf::<K, V>(child) };
                    if leaf.key != key {
                        return false;
                    }

                    let Some(_w) = node_ref.lock.upgrade_to_write_lock(version) else {
                        backoff.spin();
                        continue 'restart;
                    };
                    unsafe {
                        node_ref.remove_child(byte);
                    }

                    if let Some(shrunk) = node_ref.shrunk() {
                        let shrunk_ptr = Box::into_raw(Box::new(shrunk));
                        // `node` is about to be retired; repoint any fast
                        // pointer that cached it at the shrunk replacement
                        // (spec.md §4.5 delete path).
                        if let Some(idx) = self.fast_pointers.find_index(node) {
                            self.fast_pointers.rewrite(idx, shrunk_ptr);
                        }
                        node_ref.lock.write_unlock_obsolete();
                        let old = node;
                        unsafe {
                            pin_guard().defer_unchecked(move || drop(Box::from_raw(old)));
                        }
                        self.publish_replacement(&bytes, level, node, shrunk_ptr, &backoff);
                    } else {
                        node_ref.lock.write_unlock();
                    }

                    let leaf_ptr = unsafe { raw_to_leaf::<K, V>(child) };
                    unsafe {
                        pin_guard().defer_unchecked(move || drop(Box::from_raw(leaf_ptr)));
                    }
                    return true;
                }

                let next = unsafe { raw_to_node::<K, V>(child) };
                let next_ref = unsafe { &*next };
                let next_version = match next_ref.lock.read_lock() {
                    Some(v) => v,
                    None => {
                        backoff.spin();
                        continue 'restart;
                    }
                };
                if !node_ref.lock.check(version) {
                    backoff.spin();
                    continue 'restart;
                }

                node = next;
                node_ref = next_ref;
                version = next_version;
                level += 1;
            }
        }
    }

    /// Collects up to `remaining` entries with key >= `start`, in
    /// ascending order (spec.md §4.4). Relaxed (non-snapshot) consistency:
    /// each returned pair existed at some instant, but entries inserted or
    /// removed mid-scan may or may not be reflected.
    pub fn range_scan(&self, start: K, remaining: usize, out: &mut Vec<(K, V)>) {
        if remaining == 0 {
            return;
        }
        let start_bytes = start.to_be_bytes_vec();
        let _guard = pin_guard();
        self.collect_from(self.root_ptr(), &start_bytes, 0, false, out, remaining);
    }

    /// `force_all`: once true, every descendant leaf is >= `start` by
    /// construction (we're past the divergence point), so no further
    /// byte comparisons are needed.
    fn collect_from(
        &self,
        node: *mut Node<K, V>,
        start_bytes: &[u8],
        level: usize,
        force_all: bool,
        out: &mut Vec<(K, V)>,
        remaining: usize,
    ) {
        if out.len() >= remaining {
            return;
        }
        let node_ref = unsafe { &*node };
        let Some(version) = node_ref.lock.read_lock() else {
            return;
        };

        let (children, prefix_cmp, new_level) = {
            let stored = node_ref.stored_prefix();
            let mut cmp = std::cmp::Ordering::Equal;
            let mut lvl = level;
            if !force_all {
                for (i, &b) in stored.iter().enumerate() {
                    let idx = level + i;
                    if idx >= start_bytes.len() {
                        break;
                    }
                    match b.cmp(&start_bytes[idx]) {
                        std::cmp::Ordering::Equal => {}
                        other => {
                            cmp = other;
                            break;
                        }
                    }
                }
            }
            lvl += node_ref.prefix_len as usize;
            (node_ref.iter_sorted(), cmp, lvl)
        };

        if !node_ref.lock.check(version) {
            return;
        }

        if prefix_cmp == std::cmp::Ordering::Less {
            // Everything under this node is < start; nothing to collect.
            return;
        }
        let force_all = force_all || prefix_cmp == std::cmp::Ordering::Greater;

        let start_byte = if force_all || new_level >= start_bytes.len() {
            0u8
        } else {
            start_bytes[new_level]
        };

        for (byte, child) in children {
            if out.len() >= remaining {
                return;
            }
            if !force_all && byte < start_byte {
                continue;
            }
            let child_force_all = force_all || byte > start_byte;
            if is_leaf(child) {
                let leaf = unsafe { &*raw_to_leaf::<K, V>(child) };
                if child_force_all || leaf.key >= start {
                    out.push((leaf.key, leaf.value));
                }
            } else {
                let child_node = unsafe { raw_to_node::<K, V>(child) };
                self.collect_from(child_node, start_bytes, new_level + 1, child_force_all, out, remaining);
            }
        }
    }

    /// Descends simultaneously toward `k1` and `k2`, returning the fast
    /// pointer index for their least common ancestor node (spec.md §4.7).
    pub fn build_fast_pointer(&self, k1: K, k2: K) -> usize {
        let b1 = k1.to_be_bytes_vec();
        let b2 = k2.to_be_bytes_vec();
        let mut node = self.root_ptr();
        let mut level = 0usize;

        loop {
            let node_ref = unsafe { &*node };
            if level >= b1.len() || level >= b2.len() || b1[level] != b2[level] {
                break;
            }
            let child = node_ref.get_child(b1[level]);
            if child.is_null() || is_leaf(child) {
                break;
            }
            node = unsafe { raw_to_node::<K, V>(child) };
            level += 1;
        }

        self.fast_pointers.push_idempotent(node)
    }

    /// Looks up via a cached fast-pointer entry instead of the root,
    /// falling back to a normal root descent on any mismatch (the cached
    /// node may have been superseded by a later split).
    pub fn get_via_fast_pointer(&self, key: K, fast_pointer_index: usize) -> Option<V> {
        let bytes = key.to_be_bytes_vec();
        let node = self.fast_pointers.get(fast_pointer_index);
        if node.is_null() {
            return self.get(key);
        }
        let _guard = pin_guard();
        let backoff = Backoff::new();

        let node_ref = unsafe { &*node };
        let Some(mut version) = node_ref.lock.read_lock() else {
            return self.get(key);
        };
        let mut node_ref = node_ref;
        // The cached node may sit anywhere in the tree, not just at the
        // root, so resume the descent at its own absolute depth rather
        // than assuming `level = 0` (grounded in `N::match_level`; see
        // `build_fast_pointer`, which records whatever depth the LCA
        // search actually reached).
        let mut level = node_ref.match_level as usize;
        let _ = (&backoff, EMPTY_MARKER, Ordering::Relaxed);

        loop {
            match check_prefix(node_ref, &bytes, level) {
                PrefixCheck::NoMatch => return None,
                PrefixCheck::Match { new_level } => level = new_level,
            }
            if level >= bytes.len() {
                return None;
            }
            let byte = bytes[level];
            let child = node_ref.get_child(byte);
            if !node_ref.lock.check(version) {
                return self.get(key);
            }
            if child.is_null() {
                return None;
            }
            if is_leaf(child) {
                let leaf = unsafe { &*raw_to_leaf::<K, V>(child) };
                return if leaf.key == key { Some(leaf.value) } else { None };
            }
            let next = unsafe { raw_to_node::<K, V>(child) };
            let next_ref = unsafe { &*next };
            let Some(next_version) = next_ref.lock.read_lock() else {
                return self.get(key);
            };
            if !node_ref.lock.check(version) {
                return self.get(key);
            }
            node_ref = next_ref;
            version = next_version;
            level += 1;
        }
    }

    pub fn fast_pointer_count(&self) -> usize {
        self.fast_pointers.len()
    }
}

impl<K, V> Drop for Tree<K, V> {
    fn drop(&mut self) {
        // Single-owner teardown: no concurrent readers remain by
        // construction, so children are freed directly without deferring
        // through the epoch.
        fn drop_node<K, V>(ptr: *mut u8) {
            if ptr.is_null() {
                return;
            }
            if is_leaf(ptr) {
                unsafe {
                    drop(Box::from_raw(raw_to_leaf::<K, V>(ptr)));
                }
            } else {
                unsafe {
                    let node = raw_to_node::<K, V>(ptr);
                    for (_, child) in (*node).iter_sorted() {
                        drop_node::<K, V>(child);
                    }
                    drop(Box::from_raw(node));
                }
            }
        }

        for (_, child) in self.root.iter_sorted() {
            drop_node::<K, V>(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove_roundtrip() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        tree.put(10, 100);
        tree.put(20, 200);
        assert_eq!(tree.get(10), Some(100));
        assert_eq!(tree.get(20), Some(200));
        assert_eq!(tree.get(30), None);
        assert!(tree.remove(10));
        assert_eq!(tree.get(10), None);
        assert!(!tree.remove(10));
    }

    // All of 0..256 share the same first 7 key bytes (big-endian u64, all
    // less than 2^8) and diverge only in the last byte, so they collide
    // into a single interior node that must grow N4 -> N16 -> N48 -> N256
    // to hold all 256 children.
    #[test]
    fn node_grows_through_every_variant_and_all_keys_stay_reachable() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        for k in 0u64..256 {
            tree.put(k, k + 1);
        }
        for k in 0u64..256 {
            assert_eq!(tree.get(k), Some(k + 1));
        }
        assert_eq!(tree.get(256), None);
    }

    #[test]
    fn shrink_on_remove_drops_back_through_every_variant() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        for k in 0u64..256 {
            tree.put(k, k);
        }
        // Remove down past the N256->N48, N48->N16 and N16->N4 shrink
        // thresholds, leaving exactly 3 keys.
        for k in 3u64..256 {
            assert!(tree.remove(k));
        }
        for k in 0u64..3 {
            assert_eq!(tree.get(k), Some(k));
        }
        for k in 3u64..256 {
            assert_eq!(tree.get(k), None);
        }
    }

    #[test]
    fn growth_repoints_fast_pointer_instead_of_leaving_it_stale() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        tree.put(0, 1000);
        tree.put(1, 1001);
        // The interior node created by the 0/1 leaf collision is the LCA
        // of these two keys; register a fast pointer at it.
        let idx = tree.build_fast_pointer(0, 1);
        let before = tree.fast_pointers.get(idx);
        assert!(!before.is_null());

        // Force that node through N4 -> N16 -> N48 -> N256 growth (50
        // distinct children in total).
        for k in 2u64..50 {
            tree.put(k, 1000 + k);
        }

        let after = tree.fast_pointers.get(idx);
        assert!(!after.is_null());
        assert_ne!(before, after, "growth must repoint the fast pointer at the new node");

        for k in 0u64..50 {
            assert_eq!(tree.get_via_fast_pointer(k, idx), Some(1000 + k));
        }
    }

    #[test]
    fn shrink_repoints_fast_pointer_instead_of_leaving_it_stale() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        for k in 0u64..20 {
            tree.put(k, 1000 + k);
        }
        let idx = tree.build_fast_pointer(0, 1);
        let before = tree.fast_pointers.get(idx);
        assert!(!before.is_null());

        // Remove back down past the N48 -> N16 and N16 -> N4 shrink
        // thresholds.
        for k in 4u64..20 {
            assert!(tree.remove(k));
        }

        let after = tree.fast_pointers.get(idx);
        assert!(!after.is_null());
        assert_ne!(before, after, "shrink must repoint the fast pointer at the new node");

        for k in 0u64..4 {
            assert_eq!(tree.get_via_fast_pointer(k, idx), Some(1000 + k));
        }
    }

    #[test]
    fn prefix_divergence_split_repoints_fast_pointer_and_preserves_lookups() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        // 0 and 256 collide under the root (shared byte0 = 0) and build an
        // interior N4 whose stored prefix is 5 zero bytes, diverging at
        // byte index 6.
        tree.put(0, 10);
        tree.put(256, 20);
        let idx = tree.build_fast_pointer(0, 256);
        let before = tree.fast_pointers.get(idx);
        assert!(!before.is_null());

        // `1 << 32` shares byte0 = 0 with the interior node above but
        // disagrees with its stored (all-zero) prefix partway through,
        // forcing a prefix-divergence split of that node rather than a
        // leaf collision or plain growth.
        let diverging_key = 1u64 << 32;
        tree.put(diverging_key, 30);

        let after = tree.fast_pointers.get(idx);
        assert!(!after.is_null());
        assert_ne!(before, after, "a prefix split must repoint a fast pointer cached on the split node");

        assert_eq!(tree.get(0), Some(10));
        assert_eq!(tree.get(256), Some(20));
        assert_eq!(tree.get(diverging_key), Some(30));
        assert_eq!(tree.get_via_fast_pointer(0, idx), Some(10));
        assert_eq!(tree.get_via_fast_pointer(256, idx), Some(20));
    }

    #[test]
    fn range_scan_collects_ascending_keys_from_start() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        for k in (0u64..20).step_by(2) {
            tree.put(k, k);
        }
        let mut out = Vec::new();
        tree.range_scan(5, 4, &mut out);
        assert_eq!(out.len(), 4);
        assert!(out.windows(2).all(|w| w[0].0 < w[1].0));
        assert!(out.iter().all(|(k, _)| *k >= 5));
    }

    #[test]
    fn build_fast_pointer_is_idempotent_for_the_same_range() {
        let tree = Tree::<u64, u64>::new(4, MAX_PREFIX_LEN);
        tree.put(0, 1);
        tree.put(1, 2);
        let idx_a = tree.build_fast_pointer(0, 1);
        let idx_b = tree.build_fast_pointer(0, 1);
        assert_eq!(idx_a, idx_b);
        assert_eq!(tree.fast_pointer_count(), 1);
    }
}
