// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! ART node layouts.
//!
//! Four fanout-specific variants (N4/N16/N48/N256) trade lookup cost for
//! memory as a node grows, exactly as the adaptive radix tree design
//! describes (spec.md §4.5, grounded in `OptimizedART/N.cpp` and
//! `OptimizedART/N48.cpp`). Every node carries an [`OptLock`] and an
//! inline compressed prefix; child slots are tagged raw pointers so a
//! slot can point to either another interior node or a leaf without an
//! extra indirection.

use crate::lock::OptLock;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Bytes of key prefix a node stores inline before falling back to
/// optimistic (unverified-until-leaf) prefix matching.
pub const MAX_PREFIX_LEN: usize = 8;

/// Sentinel marking an empty slot in [`N48`]'s 256-byte index table.
pub const EMPTY_MARKER: u8 = 48;

const LEAF_TAG: usize = 1;

/// A leaf: one resolved (key, value) pair.
pub struct Leaf<K, V> {
    pub key: K,
    pub value: V,
}

/// Packs a leaf allocation into a tagged child-slot pointer.
pub fn leaf_to_raw<K, V>(leaf: Box<Leaf<K, V>>) -> *mut u8 {
    let raw = Box::into_raw(leaf) as usize;
    debug_assert_eq!(raw & LEAF_TAG, 0, "leaf allocation must be at least 2-byte aligned");
    (raw | LEAF_TAG) as *mut u8
}

/// Returns `true` if a child-slot pointer is tagged as a leaf.
pub fn is_leaf(ptr: *mut u8) -> bool {
    !ptr.is_null() && (ptr as usize) & LEAF_TAG == LEAF_TAG
}

/// Strips the leaf tag and casts back to a leaf pointer.
///
/// # Safety
///
/// `ptr` must have been produced by [`leaf_to_raw`] and must still be
/// live (not yet reclaimed).
pub unsafe fn raw_to_leaf<K, V>(ptr: *mut u8) -> *mut Leaf<K, V> {
    (((ptr as usize) & !LEAF_TAG) as *mut Leaf<K, V>)
}

/// Casts a non-leaf child-slot pointer back to an interior node.
///
/// # Safety
///
/// `ptr` must not be leaf-tagged and must still be live.
pub unsafe fn raw_to_node<K, V>(ptr: *mut u8) -> *mut Node<K, V> {
    ptr.cast::<Node<K, V>>()
}

/// Packs an interior node allocation into a child-slot pointer.
pub fn node_to_raw<K, V>(node: Box<Node<K, V>>) -> *mut u8 {
    Box::into_raw(node).cast::<u8>()
}

/// The fanout-specific body of an interior ART node.
pub enum Body<K, V> {
    N4 {
        keys: [u8; 4],
        children: [AtomicPtr<u8>; 4],
        count: u8,
    },
    N16 {
        keys: [u8; 16],
        children: [AtomicPtr<u8>; 16],
        count: u8,
    },
    N48 {
        child_index: [u8; 256],
        children: [AtomicPtr<u8>; 48],
        count: u8,
    },
    N256 {
        children: [AtomicPtr<u8>; 256],
        count: u16,
    },
}

/// One interior ART node: a version lock, a compressed prefix, and a
/// fanout-specific body.
pub struct Node<K, V> {
    pub lock: OptLock,
    pub prefix: [u8; MAX_PREFIX_LEN],
    /// True prefix length; may exceed `stored_prefix_cap`, in which case
    /// only the leading bytes are stored and the remainder is matched
    /// optimistically (verified against the leaf key at the end of the
    /// traversal) — spec.md §4.5.
    pub prefix_len: u32,
    /// How many bytes of `prefix` this node actually treats as stored,
    /// i.e. `min(IndexConfig::max_stored_prefix_length, MAX_PREFIX_LEN)`
    /// at the time this node was built. Always `<= MAX_PREFIX_LEN`; the
    /// backing array is sized to the hard cap regardless of the
    /// configured value so growth/shrink never need to reallocate it.
    pub stored_prefix_cap: u8,
    /// Absolute byte depth of this node's prefix within a key, i.e. the
    /// number of key bytes already dispatched on by ancestors to reach
    /// it (grounded in `N::match_level`/`getMatchLevel`). Lets a lookup
    /// that enters through a cached fast pointer rather than the root
    /// seed its own notion of `level` correctly.
    pub match_level: u32,
    pub body: Body<K, V>,
}

impl<K, V> Node<K, V> {
    fn empty_children<const N: usize>() -> [AtomicPtr<u8>; N] {
        std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut()))
    }

    /// Builds a new N4 node with the given prefix, storing at most
    /// `max_stored_prefix_length` bytes of it inline (spec.md §4.5,
    /// `IndexConfig::max_stored_prefix_length`), at absolute depth
    /// `match_level` within the key.
    pub fn new_n4(prefix: &[u8], max_stored_prefix_length: usize, match_level: u32) -> Self {
        let cap = max_stored_prefix_length.min(MAX_PREFIX_LEN) as u8;
        Self {
            lock: OptLock::new(),
            prefix: Self::store_prefix(prefix, cap as usize),
            prefix_len: prefix.len() as u32,
            stored_prefix_cap: cap,
            match_level,
            body: Body::N4 {
                keys: [0; 4],
                children: Self::empty_children(),
                count: 0,
            },
        }
    }

    fn store_prefix(prefix: &[u8], cap: usize) -> [u8; MAX_PREFIX_LEN] {
        let mut out = [0u8; MAX_PREFIX_LEN];
        let n = prefix.len().min(cap);
        out[..n].copy_from_slice(&prefix[..n]);
        out
    }

    /// Bytes of `prefix` actually stored inline.
    pub fn stored_prefix(&self) -> &[u8] {
        let n = (self.prefix_len as usize).min(self.stored_prefix_cap as usize);
        &self.prefix[..n]
    }

    pub fn count(&self) -> usize {
        match &self.body {
            Body::N4 { count, .. } | Body::N16 { count, .. } | Body::N48 { count, .. } => {
                *count as usize
            }
            Body::N256 { count, .. } => *count as usize,
        }
    }

    pub fn is_full(&self) -> bool {
        match &self.body {
            Body::N4 { count, .. } => *count as usize >= 4,
            Body::N16 { count, .. } => *count as usize >= 16,
            Body::N48 { count, .. } => *count as usize >= 48,
            Body::N256 { count, .. } => *count as usize >= 256,
        }
    }

    /// Reads the child for `byte`, if any.
    pub fn get_child(&self, byte: u8) -> *mut u8 {
        match &self.body {
            Body::N4 { keys, children, count } => {
                for i in 0..*count as usize {
                    if keys[i] == byte {
                        return children[i].load(Ordering::Acquire);
                    }
                }
                std::ptr::null_mut()
            }
            Body::N16 { keys, children, count } => {
                for i in 0..*count as usize {
                    if keys[i] == byte {
                        return children[i].load(Ordering::Acquire);
                    }
                }
                std::ptr::null_mut()
            }
            Body::N48 { child_index, children, .. } => {
                let idx = child_index[byte as usize];
                if idx == EMPTY_MARKER {
                    std::ptr::null_mut()
                } else {
                    children[idx as usize].load(Ordering::Acquire)
                }
            }
            Body::N256 { children, .. } => children[byte as usize].load(Ordering::Acquire),
        }
    }

    /// Inserts a child under `byte`. Caller must hold the write lock and
    /// must have already verified `!is_full()`.
    pub fn insert_child(&mut self, byte: u8, child: *mut u8) {
        match &mut self.body {
            Body::N4 { keys, children, count } => {
                let i = *count as usize;
                keys[i] = byte;
                children[i] = AtomicPtr::new(child);
                *count += 1;
            }
            Body::N16 { keys, children, count } => {
                let i = *count as usize;
                keys[i] = byte;
                children[i] = AtomicPtr::new(child);
                *count += 1;
            }
            Body::N48 { child_index, children, count } => {
                let i = *count as usize;
                children[i] = AtomicPtr::new(child);
                child_index[byte as usize] = i as u8;
                *count += 1;
            }
            Body::N256 { children, count } => {
                children[byte as usize].store(child, Ordering::Release);
                *count += 1;
            }
        }
    }

    /// Replaces the child under `byte` in place (used by update and by
    /// node-growth migration).
    pub fn change_child(&self, byte: u8, child: *mut u8) -> bool {
        match &self.body {
            Body::N4 { keys, children, count } => {
                for i in 0..*count as usize {
                    if keys[i] == byte {
                        children[i].store(child, Ordering::Release);
                        return true;
                    }
                }
                false
            }
            Body::N16 { keys, children, count } => {
                for i in 0..*count as usize {
                    if keys[i] == byte {
                        children[i].store(child, Ordering::Release);
                        return true;
                    }
                }
                false
            }
            Body::N48 { child_index, children, .. } => {
                let idx = child_index[byte as usize];
                if idx == EMPTY_MARKER {
                    false
                } else {
                    children[idx as usize].store(child, Ordering::Release);
                    true
                }
            }
            Body::N256 { children, .. } => {
                children[byte as usize].store(child, Ordering::Release);
                true
            }
        }
    }

    /// Removes the child under `byte`. Caller must hold the write lock.
    pub fn remove_child(&mut self, byte: u8) {
        match &mut self.body {
            Body::N4 { keys, children, count } => {
                for i in 0..*count as usize {
                    if keys[i] == byte {
                        let last = *count as usize - 1;
                        keys[i] = keys[last];
                        children[i] = AtomicPtr::new(children[last].load(Ordering::Acquire));
                        *count -= 1;
                        return;
                    }
                }
            }
            Body::N16 { keys, children, count } => {
                for i in 0..*count as usize {
                    if keys[i] == byte {
                        let last = *count as usize - 1;
                        keys[i] = keys[last];
                        children[i] = AtomicPtr::new(children[last].load(Ordering::Acquire));
                        *count -= 1;
                        return;
                    }
                }
            }
            Body::N48 { child_index, children, count } => {
                let idx = child_index[byte as usize];
                if idx != EMPTY_MARKER {
                    children[idx as usize].store(std::ptr::null_mut(), Ordering::Release);
                    child_index[byte as usize] = EMPTY_MARKER;
                    *count -= 1;
                }
            }
            Body::N256 { children, count } => {
                children[byte as usize].store(std::ptr::null_mut(), Ordering::Release);
                *count -= 1;
            }
        }
    }

    /// If this node has shrunk enough to warrant dropping to the next
    /// smaller variant, returns the replacement. Only ever called with
    /// the write lock held.
    pub fn shrunk(&self) -> Option<Self> {
        match &self.body {
            Body::N256 { children, count } if (*count as usize) <= 48 => {
                let mut new = Self {
                    lock: OptLock::new(),
                    prefix: self.prefix,
                    prefix_len: self.prefix_len,
                    stored_prefix_cap: self.stored_prefix_cap,
                    match_level: self.match_level,
                    body: Body::N48 {
                        child_index: [EMPTY_MARKER; 256],
                        children: Self::empty_children(),
                        count: 0,
                    },
                };
                for (byte, child) in children.iter().enumerate() {
                    let c = child.load(Ordering::Acquire);
                    if !c.is_null() {
                        new.insert_child(byte as u8, c);
                    }
                }
                Some(new)
            }
            Body::N48 { child_index, children, count } if (*count as usize) <= 16 => {
                let mut new = Self {
                    lock: OptLock::new(),
                    prefix: self.prefix,
                    prefix_len: self.prefix_len,
                    stored_prefix_cap: self.stored_prefix_cap,
                    match_level: self.match_level,
                    body: Body::N16 {
                        keys: [0; 16],
                        children: Self::empty_children(),
                        count: 0,
                    },
                };
                for (byte, &idx) in child_index.iter().enumerate() {
                    if idx != EMPTY_MARKER {
                        new.insert_child(byte as u8, children[idx as usize].load(Ordering::Acquire));
                    }
                }
                Some(new)
            }
            Body::N16 { keys, children, count } if (*count as usize) <= 4 => {
                let mut new = Self {
                    lock: OptLock::new(),
                    prefix: self.prefix,
                    prefix_len: self.prefix_len,
                    stored_prefix_cap: self.stored_prefix_cap,
                    match_level: self.match_level,
                    body: Body::N4 {
                        keys: [0; 4],
                        children: Self::empty_children(),
                        count: 0,
                    },
                };
                for i in 0..*count as usize {
                    new.insert_child(keys[i], children[i].load(Ordering::Acquire));
                }
                Some(new)
            }
            _ => None,
        }
    }

    /// Grows to the next larger variant. Only ever called with the write
    /// lock held and `is_full()` true.
    pub fn grown(&self) -> Self {
        match &self.body {
            Body::N4 { keys, children, count } => {
                let mut new = Self {
                    lock: OptLock::new(),
                    prefix: self.prefix,
                    prefix_len: self.prefix_len,
                    stored_prefix_cap: self.stored_prefix_cap,
                    match_level: self.match_level,
                    body: Body::N16 {
                        keys: [0; 16],
                        children: Self::empty_children(),
                        count: 0,
                    },
                };
                for i in 0..*count as usize {
                    new.insert_child(keys[i], children[i].load(Ordering::Acquire));
                }
                new
            }
            Body::N16 { keys, children, count } => {
                let mut new = Self {
                    lock: OptLock::new(),
                    prefix: self.prefix,
                    prefix_len: self.prefix_len,
                    stored_prefix_cap: self.stored_prefix_cap,
                    match_level: self.match_level,
                    body: Body::N48 {
                        child_index: [EMPTY_MARKER; 256],
                        children: Self::empty_children(),
                        count: 0,
                    },
                };
                for i in 0..*count as usize {
                    new.insert_child(keys[i], children[i].load(Ordering::Acquire));
                }
                new
            }
            Body::N48 { child_index, children, .. } => {
                let mut new = Self {
                    lock: OptLock::new(),
                    prefix: self.prefix,
                    prefix_len: self.prefix_len,
                    stored_prefix_cap: self.stored_prefix_cap,
                    match_level: self.match_level,
                    body: Body::N256 {
                        children: Self::empty_children(),
                        count: 0,
                    },
                };
                for (byte, &idx) in child_index.iter().enumerate() {
                    if idx != EMPTY_MARKER {
                        new.insert_child(byte as u8, children[idx as usize].load(Ordering::Acquire));
                    }
                }
                new
            }
            Body::N256 { .. } => {
                unreachable!("N256 is already the largest variant")
            }
        }
    }

    /// Iterates `(byte, child_ptr)` pairs in ascending byte order, as
    /// needed by range scans.
    pub fn iter_sorted(&self) -> Vec<(u8, *mut u8)> {
        let mut out = match &self.body {
            Body::N4 { keys, children, count } => (0..*count as usize)
                .map(|i| (keys[i], children[i].load(Ordering::Acquire)))
                .collect::<Vec<_>>(),
            Body::N16 { keys, children, count } => (0..*count as usize)
                .map(|i| (keys[i], children[i].load(Ordering::Acquire)))
                .collect::<Vec<_>>(),
            Body::N48 { child_index, children, .. } => child_index
                .iter()
                .enumerate()
                .filter(|(_, &idx)| idx != EMPTY_MARKER)
                .map(|(byte, &idx)| (byte as u8, children[idx as usize].load(Ordering::Acquire)))
                .collect::<Vec<_>>(),
            Body::N256 { children, .. } => (0u16..256)
                .filter_map(|byte| {
                    let c = children[byte as usize].load(Ordering::Acquire);
                    (!c.is_null()).then_some((byte as u8, c))
                })
                .collect::<Vec<_>>(),
        };
        out.sort_unstable_by_key(|(byte, _)| *byte);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One dummy leaf pointer per byte value, built once so growth/shrink
    /// assertions compare against the same allocation they inserted
    /// rather than a freshly-allocated (and therefore unequal) one.
    fn leaf_pointers(n: usize) -> Vec<*mut u8> {
        (0..n)
            .map(|i| leaf_to_raw(Box::new(Leaf::<u64, u64> { key: i as u64, value: i as u64 })))
            .collect()
    }

    #[test]
    fn new_n4_clamps_prefix_to_configured_cap() {
        let node = Node::<u64, u64>::new_n4(&[1, 2, 3, 4, 5, 6, 7, 8], 3, 0);
        assert_eq!(node.stored_prefix_cap, 3);
        assert_eq!(node.prefix_len, 8);
        assert_eq!(node.stored_prefix(), &[1, 2, 3]);
    }

    #[test]
    fn new_n4_clamps_configured_cap_to_hard_max() {
        let node = Node::<u64, u64>::new_n4(&[1, 2, 3, 4, 5, 6, 7, 8], 999, 0);
        assert_eq!(node.stored_prefix_cap, MAX_PREFIX_LEN as u8);
        assert_eq!(node.stored_prefix(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn insert_get_change_remove_child_n4() {
        let leaves = leaf_pointers(3);
        let mut node = Node::<u64, u64>::new_n4(&[], MAX_PREFIX_LEN, 0);
        assert!(!node.is_full());
        node.insert_child(1, leaves[0]);
        node.insert_child(2, leaves[1]);
        assert_eq!(node.count(), 2);
        assert_eq!(node.get_child(1), leaves[0]);
        assert_eq!(node.get_child(2), leaves[1]);
        assert!(node.get_child(3).is_null());

        assert!(node.change_child(1, leaves[2]));
        assert_eq!(node.get_child(1), leaves[2]);
        assert!(!node.change_child(9, leaves[2]));

        node.remove_child(1);
        assert_eq!(node.count(), 1);
        assert!(node.get_child(1).is_null());
        assert_eq!(node.get_child(2), leaves[1]);
    }

    #[test]
    fn is_full_thresholds_per_variant() {
        let leaves = leaf_pointers(4);
        let mut n4 = Node::<u64, u64>::new_n4(&[], MAX_PREFIX_LEN, 0);
        for i in 0..4u8 {
            assert!(!n4.is_full());
            n4.insert_child(i, leaves[i as usize]);
        }
        assert!(n4.is_full());

        let n16 = n4.grown();
        assert_eq!(n16.count(), 4);
        assert!(!n16.is_full());
    }

    #[test]
    fn grown_preserves_children_and_prefix_across_every_transition() {
        let leaves = leaf_pointers(48);

        let mut n4 = Node::<u64, u64>::new_n4(&[9, 8, 7], 4, 2);
        for i in 0..4u8 {
            n4.insert_child(i, leaves[i as usize]);
        }
        let n16 = n4.grown();
        assert!(matches!(n16.body, Body::N16 { .. }));
        assert_eq!(n16.stored_prefix(), &[9, 8, 7]);
        for i in 0..4u8 {
            assert_eq!(n16.get_child(i), leaves[i as usize], "child {i} lost across N4->N16 growth");
        }

        let mut n16 = n16;
        for i in 4..16u8 {
            n16.insert_child(i, leaves[i as usize]);
        }
        assert!(n16.is_full());
        let n48 = n16.grown();
        assert!(matches!(n48.body, Body::N48 { .. }));
        for i in 0..16u8 {
            assert_eq!(n48.get_child(i), leaves[i as usize], "child {i} lost across N16->N48 growth");
        }

        let mut n48 = n48;
        for i in 16..48u8 {
            n48.insert_child(i, leaves[i as usize]);
        }
        assert!(n48.is_full());
        let n256 = n48.grown();
        assert!(matches!(n256.body, Body::N256 { .. }));
        for i in 0..48u8 {
            assert_eq!(n256.get_child(i), leaves[i as usize], "child {i} lost across N48->N256 growth");
        }
    }

    #[test]
    #[should_panic]
    fn grown_on_n256_is_unreachable() {
        let n256 = Node::<u64, u64> {
            lock: OptLock::new(),
            prefix: [0; MAX_PREFIX_LEN],
            prefix_len: 0,
            stored_prefix_cap: MAX_PREFIX_LEN as u8,
            match_level: 0,
            body: Body::N256 { children: std::array::from_fn(|_| AtomicPtr::new(std::ptr::null_mut())), count: 0 },
        };
        let _ = n256.grown();
    }

    #[test]
    fn shrunk_is_none_above_threshold_and_some_at_or_below() {
        let leaves = leaf_pointers(5);
        let mut n16 = Node::<u64, u64> {
            lock: OptLock::new(),
            prefix: [0; MAX_PREFIX_LEN],
            prefix_len: 0,
            stored_prefix_cap: MAX_PREFIX_LEN as u8,
            match_level: 0,
            body: Body::N16 { keys: [0; 16], children: Node::<u64, u64>::empty_children(), count: 0 },
        };
        for i in 0..5u8 {
            n16.insert_child(i, leaves[i as usize]);
        }
        assert!(n16.shrunk().is_none(), "5 children is still above the N4 shrink threshold");

        n16.remove_child(4);
        let n4 = n16.shrunk().expect("4 children must shrink back to N4");
        assert!(matches!(n4.body, Body::N4 { .. }));
        for i in 0..4u8 {
            assert_eq!(n4.get_child(i), leaves[i as usize]);
        }
    }

    #[test]
    fn iter_sorted_orders_every_variant_by_byte() {
        let leaves = leaf_pointers(4);
        let mut n4 = Node::<u64, u64>::new_n4(&[], MAX_PREFIX_LEN, 0);
        for &i in &[3u8, 1, 2, 0] {
            n4.insert_child(i, leaves[i as usize]);
        }
        let bytes: Vec<u8> = n4.iter_sorted().into_iter().map(|(b, _)| b).collect();
        assert_eq!(bytes, vec![0, 1, 2, 3]);

        let n256 = n4.grown().grown().grown();
        let bytes: Vec<u8> = n256.iter_sorted().into_iter().map(|(b, _)| b).collect();
        assert_eq!(bytes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn leaf_tag_round_trips() {
        let leaf = Box::new(Leaf::<u64, u64> { key: 42, value: 99 });
        let raw = leaf_to_raw(leaf);
        assert!(is_leaf(raw));
        let back = unsafe { raw_to_leaf::<u64, u64>(raw) };
        assert_eq!(unsafe { (*back).key }, 42);
        assert_eq!(unsafe { (*back).value }, 99);
        unsafe {
            drop(Box::from_raw(back));
        }
    }
}
