// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A single segment slot.
//!
//! Each slot pairs an [`OptLock`] with a (key, value) cell and an
//! "empty" flag. Occupancy is dual-encoded the way spec.md §9 describes
//! ("Slot tombstone ambiguity"): the `empty` flag is authoritative, but
//! `remove` additionally zeroes the key, which is why value `0` is a
//! reserved sentinel for [`crate::value::IndexValue`] rather than the
//! key type.

use crate::lock::{OptLock, Version};
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, Ordering};

/// One slot in a segment's array.
pub struct Item<K, V> {
    lock: OptLock,
    empty: AtomicBool,
    // Guarded entirely by `lock`'s optimistic-read/write discipline, not
    // by `Cell`'s own (single-threaded) rules: every access is bracketed
    // by a read-lock/check pair or a write-lock/unlock pair.
    key: Cell<K>,
    value: Cell<V>,
}

// SAFETY: `key`/`value` are only ever read or written while holding (or
// having just validated) `lock`, which provides the necessary
// happens-before edges across threads.
unsafe impl<K: Send, V: Send> Sync for Item<K, V> {}

/// A consistent-at-a-point-in-time read of a slot, pending validation.
pub struct Snapshot<K, V> {
    pub version: Version,
    pub empty: bool,
    pub key: K,
    pub value: V,
}

impl<K: Copy, V: Copy> Item<K, V> {
    /// Builds a fresh, empty slot. Takes explicit zero/sentinel values
    /// rather than requiring `K`/`V: Default`, since [`crate::value::IndexValue`]
    /// only guarantees a sentinel accessor, not a `Default` impl.
    pub fn new_empty(zero_key: K, sentinel_value: V) -> Self {
        Self {
            lock: OptLock::new(),
            empty: AtomicBool::new(true),
            key: Cell::new(zero_key),
            value: Cell::new(sentinel_value),
        }
    }

    /// Optimistically reads the slot's current contents.
    ///
    /// Returns `None` if the slot is currently write-locked; the caller
    /// should retry. The returned snapshot must still be validated with
    /// [`check`](Self::check) before any decision based on it is acted
    /// upon irreversibly.
    pub fn snapshot(&self) -> Option<Snapshot<K, V>> {
        let version = self.lock.read_lock()?;
        let empty = self.empty.load(Ordering::Acquire);
        let key = self.key.get();
        let value = self.value.get();
        Some(Snapshot {
            version,
            empty,
            key,
            value,
        })
    }

    /// Validates a previously taken snapshot's version.
    pub fn check(&self, version: Version) -> bool {
        self.lock.check(version)
    }

    /// Attempts to upgrade a snapshot's version directly to a write lock.
    pub fn upgrade(&self, version: Version) -> Option<Version> {
        self.lock.upgrade_to_write_lock(version)
    }

    /// Overwrites the slot's contents. Caller must hold the write lock.
    pub fn store(&self, key: K, value: V, empty: bool) {
        self.key.set(key);
        self.value.set(value);
        self.empty.store(empty, Ordering::Release);
    }

    /// Zeroes just the key, leaving the slot marked occupied (spec.md
    /// §4.3 `remove`: "write-lock and clear key to 0... leaving bitmap =
    /// occupied").
    pub fn clear_key(&self, zero: K) {
        self.key.set(zero);
    }

    pub fn write_unlock(&self) {
        self.lock.write_unlock();
    }
}
