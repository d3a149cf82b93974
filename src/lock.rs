// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Optimistic lock coupling.
//!
//! A single 64-bit word packs a version counter together with a "locked"
//! bit and an "obsolete" bit (spec.md §6). Readers never block: they
//! snapshot the word, do their work, then check the word hasn't changed.
//! A mismatch means a concurrent writer interleaved and the reader must
//! restart from the top of the operation. Writers take the lock with a
//! single CAS and bump the version on release so in-flight readers
//! observe the change.
//!
//! Bit layout, low to high: `obsolete (1) | locked (1) | version (62)`.

use std::sync::atomic::{AtomicU64, Ordering};

const OBSOLETE_BIT: u64 = 0b01;
const LOCKED_BIT: u64 = 0b10;

/// A versioned lock word shared by segment slots and ART nodes.
///
/// Cloning resets the lock to its initial unlocked, non-obsolete state;
/// the version counter is not meaningful across a clone (mirrors the
/// original's copy constructor, which reinitializes the word rather than
/// copying it).
#[derive(Debug)]
pub struct OptLock {
    word: AtomicU64,
}

impl Default for OptLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for OptLock {
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Opaque version snapshot returned by [`OptLock::read_lock`].
///
/// Must be passed back to [`OptLock::check`] (or
/// [`OptLock::upgrade_to_write_lock`]) to validate that no writer
/// interleaved since the snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version(u64);

impl OptLock {
    /// Creates a fresh, unlocked, non-obsolete lock at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            word: AtomicU64::new(0),
        }
    }

    fn is_locked(word: u64) -> bool {
        word & LOCKED_BIT == LOCKED_BIT
    }

    fn is_obsolete(word: u64) -> bool {
        word & OBSOLETE_BIT == OBSOLETE_BIT
    }

    /// Returns `true` if the node carrying this lock has been retired.
    pub fn is_node_obsolete(&self) -> bool {
        Self::is_obsolete(self.word.load(Ordering::Acquire))
    }

    /// Optimistically snapshots the current version.
    ///
    /// Returns `None` if the word is currently write-locked or marked
    /// obsolete; the caller should restart the operation.
    pub fn read_lock(&self) -> Option<Version> {
        let word = self.word.load(Ordering::Acquire);
        if Self::is_locked(word) || Self::is_obsolete(word) {
            None
        } else {
            Some(Version(word))
        }
    }

    /// Validates that no writer has locked or obsoleted the word since
    /// `version` was snapshotted.
    ///
    /// Returns `false` (meaning: restart) on mismatch.
    pub fn check(&self, version: Version) -> bool {
        self.word.load(Ordering::Acquire) == version.0
    }

    /// Attempts to atomically upgrade a previously read version directly
    /// to a write lock via a single CAS.
    ///
    /// On success returns the new locked word's version for later
    /// [`write_unlock`](Self::write_unlock). On failure (someone else won
    /// the race) returns `None`; the caller should restart.
    pub fn upgrade_to_write_lock(&self, version: Version) -> Option<Version> {
        let locked = version.0 | LOCKED_BIT;
        self.word
            .compare_exchange(
                version.0,
                locked,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Version(locked))
    }

    /// Read-locks then immediately upgrades to a write lock.
    ///
    /// Returns `None` if either step fails; the caller should restart.
    pub fn write_lock(&self) -> Option<Version> {
        let version = self.read_lock()?;
        self.upgrade_to_write_lock(version)
    }

    /// Releases a write lock, bumping the version so readers see the
    /// change (`+0b10`, matching the original's `writeUnlock`).
    pub fn write_unlock(&self) {
        self.word.fetch_add(LOCKED_BIT, Ordering::AcqRel);
    }

    /// Releases a write lock while also marking the node obsolete
    /// (`+0b11`): used when a node is being retired, e.g. after an ART
    /// node shrinks to a single child and is spliced out.
    pub fn write_unlock_obsolete(&self) {
        self.word.fetch_add(LOCKED_BIT | OBSOLETE_BIT, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_unlocked_and_readable() {
        let lock = OptLock::new();
        let v = lock.read_lock().expect("not locked");
        assert!(lock.check(v));
    }

    #[test]
    fn write_lock_blocks_concurrent_write_lock() {
        let lock = OptLock::new();
        let v = lock.read_lock().unwrap();
        let w = lock.upgrade_to_write_lock(v).expect("should acquire");

        // Snapshot taken while locked must fail to read-lock.
        assert!(lock.read_lock().is_none());

        lock.write_unlock();
        // Unlock bumped the version; the old snapshot is stale.
        assert!(!lock.check(w));
    }

    #[test]
    fn obsolete_lock_rejects_readers() {
        let lock = OptLock::new();
        let v = lock.write_lock().unwrap();
        lock.write_unlock_obsolete();
        assert!(lock.is_node_obsolete());
        assert!(lock.read_lock().is_none());
        assert!(!lock.check(v));
    }

    #[test]
    fn concurrent_upgrade_race_has_one_winner() {
        let lock = OptLock::new();
        let v1 = lock.read_lock().unwrap();
        let v2 = lock.read_lock().unwrap();
        assert_eq!(v1, v2);

        let w1 = lock.upgrade_to_write_lock(v1);
        let w2 = lock.upgrade_to_write_lock(v2);
        assert!(w1.is_some());
        assert!(w2.is_none());
    }
}
