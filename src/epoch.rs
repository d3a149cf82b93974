// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Thin wrapper around `crossbeam-epoch` for the ART's memory
//! reclamation.
//!
//! An ART node that shrinks, splits, or is otherwise unlinked is retired
//! rather than freed immediately: a concurrent reader may still hold a
//! raw pointer to it from before the unlink. Epoch-based reclamation
//! defers the actual deallocation until every thread that could have
//! observed the old pointer has since passed through a quiescent point
//! (spec.md §6, grounded in the pack's other lock-free tree,
//! `NLnetLabs-rotonda-store`, which reaches for the same crate for the
//! same reason).

pub use crossbeam_epoch::{pin, Guard};

/// Pins the current thread to the current epoch for the duration of one
/// traversal, the way every read and write path enters and exits a
/// [`crate::art`] operation.
pub fn pin_guard() -> Guard {
    pin()
}
