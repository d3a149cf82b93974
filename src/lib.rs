// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A concurrent, in-memory, ordered index for fixed-width integer keys.
//!
//! ##### About
//!
//! This crate combines two structures behind one ordered-map-like API:
//!
//! - a **segmented learned index**: the key domain is partitioned into
//!   segments, each approximated by a linear model that predicts a
//!   slot offset for any key in its range;
//! - an **adaptive radix tree (ART)** that absorbs keys a segment's
//!   model mispredicts, reached through a small cache of "fast
//!   pointers" that let a segment skip straight to its own subtree of
//!   the ART instead of re-descending from the root.
//!
//! Point operations and range scans are lock-free on the read path and
//! lock-coupled on the write path: every segment slot and every ART
//! node carries its own optimistic version lock, so a writer never
//! blocks a reader and two writers only ever contend over the single
//! slot or node they're both touching.
//!
//! This crate does not persist anything to disk; it is a pure in-memory
//! structure, meant to be rebuilt from whatever durable store an
//! application already has (e.g. by bulk-loading a sorted export).
//!
//! # Example usage
//!
//! ```
//! use alt_index::Index;
//!
//! let pairs: Vec<(u64, u64)> = (0..10_000).map(|i| (i, i + 1)).collect();
//! let index = Index::bulk_load(&pairs);
//!
//! assert_eq!(index.find(5_000), Some(5_001));
//!
//! index.insert(10_000, 10_001);
//! assert_eq!(index.find(10_000), Some(10_001));
//!
//! assert!(index.remove(5_000));
//! assert_eq!(index.find(5_000), None);
//!
//! let mut out = Vec::new();
//! index.range_scan(&mut out, 0, 10);
//! assert_eq!(out.len(), 10);
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]

// The optimistic-lock-coupled ART needs raw-pointer node traversal and
// epoch-based reclamation that safe Rust can't express; `unsafe_code`
// is re-permitted only inside that one module.
#[allow(unsafe_code)]
pub mod art;

mod binary_search;
mod config;
mod epoch;
mod index;
mod key;
mod lock;
mod model;
mod segment;
mod value;

pub use config::IndexConfig;
pub use index::Index;
pub use key::IndexKey;
pub use value::IndexValue;
