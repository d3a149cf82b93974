// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Fixed-width integer keys and their big-endian byte encoding.
//!
//! The learned layer (segments, GPL models) works with the key's native
//! integer representation. The ART layer needs a byte string whose
//! lexicographic order matches the key's integer order, so every key is
//! additionally exposed as its big-endian byte encoding (spec.md §3, §6).

use byteorder::{BigEndian, ByteOrder};
use std::fmt::Debug;

/// A fixed-width unsigned integer key.
///
/// Implemented for `u32` and `u64`, the two widths the design assumes
/// (spec.md §3). `0` is a valid key; it is values, not keys, that reserve
/// a sentinel (see [`crate::value::IndexValue`]).
pub trait IndexKey:
    Copy + Clone + Debug + Default + Ord + Eq + Send + Sync + 'static
{
    /// Byte length of the big-endian encoding, i.e. `size_of::<Self>()`.
    const BYTE_LEN: usize;

    /// Encodes `self` as big-endian bytes so that byte-wise comparison
    /// equals integer comparison (spec.md §6: "a byte-reversal primitive
    /// on keys so that integer order equals lexicographic byte order").
    fn to_be_bytes_vec(self) -> Vec<u8>;

    /// Decodes a big-endian byte slice back into a key.
    fn from_be_slice(bytes: &[u8]) -> Self;

    /// Converts to `f64` for use in the GPL linear model's predictions.
    fn as_f64(self) -> f64;

    /// The zero key, used as the additive identity in model arithmetic.
    fn zero() -> Self;

    /// Rounds `v` to the nearest key, saturating at the type's bounds.
    /// Used only to derive a trailing sentinel segment's boundary key
    /// from its predecessor's model (spec.md §4.4).
    fn from_f64_round(v: f64) -> Self;
}

impl IndexKey for u32 {
    const BYTE_LEN: usize = 4;

    fn to_be_bytes_vec(self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_be_slice(bytes: &[u8]) -> Self {
        BigEndian::read_u32(bytes)
    }

    fn as_f64(self) -> f64 {
        f64::from(self)
    }

    fn zero() -> Self {
        0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_f64_round(v: f64) -> Self {
        v.round().clamp(0.0, f64::from(u32::MAX)) as u32
    }
}

impl IndexKey for u64 {
    const BYTE_LEN: usize = 8;

    fn to_be_bytes_vec(self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_be_slice(bytes: &[u8]) -> Self {
        BigEndian::read_u64(bytes)
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        self as f64
    }

    fn zero() -> Self {
        0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_f64_round(v: f64) -> Self {
        v.round().clamp(0.0, u64::MAX as f64) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order_matches_integer_order() {
        let a: u64 = 10;
        let b: u64 = 300;
        assert!(a < b);
        assert!(a.to_be_bytes_vec() < b.to_be_bytes_vec());
    }

    #[test]
    fn round_trips() {
        let k: u64 = 0xdead_beef_0011_2233;
        assert_eq!(k, u64::from_be_slice(&k.to_be_bytes_vec()));

        let k32: u32 = 0xcafe_babe;
        assert_eq!(k32, u32::from_be_slice(&k32.to_be_bytes_vec()));
    }
}
