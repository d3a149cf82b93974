// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tunables the distilled spec leaves as constants (spec.md §4.1, §4.4,
//! §4.5): the GPL error bound, the expansion growth factor, ART's inline
//! prefix length, and the fast-pointer buffer's initial capacity.

/// Index configuration builder.
///
/// Mirrors spec.md's fixed constants as overridable defaults, the same
/// way a storage engine's `Config` type exposes block sizes and level
/// counts as tunables with documented defaults.
#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Divisor used to compute the GPL error bound `epsilon = ceil(n /
    /// gpl_epsilon_divisor)` at bulk-load time (spec.md §4.1: "Chosen
    /// ε = ⌈n/1000⌉").
    pub gpl_epsilon_divisor: u64,

    /// Growth factor `g` for a segment's initial slot-array capacity:
    /// `num_items = len * (1 + g)` (spec.md §3: "capacity of the slot
    /// array, sized 1+g times the number of keys loaded (g ≈ 2)").
    pub slot_array_growth: f64,

    /// Maximum number of prefix bytes an ART interior node stores inline
    /// before falling back to optimistic prefix matching (spec.md §4.5).
    pub max_stored_prefix_length: usize,

    /// Initial capacity reserved for the fast-pointer buffer (spec.md
    /// §4.5, §9: entries are append-only and currently never evicted).
    pub fast_pointer_buffer_capacity: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            gpl_epsilon_divisor: 1_000,
            slot_array_growth: 2.0,
            max_stored_prefix_length: 8,
            fast_pointer_buffer_capacity: 256,
        }
    }
}

impl IndexConfig {
    /// Creates a config with spec.md's defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the GPL error-bound divisor.
    ///
    /// # Panics
    ///
    /// Panics if `divisor` is 0.
    #[must_use]
    pub fn gpl_epsilon_divisor(mut self, divisor: u64) -> Self {
        assert!(divisor > 0, "gpl_epsilon_divisor must be positive");
        self.gpl_epsilon_divisor = divisor;
        self
    }

    /// Sets the slot-array growth factor `g`.
    ///
    /// # Panics
    ///
    /// Panics if `g` is not positive.
    #[must_use]
    pub fn slot_array_growth(mut self, g: f64) -> Self {
        assert!(g > 0.0, "slot_array_growth must be positive");
        self.slot_array_growth = g;
        self
    }

    /// Sets the inline ART prefix length.
    ///
    /// # Panics
    ///
    /// Panics if `len` is 0.
    #[must_use]
    pub fn max_stored_prefix_length(mut self, len: usize) -> Self {
        assert!(len > 0, "max_stored_prefix_length must be positive");
        self.max_stored_prefix_length = len;
        self
    }

    /// Sets the initial fast-pointer buffer capacity.
    #[must_use]
    pub fn fast_pointer_buffer_capacity(mut self, capacity: usize) -> Self {
        self.fast_pointer_buffer_capacity = capacity;
        self
    }
}
