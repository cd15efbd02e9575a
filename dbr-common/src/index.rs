//! # Store Index
//!
//! Identifier of one logical database inside a single Redis-compatible
//! server. Valid indices are `0..=15`; anything else is coerced to `0`.
//!
//! ## Design Principles
//! 1. **Newtype Pattern**: A `StoreIndex` is always in range once constructed.
//! 2. **Coerce, Don't Reject**: Out-of-range input maps to index 0 and yields
//!    an `InvalidIndexWarning` instead of an error.
//! 3. **Copy Semantics**: One byte, passed by value everywhere.

use std::fmt;

/// Number of logical databases addressable by a store index.
pub const STORE_INDEX_COUNT: usize = 16;

/// Index of one isolated logical database, always within `0..=15`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreIndex(u8);

impl StoreIndex {
    /// Lowest valid index, also the fallback for invalid input.
    pub const MIN: StoreIndex = StoreIndex(0);

    /// Highest valid index.
    pub const MAX: StoreIndex = StoreIndex((STORE_INDEX_COUNT - 1) as u8);

    /// Returns the index when `raw` is within range.
    ///
    /// # Examples
    /// ```rust
    /// use dbr_common::StoreIndex;
    ///
    /// assert_eq!(StoreIndex::new(3).map(StoreIndex::get), Some(3));
    /// assert!(StoreIndex::new(16).is_none());
    /// assert!(StoreIndex::new(-1).is_none());
    /// ```
    pub const fn new(raw: i64) -> Option<Self> {
        if raw >= 0 && raw < STORE_INDEX_COUNT as i64 {
            Some(StoreIndex(raw as u8))
        } else {
            None
        }
    }

    /// Coerces `raw` into a valid index.
    ///
    /// Out-of-range values become index 0; the returned warning records the
    /// rejected value and is also emitted as a `tracing` warning.
    pub fn clamp(raw: i64) -> (Self, Option<InvalidIndexWarning>) {
        match Self::new(raw) {
            Some(index) => (index, None),
            None => {
                let warning = InvalidIndexWarning { requested: raw };
                tracing::warn!(requested = raw, "store index out of range (0-15), using 0");
                (StoreIndex::MIN, Some(warning))
            }
        }
    }

    /// Returns the numeric index.
    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the index as a slot offset into per-index tables.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Iterates every valid index in ascending order.
    pub fn all() -> impl Iterator<Item = StoreIndex> {
        (0..STORE_INDEX_COUNT as u8).map(StoreIndex)
    }
}

impl fmt::Display for StoreIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for StoreIndex {
    type Error = InvalidIndexWarning;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        Self::new(raw).ok_or(InvalidIndexWarning { requested: raw })
    }
}

impl From<StoreIndex> for u8 {
    fn from(index: StoreIndex) -> Self {
        index.0
    }
}

/// Non-fatal record of an index that was outside `0..=15` and replaced by 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidIndexWarning {
    /// The value that was requested before coercion.
    pub requested: i64,
}

impl fmt::Display for InvalidIndexWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "store index {} out of range (0-{}), coerced to 0",
            self.requested,
            STORE_INDEX_COUNT - 1
        )
    }
}

impl std::error::Error for InvalidIndexWarning {}
