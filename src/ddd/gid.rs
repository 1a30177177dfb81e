//! `Gid`: the process-independent identity of a distributed object
//!
//! Every replica of a distributed object carries the same `Gid` on every
//! process that holds a copy. Fresh GIDs are composed from a per-process
//! counter and the creating rank, so no two processes ever mint the same id.
//!
//! This module provides:
//! - A transparent `Gid` newtype around `u64`.
//! - Composition/decomposition helpers for locally minted GIDs.
//! - Implementations of common traits (`Debug`, `Display`, ordering,
//!   hashing) so `Gid` can be used as a sort and lookup key.

use std::fmt;

/// Number of low bits reserved for the creating rank.
pub const GID_RANK_BITS: u32 = 20;

/// Global identifier of a distributed object.
///
/// # Memory layout
/// `repr(transparent)` over `u64`; it goes on the wire as a little-endian `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct Gid(u64);

impl Gid {
    /// Wrap a raw identifier (e.g. one decoded from the wire).
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Gid(raw)
    }

    /// Compose a GID minted by `rank` from its local `counter`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use ddd_xfer::ddd::gid::Gid;
    /// let g = Gid::compose(7, 3);
    /// assert_eq!(g.creator(), 3);
    /// ```
    #[inline]
    pub const fn compose(counter: u64, rank: usize) -> Self {
        Gid((counter << GID_RANK_BITS) | (rank as u64 & ((1 << GID_RANK_BITS) - 1)))
    }

    /// Returns the inner `u64` value.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Rank that minted this GID.
    #[inline]
    pub const fn creator(self) -> usize {
        (self.0 & ((1 << GID_RANK_BITS) - 1)) as usize
    }
}

impl fmt::Debug for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Gid").field(&format_args!("{:#x}", self.0)).finish()
    }
}

/// Prints the raw value in hex, the way DDD debug output shows GIDs.
impl fmt::Display for Gid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(Gid, u64);
}
