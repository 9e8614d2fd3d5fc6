//! Structural hashes used as cache keys and cheap change detectors.
//!
//! A [`StructuralHash`] is a 128-bit fingerprint of persistent state. Hashes are
//! built by appending data to a [`StructuralHasher`]; appending is
//! order-sensitive, so `a` then `b` differs from `b` then `a`.
//!
//! Hashing is seedless (blake3 under the hood), so the same values hash
//! identically across sessions and processes.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A 128-bit content fingerprint.
///
/// The default value is the all-zero hash, which no [`StructuralHasher`] ever
/// produces in practice.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct StructuralHash([u64; 2]);

impl StructuralHash {
    /// Hash a single value.
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = StructuralHasher::new();
        hasher.append(value);
        hasher.finish_structural()
    }

    /// Build a hash from its raw words.
    pub const fn from_words(high: u64, low: u64) -> Self {
        Self([high, low])
    }

    /// The raw words of this hash.
    pub const fn words(&self) -> [u64; 2] {
        self.0
    }

    /// Return a new hash combining `self` followed by `other`.
    #[must_use]
    pub fn combine(self, other: StructuralHash) -> Self {
        let mut hasher = StructuralHasher::new();
        hasher.append_hash(self);
        hasher.append_hash(other);
        hasher.finish_structural()
    }

    /// Append arbitrary data to this hash in place.
    pub fn append<T: Hash + ?Sized>(&mut self, value: &T) {
        let mut hasher = StructuralHasher::new();
        hasher.append_hash(*self);
        hasher.append(value);
        *self = hasher.finish_structural();
    }

    /// Low 64 bits, used for shard selection.
    pub(crate) fn low(&self) -> u64 {
        self.0[1]
    }
}

impl fmt::Debug for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructuralHash({})", self)
    }
}

impl fmt::Display for StructuralHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.0[0], self.0[1])
    }
}

/// Incremental builder for [`StructuralHash`].
///
/// Implements [`std::hash::Hasher`], so any `Hash` type can be fed into it.
/// The hasher remembers whether anything was appended; producers that leave it
/// untouched are treated as not having implemented hashing at all.
#[derive(Clone)]
pub struct StructuralHasher {
    inner: blake3::Hasher,
    touched: bool,
}

impl Default for StructuralHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl StructuralHasher {
    /// Create an empty hasher.
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
            touched: false,
        }
    }

    /// Append a hashable value.
    pub fn append<T: Hash + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.hash(self);
        self
    }

    /// Append a previously computed hash.
    pub fn append_hash(&mut self, hash: StructuralHash) -> &mut Self {
        self.write(&hash.0[0].to_le_bytes());
        self.write(&hash.0[1].to_le_bytes());
        self
    }

    /// Returns true if nothing has been appended yet.
    pub fn is_empty(&self) -> bool {
        !self.touched
    }

    /// Produce the 128-bit hash of everything appended so far.
    pub fn finish_structural(&self) -> StructuralHash {
        let digest = self.inner.finalize();
        let bytes = digest.as_bytes();
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&bytes[0..8]);
        low.copy_from_slice(&bytes[8..16]);
        StructuralHash([u64::from_le_bytes(high), u64::from_le_bytes(low)])
    }
}

impl Hasher for StructuralHasher {
    fn finish(&self) -> u64 {
        self.finish_structural().low()
    }

    fn write(&mut self, bytes: &[u8]) {
        self.touched = true;
        self.inner.update(bytes);
    }
}
