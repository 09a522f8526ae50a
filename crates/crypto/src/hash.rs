//! Keccak256 hashing utilities.
//!
//! This module provides the Keccak256 digests used for block hashes, vote
//! digests and address derivation.
//!
//! ## Streaming Hasher
//!
//! For incremental data, use the [`Hasher`] struct:
//!
//! ```rust
//! use rolldpos_crypto::hash::Hasher;
//!
//! let mut hasher = Hasher::new();
//! hasher.update(b"hello");
//! hasher.update(b" world");
//! let digest = hasher.finalize();
//! ```

use sha3::{Digest, Keccak256};

/// Compute the Keccak256 hash of the input data.
///
/// # Example
///
/// ```rust
/// use rolldpos_crypto::keccak256;
///
/// let digest = keccak256(b"hello");
/// assert_eq!(digest.len(), 32);
/// ```
#[inline]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the Keccak256 hash of multiple concatenated inputs.
///
/// Equivalent to hashing the concatenation of `parts` without allocating a
/// temporary buffer.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Streaming Keccak256 hasher for incremental input.
#[derive(Default)]
pub struct Hasher {
    inner: Keccak256,
}

impl Hasher {
    /// Create a new streaming hasher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the hasher and return the digest.
    pub fn finalize(self) -> [u8; 32] {
        self.inner.finalize().into()
    }
}
