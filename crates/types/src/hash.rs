//! 32-byte hash type with Keccak256 support.

use crate::{Error, Result};
use rolldpos_crypto::keccak256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of a hash in bytes.
pub const HASH_SIZE: usize = 32;

/// A 32-byte hash value.
///
/// Used throughout the node for block hashes, action roots and other
/// cryptographic digests.
///
/// # Example
///
/// ```rust
/// use rolldpos_types::H256;
///
/// let hash = H256::keccak256(b"hello world");
/// assert_ne!(hash, H256::NIL);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct H256([u8; HASH_SIZE]);

impl H256 {
    /// The nil hash (all zeros), used to represent "no hash".
    pub const NIL: Self = Self([0u8; HASH_SIZE]);

    /// Creates a new hash from a 32-byte array.
    #[inline]
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a hash from a slice; errors unless it is exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != HASH_SIZE {
            return Err(Error::InvalidLength {
                expected: HASH_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; HASH_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Computes the Keccak256 hash of the given data.
    pub fn keccak256(data: &[u8]) -> Self {
        Self(keccak256(data))
    }

    /// Returns the hash as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the hash as a fixed-size byte array.
    #[inline]
    pub const fn to_fixed_bytes(self) -> [u8; HASH_SIZE] {
        self.0
    }

    /// True if this is the nil (all-zero) hash.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }

    /// Short hex form for log lines (first four bytes).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({self})")
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; HASH_SIZE]> for H256 {
    fn from(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<H256> for [u8; HASH_SIZE] {
    fn from(hash: H256) -> Self {
        hash.0
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip() {
        let hash = H256::keccak256(b"abc");
        let parsed: H256 = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn nil_is_default() {
        assert_eq!(H256::default(), H256::NIL);
        assert!(H256::NIL.is_nil());
        assert!(!H256::keccak256(b"x").is_nil());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(H256::from_slice(&[0u8; 31]).is_err());
        assert!(H256::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn serde_as_hex_string() {
        let hash = H256::keccak256(b"abc");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let decoded: H256 = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, decoded);
    }
}
