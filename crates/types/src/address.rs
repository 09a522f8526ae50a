//! 20-byte delegate address type.

use crate::{Error, Result};
use rolldpos_crypto::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of an address in bytes.
pub const ADDRESS_SIZE: usize = 20;

/// A 20-byte account address, derived from the Keccak256 hash of the
/// account's public key.
///
/// Addresses are displayed as 40 lowercase hex characters with a `0x`
/// prefix. Byte-wise ordering of addresses is used to break ties when
/// ranking candidates with equal stake.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// The zero address.
    pub const ZERO: Self = Self([0u8; ADDRESS_SIZE]);

    /// Creates a new address from a 20-byte array.
    #[inline]
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates an address from a slice; errors unless it is exactly 20 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != ADDRESS_SIZE {
            return Err(Error::InvalidLength {
                expected: ADDRESS_SIZE,
                actual: slice.len(),
            });
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Derives the address of a public key.
    pub fn from_public_key(public_key: &PublicKey) -> Self {
        Self(public_key.address_bytes())
    }

    /// Returns the address as a byte slice.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True if this is the zero address.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

impl From<[u8; ADDRESS_SIZE]> for Address {
    fn from(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }
}

impl From<Address> for [u8; ADDRESS_SIZE] {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolldpos_crypto::PrivateKey;

    #[test]
    fn hex_roundtrip() {
        let addr = Address::new([0xab; ADDRESS_SIZE]);
        let parsed: Address = addr.to_string().parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn derivation_matches_key() {
        let key = PrivateKey::random();
        let addr = Address::from_public_key(&key.public_key());
        assert_eq!(addr.as_bytes(), key.public_key().address_bytes());
        assert!(!addr.is_zero());
    }

    #[test]
    fn byte_ordering_is_lexicographic() {
        let low = Address::new([0x01; ADDRESS_SIZE]);
        let high = Address::new([0x02; ADDRESS_SIZE]);
        assert!(low < high);
    }
}
