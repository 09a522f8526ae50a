//! ECDSA signatures using secp256k1.
//!
//! This module provides the signing and verification primitives used by the
//! consensus node: delegates sign block headers and endorsements with a
//! secp256k1 key, and their 20-byte on-chain address is derived from the
//! Keccak256 hash of the uncompressed public key.
//!
//! ## Key Types
//!
//! - [`PrivateKey`] - 32-byte secret key for signing
//! - [`PublicKey`] - secp256k1 public key (33-byte compressed encoding)
//! - [`Signature`] - 64-byte ECDSA signature
//!
//! ## Example
//!
//! ```rust
//! use rolldpos_crypto::{keccak256, PrivateKey};
//!
//! let private_key = PrivateKey::random();
//! let public_key = private_key.public_key();
//!
//! let digest = keccak256(b"payload");
//! let signature = private_key.sign_digest(&digest).unwrap();
//! assert!(public_key.verify_digest(&digest, &signature));
//!
//! // 20-byte address derived from the public key
//! let address = public_key.address_bytes();
//! assert_eq!(address.len(), 20);
//! ```

use crate::{keccak256, CryptoError, Result};
use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature as K256Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// ECDSA private key (32 bytes).
#[derive(Clone)]
pub struct PrivateKey {
    inner: SigningKey,
}

impl PrivateKey {
    /// Generate a random private key using a cryptographically secure RNG.
    pub fn random() -> Self {
        Self {
            inner: SigningKey::random(&mut OsRng),
        }
    }

    /// Create a private key from raw bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let inner = SigningKey::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Create a private key from a hex string (with or without `0x` prefix).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str)?;
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Self::from_bytes(&arr)
    }

    /// Get the raw bytes of the private key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes().into()
    }

    /// Get the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Sign a 32-byte digest.
    ///
    /// Callers hash their message (normally with Keccak256) before signing.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<Signature> {
        let signature: K256Signature = self
            .inner
            .sign_prehash(digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        Ok(Signature { inner: signature })
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print key material
        write!(f, "PrivateKey(..)")
    }
}

/// secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: VerifyingKey,
}

impl PublicKey {
    /// Create a public key from SEC1-encoded bytes (compressed or uncompressed).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { inner })
    }

    /// Compressed SEC1 encoding (33 bytes).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_encoded_point(true).as_bytes().to_vec()
    }

    /// Verify a signature over a 32-byte digest.
    pub fn verify_digest(&self, digest: &[u8; 32], signature: &Signature) -> bool {
        self.inner.verify_prehash(digest, &signature.inner).is_ok()
    }

    /// Derive the 20-byte address: the low 20 bytes of the Keccak256 hash of
    /// the uncompressed public key.
    pub fn address_bytes(&self) -> [u8; 20] {
        let encoded = self.inner.to_encoded_point(false);
        // Skip the 0x04 uncompressed-point prefix
        let digest = keccak256(&encoded.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&digest[12..]);
        address
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(0x{})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes())))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// ECDSA signature (64 bytes, `r || s`).
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    inner: K256Signature,
}

impl Signature {
    /// Create a signature from a 64-byte `r || s` encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let inner = K256Signature::from_slice(bytes)
            .map_err(|e| CryptoError::InvalidSignature(e.to_string()))?;
        Ok(Self { inner })
    }

    /// The 64-byte `r || s` encoding.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes().into()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(0x{})", hex::encode(self.to_bytes()))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes())))
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = PrivateKey::random();
        let digest = keccak256(b"message");

        let signature = key.sign_digest(&digest).unwrap();
        assert!(key.public_key().verify_digest(&digest, &signature));

        // Tampered digest fails
        let other = keccak256(b"other message");
        assert!(!key.public_key().verify_digest(&other, &signature));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let key = PrivateKey::random();
        let other = PrivateKey::random();
        let digest = keccak256(b"message");

        let signature = key.sign_digest(&digest).unwrap();
        assert!(!other.public_key().verify_digest(&digest, &signature));
    }

    #[test]
    fn key_bytes_roundtrip() {
        let key = PrivateKey::random();
        let restored = PrivateKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(key.public_key(), restored.public_key());

        let pk = key.public_key();
        let restored_pk = PublicKey::from_bytes(&pk.to_bytes()).unwrap();
        assert_eq!(pk, restored_pk);
    }

    #[test]
    fn address_is_stable() {
        let key = PrivateKey::random();
        let a = key.public_key().address_bytes();
        let b = key.public_key().address_bytes();
        assert_eq!(a, b);
    }

    #[test]
    fn signature_serde_roundtrip() {
        let key = PrivateKey::random();
        let digest = keccak256(b"payload");
        let signature = key.sign_digest(&digest).unwrap();

        let json = serde_json::to_string(&signature).unwrap();
        let decoded: Signature = serde_json::from_str(&json).unwrap();
        assert_eq!(signature, decoded);
    }
}
