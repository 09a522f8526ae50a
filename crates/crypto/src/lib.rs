//! # Roll-DPoS Crypto
//!
//! Cryptographic primitives for the Roll-DPoS consensus node.
//!
//! This crate provides:
//! - **Keccak256 hashing** - digests for blocks, votes and address derivation
//! - **ECDSA signatures** - secp256k1 signing and verification
//!
//! ## Example
//!
//! ```rust
//! use rolldpos_crypto::{keccak256, PrivateKey};
//!
//! // Hash some data
//! let digest = keccak256(b"hello world");
//!
//! // Generate a key and sign the digest
//! let private_key = PrivateKey::random();
//! let signature = private_key.sign_digest(&digest).unwrap();
//!
//! // Verify the signature
//! assert!(private_key.public_key().verify_digest(&digest, &signature));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod ecdsa;
pub mod hash;

pub use ecdsa::{PrivateKey, PublicKey, Signature};
pub use hash::{keccak256, keccak256_concat, Hasher};

/// Common type alias for a 32-byte digest.
pub type Digest = [u8; 32];

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Invalid private key bytes
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// Invalid public key bytes
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Invalid signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Signing failed
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Invalid input length
    #[error("invalid input length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// Result type alias for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
