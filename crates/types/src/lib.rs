//! # Roll-DPoS Types
//!
//! Core type definitions for the Roll-DPoS consensus node:
//!
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - [`Address`] - 20-byte delegate addresses
//! - [`SignedAction`] - user actions carried in blocks
//! - [`Candidate`] - a staked candidate eligible for delegate election
//! - [`Endorsement`] - a delegate's signed statement over a document
//! - [`Block`] and [`BlockHeader`] - block structures with an endorsement footer
//!
//! ## Example
//!
//! ```rust
//! use rolldpos_types::{Address, H256};
//!
//! let hash = H256::keccak256(b"hello world");
//! assert_ne!(hash, H256::NIL);
//!
//! let addr: Address = "0x742d35cc6634c0532925a3b844bc9e7595f0beb1".parse().unwrap();
//! assert_eq!(addr.to_string().len(), 42);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod action;
pub mod address;
pub mod block;
pub mod candidate;
pub mod endorsement;
pub mod hash;

pub use action::{actions_root, SignedAction};
pub use address::Address;
pub use block::{Block, BlockFooter, BlockHeader};
pub use candidate::Candidate;
pub use endorsement::{EndorsedDocument, Endorsement};
pub use hash::H256;

/// Result type alias for type-level operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with core types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid input length
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected byte length
        expected: usize,
        /// Actual byte length
        actual: usize,
    },

    /// Block already carries a commit footer
    #[error("block at height {0} is already finalized")]
    AlreadyFinalized(u64),

    /// Cryptographic operation failed
    #[error(transparent)]
    Crypto(#[from] rolldpos_crypto::CryptoError),
}
