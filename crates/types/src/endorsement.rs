//! Delegate endorsements over consensus documents.

use crate::{Address, Result};
use rolldpos_crypto::{keccak256_concat, PrivateKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// A document that a delegate can endorse.
///
/// Implementors provide a canonical byte encoding; the endorsement signature
/// covers that encoding together with the endorsement timestamp, so an
/// endorsement of one document can never be replayed for another.
pub trait EndorsedDocument {
    /// Canonical byte encoding of the document for signing.
    fn signing_bytes(&self) -> Vec<u8>;
}

/// A delegate's signed statement over a consensus document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endorsement {
    /// Public key of the endorsing delegate
    pub endorser: PublicKey,
    /// Signature over the document digest and timestamp
    pub signature: Signature,
    /// Wall-clock time of the endorsement, unix milliseconds
    pub timestamp: u64,
}

impl Endorsement {
    /// Signs `document` at `timestamp` with the given key.
    pub fn endorse<D: EndorsedDocument>(
        key: &PrivateKey,
        document: &D,
        timestamp: u64,
    ) -> Result<Self> {
        let digest = Self::digest(document, timestamp);
        let signature = key.sign_digest(&digest)?;
        Ok(Self {
            endorser: key.public_key(),
            signature,
            timestamp,
        })
    }

    /// Verifies the signature against `document`.
    pub fn verify<D: EndorsedDocument>(&self, document: &D) -> bool {
        let digest = Self::digest(document, self.timestamp);
        self.endorser.verify_digest(&digest, &self.signature)
    }

    /// Address of the endorsing delegate.
    pub fn endorser_address(&self) -> Address {
        Address::from_public_key(&self.endorser)
    }

    fn digest<D: EndorsedDocument>(document: &D, timestamp: u64) -> [u8; 32] {
        keccak256_concat(&[&document.signing_bytes(), &timestamp.to_le_bytes()])
    }
}
