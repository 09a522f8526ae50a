//! Block and block header types.
//!
//! A [`Block`] is minted by the round's proposer, signed with the proposer's
//! key, and finalized after consensus with a footer carrying the COMMIT
//! endorsements that justify the commit.

use crate::action::{actions_root, SignedAction};
use crate::{Address, Endorsement, Error, Result, H256};
use rolldpos_crypto::{keccak256, PrivateKey, PublicKey, Signature};
use serde::{Deserialize, Serialize};

/// Header of a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height (genesis is height 0)
    pub height: u64,
    /// Minting time, unix milliseconds
    pub timestamp: u64,
    /// Hash of the parent block
    pub parent_hash: H256,
    /// Root over the block's actions
    pub actions_root: H256,
    /// Public key of the proposer that minted the block
    pub proposer: PublicKey,
    /// Proposer's signature over the header digest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl BlockHeader {
    /// Canonical byte encoding of the header for hashing and signing.
    ///
    /// The proposer signature is not part of the encoding.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16 + 32 + 32 + 33);
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(self.parent_hash.as_bytes());
        bytes.extend_from_slice(self.actions_root.as_bytes());
        bytes.extend_from_slice(&self.proposer.to_bytes());
        bytes
    }

    /// Computes the block hash.
    pub fn hash(&self) -> H256 {
        H256::keccak256(&self.signing_bytes())
    }
}

/// Commit footer attached to a block once consensus is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFooter {
    /// End of the round's pre-commit window, unix milliseconds
    pub commit_timestamp: u64,
    /// COMMIT endorsements justifying the commit
    pub endorsements: Vec<Endorsement>,
}

/// A complete block: header, actions and (after consensus) a commit footer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Actions included in the block
    pub actions: Vec<SignedAction>,
    /// Commit footer, present only on committed blocks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<BlockFooter>,
}

impl Block {
    /// Creates a new unsigned block, computing the actions root.
    pub fn new(
        height: u64,
        timestamp: u64,
        parent_hash: H256,
        actions: Vec<SignedAction>,
        proposer: PublicKey,
    ) -> Self {
        let root = actions_root(&actions);
        Self {
            header: BlockHeader {
                height,
                timestamp,
                parent_hash,
                actions_root: root,
                proposer,
                signature: None,
            },
            actions,
            footer: None,
        }
    }

    /// Block height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Minting time, unix milliseconds.
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// Block hash.
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Address of the proposer that minted the block.
    pub fn proposer_address(&self) -> Address {
        Address::from_public_key(&self.header.proposer)
    }

    /// Signs the block header with the proposer's key.
    pub fn sign(&mut self, key: &PrivateKey) -> Result<()> {
        let digest = keccak256(&self.header.signing_bytes());
        self.header.signature = Some(key.sign_digest(&digest)?);
        Ok(())
    }

    /// Verifies the proposer signature; an unsigned block never verifies.
    pub fn verify_signature(&self) -> bool {
        let Some(signature) = &self.header.signature else {
            return false;
        };
        let digest = keccak256(&self.header.signing_bytes());
        self.header.proposer.verify_digest(&digest, signature)
    }

    /// Attaches the commit footer.
    ///
    /// Errors if the block already carries a footer.
    pub fn finalize(
        &mut self,
        endorsements: Vec<Endorsement>,
        commit_timestamp: u64,
    ) -> Result<()> {
        if self.footer.is_some() {
            return Err(Error::AlreadyFinalized(self.header.height));
        }
        self.footer = Some(BlockFooter {
            commit_timestamp,
            endorsements,
        });
        Ok(())
    }
}
