//! User actions carried in blocks.

use crate::{Address, H256};
use serde::{Deserialize, Serialize};

/// A signed user action pending execution.
///
/// The consensus core treats actions as opaque payloads: it drains them from
/// the action pool when minting and never inspects their semantics. Only the
/// sender, nonce and payload bytes participate in the action hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAction {
    /// Account that issued the action
    pub sender: Address,
    /// Sender's account nonce
    pub nonce: u64,
    /// Opaque action payload
    pub payload: Vec<u8>,
}

impl SignedAction {
    /// Creates a new action.
    pub fn new(sender: Address, nonce: u64, payload: Vec<u8>) -> Self {
        Self {
            sender,
            nonce,
            payload,
        }
    }

    /// Computes the action hash.
    pub fn hash(&self) -> H256 {
        let mut bytes = Vec::with_capacity(28 + self.payload.len());
        bytes.extend_from_slice(self.sender.as_bytes());
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes.extend_from_slice(&self.payload);
        H256::keccak256(&bytes)
    }
}

/// Computes the Keccak256 root over an ordered list of action hashes.
///
/// An empty list yields [`H256::NIL`].
pub fn actions_root(actions: &[SignedAction]) -> H256 {
    if actions.is_empty() {
        return H256::NIL;
    }
    let mut bytes = Vec::with_capacity(actions.len() * 32);
    for action in actions {
        bytes.extend_from_slice(action.hash().as_bytes());
    }
    H256::keccak256(&bytes)
}
