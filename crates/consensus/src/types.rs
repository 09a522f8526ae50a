//! Consensus message types.
//!
//! This module defines the documents exchanged during the four-phase
//! endorsement protocol:
//!
//! - [`Topic`] - the protocol stage a vote belongs to
//! - [`ConsensusVote`] - a `(block hash, topic)` vote
//! - [`BlockProposal`] - a proposed block plus an optional proof-of-lock
//! - [`EndorsedMessage`] - a vote or proposal together with its endorsement

use rolldpos_types::{Block, EndorsedDocument, Endorsement, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain separators for signature security.
///
/// These prefixes prevent signature replay across document kinds: a PROPOSAL
/// vote signature can never be replayed as a LOCK or COMMIT vote, and a vote
/// can never stand in for a block proposal.
pub mod domains {
    /// Domain separator for PROPOSAL votes
    pub const VOTE_PROPOSAL: &[u8] = b"ROLLDPOS_VOTE_PROPOSAL_V1";
    /// Domain separator for LOCK votes
    pub const VOTE_LOCK: &[u8] = b"ROLLDPOS_VOTE_LOCK_V1";
    /// Domain separator for COMMIT votes
    pub const VOTE_COMMIT: &[u8] = b"ROLLDPOS_VOTE_COMMIT_V1";
    /// Domain separator for block proposals
    pub const BLOCK_PROPOSAL: &[u8] = b"ROLLDPOS_BLOCK_PROPOSAL_V1";
}

/// A stage of the four-phase endorsement protocol.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Topic {
    /// Endorses reception of a valid block proposal
    Proposal,
    /// Endorses that a super-majority endorsed the proposal
    Lock,
    /// Endorses that a super-majority locked the block
    Commit,
}

impl Topic {
    /// All topics in protocol order.
    pub const ALL: [Topic; 3] = [Topic::Proposal, Topic::Lock, Topic::Commit];

    /// Whether an endorsement at `self` counts toward a majority query for
    /// `query`: a COMMIT counts as a LOCK, and both count as a PROPOSAL.
    pub fn counts_for(self, query: Topic) -> bool {
        match (self, query) {
            (Topic::Commit, _) => true,
            (Topic::Lock, Topic::Lock | Topic::Proposal) => true,
            (Topic::Proposal, Topic::Proposal) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Proposal => write!(f, "PROPOSAL"),
            Topic::Lock => write!(f, "LOCK"),
            Topic::Commit => write!(f, "COMMIT"),
        }
    }
}

/// A vote over a block hash at a protocol stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusVote {
    /// Hash of the block being voted on
    pub block_hash: H256,
    /// Protocol stage of the vote
    pub topic: Topic,
}

impl ConsensusVote {
    /// Creates a new vote.
    pub fn new(block_hash: H256, topic: Topic) -> Self {
        Self { block_hash, topic }
    }
}

impl EndorsedDocument for ConsensusVote {
    fn signing_bytes(&self) -> Vec<u8> {
        let domain = match self.topic {
            Topic::Proposal => domains::VOTE_PROPOSAL,
            Topic::Lock => domains::VOTE_LOCK,
            Topic::Commit => domains::VOTE_COMMIT,
        };
        let mut bytes = Vec::with_capacity(domain.len() + 32);
        bytes.extend_from_slice(domain);
        bytes.extend_from_slice(self.block_hash.as_bytes());
        bytes
    }
}

/// A block proposal from the round's designated proposer.
///
/// `proof_of_lock` is non-empty only when the proposer re-proposes a block it
/// is locked on, or carries a prior-round unlock proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockProposal {
    /// The proposed block
    pub block: Block,
    /// Endorsements justifying a lock carried over from a prior round
    pub proof_of_lock: Vec<Endorsement>,
}

impl BlockProposal {
    /// Creates a new proposal.
    pub fn new(block: Block, proof_of_lock: Vec<Endorsement>) -> Self {
        Self {
            block,
            proof_of_lock,
        }
    }

    /// Hash of the proposed block.
    pub fn block_hash(&self) -> H256 {
        self.block.hash()
    }
}

impl EndorsedDocument for BlockProposal {
    fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes =
            Vec::with_capacity(domains::BLOCK_PROPOSAL.len() + 32 + self.proof_of_lock.len() * 104);
        bytes.extend_from_slice(domains::BLOCK_PROPOSAL);
        bytes.extend_from_slice(self.block.hash().as_bytes());
        for endorsement in &self.proof_of_lock {
            bytes.extend_from_slice(&endorsement.endorser.to_bytes());
            bytes.extend_from_slice(&endorsement.signature.to_bytes());
            bytes.extend_from_slice(&endorsement.timestamp.to_le_bytes());
        }
        bytes
    }
}

/// A vote or proposal document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMessage {
    /// A block proposal
    Proposal(BlockProposal),
    /// A `(block hash, topic)` vote
    Vote(ConsensusVote),
}

/// An endorsed consensus message: the wire unit of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndorsedMessage {
    /// Height the message refers to
    pub height: u64,
    /// The endorsed document
    pub message: ConsensusMessage,
    /// The delegate's endorsement over the document
    pub endorsement: Endorsement,
}

impl EndorsedMessage {
    /// Creates an endorsed message.
    pub fn new(height: u64, message: ConsensusMessage, endorsement: Endorsement) -> Self {
        Self {
            height,
            message,
            endorsement,
        }
    }

    /// The contained proposal, if any.
    pub fn proposal(&self) -> Option<&BlockProposal> {
        match &self.message {
            ConsensusMessage::Proposal(proposal) => Some(proposal),
            ConsensusMessage::Vote(_) => None,
        }
    }

    /// The contained vote, if any.
    pub fn vote(&self) -> Option<&ConsensusVote> {
        match &self.message {
            ConsensusMessage::Vote(vote) => Some(vote),
            ConsensusMessage::Proposal(_) => None,
        }
    }
}
