//! Round context: the identity and endorsement state of one `(height, round)`.

use crate::endorsement_store::{EndorsementStore, StoreError};
use crate::types::{ConsensusVote, EndorsedMessage, Topic};
use rolldpos_types::{Address, Block, Endorsement, H256};
use thiserror::Error;

/// Errors raised while mutating a round.
#[derive(Debug, Error)]
pub enum RoundError {
    /// The endorser is not a delegate of this round
    #[error("{0} is not a delegate of this round")]
    NotADelegate(Address),

    /// The endorsement signature does not verify
    #[error("invalid endorsement signature from {0}")]
    InvalidSignature(Address),

    /// The block proposer is not a delegate of this round
    #[error("block proposer {0} is not a delegate of this round")]
    ProposerNotADelegate(Address),

    /// The block signature does not verify
    #[error("invalid signature on block {0}")]
    InvalidBlockSignature(H256),

    /// Store-level failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One round's identity plus its endorsement store.
///
/// Round contexts are replaced, never mutated in place across heights; the
/// round calculator produces a fresh context whenever the `(height, round)`
/// pair changes.
#[derive(Debug, Clone)]
pub struct RoundContext {
    height: u64,
    epoch_num: u64,
    epoch_start_height: u64,
    round_num: u32,
    round_start_time: u64,
    proposer: Address,
    delegates: Vec<Address>,
    store: EndorsementStore,
}

impl RoundContext {
    /// Assembles a round context.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        height: u64,
        epoch_num: u64,
        epoch_start_height: u64,
        round_num: u32,
        round_start_time: u64,
        proposer: Address,
        delegates: Vec<Address>,
        store: EndorsementStore,
    ) -> Self {
        Self {
            height,
            epoch_num,
            epoch_start_height,
            round_num,
            round_start_time,
            proposer,
            delegates,
            store,
        }
    }

    /// Height this round decides.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Epoch containing the height.
    pub fn epoch_num(&self) -> u64 {
        self.epoch_num
    }

    /// First height of the epoch.
    pub fn epoch_start_height(&self) -> u64 {
        self.epoch_start_height
    }

    /// Round number within the height.
    pub fn number(&self) -> u32 {
        self.round_num
    }

    /// Round start time, unix milliseconds.
    pub fn start_time(&self) -> u64 {
        self.round_start_time
    }

    /// The round's designated proposer.
    pub fn proposer(&self) -> Address {
        self.proposer
    }

    /// The epoch's delegate set, in election order.
    pub fn delegates(&self) -> &[Address] {
        &self.delegates
    }

    /// True iff `address` is a delegate of this round.
    pub fn is_delegate(&self, address: &Address) -> bool {
        self.delegates.contains(address)
    }

    /// Admits a candidate block: the embedded proposer must be a delegate
    /// and the block signature must verify. Duplicate hashes are rejected
    /// by the store.
    pub fn add_block(&mut self, block: Block) -> Result<(), RoundError> {
        let proposer = block.proposer_address();
        if !self.is_delegate(&proposer) {
            return Err(RoundError::ProposerNotADelegate(proposer));
        }
        if !block.verify_signature() {
            return Err(RoundError::InvalidBlockSignature(block.hash()));
        }
        self.store.add_block(block)?;
        Ok(())
    }

    /// Records a vote endorsement after checking that the endorser is a
    /// delegate and the signature verifies. A repeated endorsement from the
    /// same endorser is idempotent.
    pub fn add_vote_endorsement(
        &mut self,
        vote: &ConsensusVote,
        endorsement: Endorsement,
    ) -> Result<(), RoundError> {
        let endorser = endorsement.endorser_address();
        if !self.is_delegate(&endorser) {
            return Err(RoundError::NotADelegate(endorser));
        }
        if !endorsement.verify(vote) {
            return Err(RoundError::InvalidSignature(endorser));
        }
        self.store.add_vote_endorsement(vote, endorsement);
        Ok(())
    }

    /// True iff unique endorsers across `topics` reach a super-majority.
    pub fn endorsed_by_majority(&self, hash: &H256, topics: &[Topic]) -> bool {
        self.store.endorsed_by_majority(hash, topics)
    }

    /// Endorsements recorded at the given topics, unioned by endorser.
    pub fn endorsements(&self, hash: &H256, topics: &[Topic]) -> Vec<Endorsement> {
        self.store.endorsements(hash, topics)
    }

    /// The COMMIT endorsement `endorser` already issued for the locked
    /// block, if any.
    pub fn ready_to_commit(&self, endorser: &Address) -> Option<Endorsement> {
        self.store.ready_to_commit(endorser)
    }

    /// The endorsement bundle justifying the current lock.
    pub fn proof_of_lock(&self) -> Vec<Endorsement> {
        self.store.proof_of_lock()
    }

    /// True if the round holds a lock.
    pub fn is_locked(&self) -> bool {
        self.store.is_locked()
    }

    /// True if a previous lock was displaced this round.
    pub fn is_unlocked(&self) -> bool {
        self.store.is_unlocked()
    }

    /// Hash of the block the round is locked on, if any.
    pub fn locked_hash(&self) -> Option<H256> {
        self.store.locked_hash()
    }

    /// Looks up an admitted block by hash.
    pub fn block(&self, hash: &H256) -> Option<&Block> {
        self.store.block(hash)
    }

    /// Shared access to the endorsement store.
    pub(crate) fn store(&self) -> &EndorsementStore {
        &self.store
    }

    /// An event is stale when its `(height, round)` lexicographically
    /// precedes this round, or matches it while its payload refers to an
    /// artifact the round has already recorded (a COMMIT vote this round
    /// already holds from the same endorser).
    pub fn is_stale(&self, height: u64, round_num: u32, data: Option<&EndorsedMessage>) -> bool {
        if height != self.height {
            return height < self.height;
        }
        if round_num != self.round_num {
            return round_num < self.round_num;
        }
        let Some(message) = data else {
            return false;
        };
        let Some(vote) = message.vote() else {
            return false;
        };
        vote.topic == Topic::Commit
            && self.store.has_endorsed(
                &message.endorsement.endorser_address(),
                &vote.block_hash,
                Topic::Commit,
            )
    }

    /// An event is a future event when its `(height, round)` strictly
    /// follows this round.
    pub fn is_future(&self, height: u64, round_num: u32) -> bool {
        height > self.height || (height == self.height && round_num > self.round_num)
    }
}
