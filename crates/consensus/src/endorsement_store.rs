//! Per-round endorsement accumulation and lock tracking.
//!
//! The store indexes endorsements by `(block hash, topic, endorser)` and
//! answers super-majority queries with topic subsumption: a COMMIT
//! endorsement counts as a LOCK endorsement, and both count as a PROPOSAL
//! endorsement.
//!
//! The store is pure in-memory state with no I/O and is not thread-safe by
//! itself; the consensus context provides synchronization.

use crate::types::{ConsensusVote, Topic};
use rolldpos_types::{Address, Block, Endorsement, H256};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Errors raised by the endorsement store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A block with the same hash was already admitted this round
    #[error("block {0} already exists in this round")]
    BlockAlreadyExists(H256),
}

/// Accumulates blocks and endorsements for a single round.
#[derive(Debug, Clone)]
pub struct EndorsementStore {
    /// Size of the round's delegate set, fixing the majority threshold.
    num_delegates: usize,
    /// Candidate blocks by hash.
    blocks: HashMap<H256, Block>,
    /// Endorsements per block hash, per topic, keyed by unique endorser.
    /// First endorsement per `(endorser, hash, topic)` wins.
    endorsements: HashMap<H256, BTreeMap<Topic, HashMap<Address, Endorsement>>>,
    /// Hash the round is currently locked on.
    lock: Option<H256>,
    /// Whether a previous lock was displaced by another hash this round.
    displaced: bool,
}

impl EndorsementStore {
    /// Creates an empty store for a round with `num_delegates` delegates.
    pub fn new(num_delegates: usize) -> Self {
        Self {
            num_delegates,
            blocks: HashMap::new(),
            endorsements: HashMap::new(),
            lock: None,
            displaced: false,
        }
    }

    /// The minimum endorser count for a super-majority: strictly more than
    /// two thirds of the delegate set.
    pub fn majority_threshold(&self) -> usize {
        self.num_delegates * 2 / 3 + 1
    }

    /// Admits a candidate block.
    pub fn add_block(&mut self, block: Block) -> Result<(), StoreError> {
        let hash = block.hash();
        if self.blocks.contains_key(&hash) {
            return Err(StoreError::BlockAlreadyExists(hash));
        }
        self.blocks.insert(hash, block);
        Ok(())
    }

    /// Looks up an admitted block by hash.
    pub fn block(&self, hash: &H256) -> Option<&Block> {
        self.blocks.get(hash)
    }

    /// Records a vote endorsement. A duplicate from the same endorser for the
    /// same `(hash, topic)` is idempotent, not an error.
    ///
    /// Lock status is recomputed on every admission: the voted hash locks
    /// when it first reaches a super-majority under {PROPOSAL, COMMIT}, and
    /// an existing lock moves only when a different hash reaches the same.
    pub fn add_vote_endorsement(&mut self, vote: &ConsensusVote, endorsement: Endorsement) {
        let endorser = endorsement.endorser_address();
        self.endorsements
            .entry(vote.block_hash)
            .or_default()
            .entry(vote.topic)
            .or_default()
            .entry(endorser)
            .or_insert(endorsement);
        self.refresh_lock(vote.block_hash);
    }

    /// Whether the endorser has already endorsed `(hash, topic)`.
    pub fn has_endorsed(&self, endorser: &Address, hash: &H256, topic: Topic) -> bool {
        self.endorsements
            .get(hash)
            .and_then(|by_topic| by_topic.get(&topic))
            .is_some_and(|by_endorser| by_endorser.contains_key(endorser))
    }

    /// Number of unique endorsers counting toward the queried topics, with
    /// topic subsumption.
    pub fn endorser_count(&self, hash: &H256, topics: &[Topic]) -> usize {
        let Some(by_topic) = self.endorsements.get(hash) else {
            return 0;
        };
        let mut endorsers: HashSet<&Address> = HashSet::new();
        for (stored_topic, by_endorser) in by_topic {
            if topics.iter().any(|query| stored_topic.counts_for(*query)) {
                endorsers.extend(by_endorser.keys());
            }
        }
        endorsers.len()
    }

    /// True iff the unique endorsers across `topics` reach a super-majority.
    pub fn endorsed_by_majority(&self, hash: &H256, topics: &[Topic]) -> bool {
        self.endorser_count(hash, topics) >= self.majority_threshold()
    }

    /// Endorsements recorded at exactly the given topics, unioned by
    /// endorser; the first topic in `topics` wins for an endorser that
    /// endorsed several of them.
    ///
    /// Unlike the majority queries this does not apply subsumption, so the
    /// result stays verifiable against each endorsement's original topic.
    pub fn endorsements(&self, hash: &H256, topics: &[Topic]) -> Vec<Endorsement> {
        let Some(by_topic) = self.endorsements.get(hash) else {
            return Vec::new();
        };
        let mut seen: HashSet<Address> = HashSet::new();
        let mut result = Vec::new();
        for topic in topics {
            if let Some(by_endorser) = by_topic.get(topic) {
                for (endorser, endorsement) in by_endorser {
                    if seen.insert(*endorser) {
                        result.push(endorsement.clone());
                    }
                }
            }
        }
        result
    }

    /// The COMMIT endorsement `endorser` previously issued for the locked
    /// block, if any.
    pub fn ready_to_commit(&self, endorser: &Address) -> Option<Endorsement> {
        let locked = self.lock?;
        self.endorsements
            .get(&locked)?
            .get(&Topic::Commit)?
            .get(endorser)
            .cloned()
    }

    /// The endorsement bundle justifying the current lock: PROPOSAL and
    /// COMMIT endorsements of the locked hash.
    pub fn proof_of_lock(&self) -> Vec<Endorsement> {
        match self.lock {
            Some(locked) => self.endorsements(&locked, &[Topic::Proposal, Topic::Commit]),
            None => Vec::new(),
        }
    }

    /// Hash the round is locked on, if any.
    pub fn locked_hash(&self) -> Option<H256> {
        self.lock
    }

    /// True if the round holds a lock.
    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }

    /// True if a previous lock was displaced this round.
    pub fn is_unlocked(&self) -> bool {
        self.displaced
    }

    /// Builds the store for the next round at the same height: the locked
    /// block and the endorsements justifying the lock are cloned into a
    /// fresh store, everything else is dropped.
    pub fn carryover(&self) -> Self {
        let mut next = Self::new(self.num_delegates);
        let Some(locked) = self.lock else {
            return next;
        };
        if let Some(block) = self.blocks.get(&locked) {
            next.blocks.insert(locked, block.clone());
        }
        if let Some(by_topic) = self.endorsements.get(&locked) {
            let carried: BTreeMap<Topic, HashMap<Address, Endorsement>> = by_topic
                .iter()
                .filter(|(topic, _)| matches!(topic, Topic::Proposal | Topic::Commit))
                .map(|(topic, by_endorser)| (*topic, by_endorser.clone()))
                .collect();
            next.endorsements.insert(locked, carried);
        }
        next.lock = Some(locked);
        next
    }

    fn refresh_lock(&mut self, hash: H256) {
        if !self.endorsed_by_majority(&hash, &[Topic::Proposal, Topic::Commit]) {
            return;
        }
        match self.lock {
            Some(locked) if locked == hash => {}
            Some(locked) => {
                debug!(old = %locked, new = %hash, "lock displaced");
                self.displaced = true;
                self.lock = Some(hash);
            }
            None => {
                debug!(block = %hash, "locked");
                self.lock = Some(hash);
            }
        }
    }
}
