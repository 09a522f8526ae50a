//! The consensus context: thread-safe façade over the round state.
//!
//! [`ConsensusContext`] bundles the round calculator, the current round
//! context and the node's crypto identity behind a single readers-writer
//! lock, and exposes the action interface the consensus FSM drives. It is
//! also entered from network-ingress threads through the
//! [`check_vote_endorser`](ConsensusContext::check_vote_endorser) and
//! [`check_block_proposer`](ConsensusContext::check_block_proposer)
//! validations.
//!
//! Read-only queries take the read lock; actions that advance or mutate the
//! round (`prepare`, the endorsement-producing actions, `commit`,
//! `activate`) take the write lock. Only
//! [`wait_until_round_start`](ConsensusContext::wait_until_round_start)
//! suspends, and it sleeps on the injected clock without holding the lock.

use crate::config::ConsensusConfig;
use crate::fsm::{ConsensusEvent, EventKind, State};
use crate::metrics;
use crate::round::{RoundContext, RoundError};
use crate::round_calculator::{CalculatorError, RoundCalculator};
use crate::traits::{ActionPool, Broadcast, Chain, ChainError, Clock};
use crate::types::{BlockProposal, ConsensusMessage, ConsensusVote, EndorsedMessage, Topic};
use parking_lot::RwLock;
use rolldpos_crypto::PrivateKey;
use rolldpos_types::{Address, Endorsement, H256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors raised by consensus context actions.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The message payload does not match the expected document kind
    #[error("invalid consensus message")]
    InvalidMessage,

    /// The proposal's block is for a different height
    #[error("block height {actual} different from expected {expected}")]
    HeightMismatch {
        /// Height the message claims
        expected: u64,
        /// Height embedded in the block
        actual: u64,
    },

    /// The sender is not the designated proposer of the round
    #[error("{got} is not the proposer of the corresponding round, {expected} expected")]
    WrongProposer {
        /// The designated proposer
        expected: Address,
        /// The address that actually proposed
        got: Address,
    },

    /// A proof-of-lock did not reach a super-majority
    #[error("failed to verify proof of lock for {0}: insufficient endorsements")]
    InsufficientEndorsements(H256),

    /// The locked block is missing from the round
    #[error("no block {0} in the current round")]
    MissingBlock(H256),

    /// Round-level rejection
    #[error(transparent)]
    Round(#[from] RoundError),

    /// Round calculation failed
    #[error(transparent)]
    Calculator(#[from] CalculatorError),

    /// Chain collaborator failure
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Signing or finalization failure
    #[error(transparent)]
    Types(#[from] rolldpos_types::Error),
}

/// Result alias for context actions.
pub type ContextResult<T> = Result<T, ContextError>;

struct Inner {
    round: RoundContext,
    active: bool,
}

/// Thread-safe consensus state shared between the FSM, network ingress and
/// block production.
pub struct ConsensusContext {
    config: ConsensusConfig,
    chain: Arc<dyn Chain>,
    action_pool: Arc<dyn ActionPool>,
    broadcast_handler: Arc<dyn Broadcast>,
    clock: Arc<dyn Clock>,
    calculator: RoundCalculator,
    address: Address,
    key: PrivateKey,
    inner: RwLock<Inner>,
}

impl ConsensusContext {
    /// Builds the consensus context and its initial round.
    ///
    /// # Panics
    ///
    /// Panics when the configured phase TTLs do not fit inside one block
    /// interval; running with such timing can never commit within a round,
    /// so construction refuses it outright.
    pub fn new(
        config: ConsensusConfig,
        active: bool,
        chain: Arc<dyn Chain>,
        action_pool: Arc<dyn ActionPool>,
        broadcast_handler: Arc<dyn Broadcast>,
        clock: Arc<dyn Clock>,
        key: PrivateKey,
    ) -> ContextResult<Self> {
        if let Err(e) = config.validate() {
            panic!("invalid consensus configuration: {e}");
        }
        let calculator = RoundCalculator::new(chain.clone(), &config);
        let round = calculator.new_round_with_toleration(0, clock.now())?;
        let address = Address::from_public_key(&key.public_key());
        Ok(Self {
            config,
            chain,
            action_pool,
            broadcast_handler,
            clock,
            calculator,
            address,
            key,
            inner: RwLock::new(Inner { round, active }),
        })
    }

    /// This node's delegate address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The injected clock.
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// The active configuration.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Height of the current round.
    pub fn height(&self) -> u64 {
        self.inner.read().round.height()
    }

    /// Recomputes the round for `tip + 1` at the current wall time and
    /// replaces the round context. Idempotent within one `(height, round)`.
    pub fn prepare(&self) -> ContextResult<()> {
        let mut inner = self.inner.write();
        let height = self.chain.tip_height() + 1;
        let now = self.clock.now();
        let round = self.calculator.update_round(&inner.round, height, now)?;
        debug!(
            height = round.height(),
            epoch = round.epoch_num(),
            epoch_start_height = round.epoch_start_height(),
            round = round.number(),
            round_start_time = round.start_time(),
            "new round"
        );
        metrics::set_height(round.height());
        metrics::set_round(round.number());
        inner.round = round;
        Ok(())
    }

    /// True iff the node is active and in the current round's delegate set.
    pub fn is_delegate(&self) -> bool {
        let inner = self.inner.read();
        if !inner.active {
            info!("current node is in standby mode");
            return false;
        }
        inner.round.is_delegate(&self.address)
    }

    /// Sleeps until the round starts; returns how late the caller already is.
    ///
    /// Cancellation of the enclosing task interrupts the sleep without
    /// error; the elapsed value is best-effort.
    pub async fn wait_until_round_start(&self) -> Duration {
        let start = self.inner.read().round.start_time();
        let now = self.clock.now();
        if now < start {
            self.clock.sleep(Duration::from_millis(start - now)).await;
            return Duration::ZERO;
        }
        Duration::from_millis(now - start)
    }

    /// Produces this round's block proposal if the node is the designated
    /// proposer: a re-proposal of the locked block with proof-of-lock when
    /// locked, a freshly minted block otherwise.
    pub fn proposal(&self) -> ContextResult<Option<EndorsedMessage>> {
        let inner = self.inner.read();
        if !inner.active || inner.round.proposer() != self.address {
            return Ok(None);
        }
        if let Some(locked) = inner.round.locked_hash() {
            let block = inner
                .round
                .block(&locked)
                .cloned()
                .ok_or(ContextError::MissingBlock(locked))?;
            let proposal = BlockProposal::new(block, inner.round.proof_of_lock());
            return self.endorse_proposal(&inner.round, proposal).map(Some);
        }
        self.mint_new_block(&inner.round).map(Some)
    }

    /// Handles a received block proposal, or honors the lock when the
    /// accept-block window expired without one (`message == None`).
    ///
    /// Returns the node's PROPOSAL endorsement, or `None` when there is
    /// nothing to endorse.
    pub fn new_proposal_endorsement(
        &self,
        message: Option<&EndorsedMessage>,
    ) -> ContextResult<Option<EndorsedMessage>> {
        let mut inner = self.inner.write();
        let block_hash = match message {
            Some(message) => {
                let proposal = message.proposal().ok_or(ContextError::InvalidMessage)?;
                let hash = proposal.block_hash();
                if inner.round.block(&hash).is_none() {
                    let expected = self
                        .calculator
                        .proposer(proposal.block.height(), proposal.block.timestamp())?;
                    let got = proposal.block.proposer_address();
                    if expected != got {
                        return Err(ContextError::WrongProposer { expected, got });
                    }
                    self.chain.validate_block(&proposal.block)?;
                    inner.round.add_block(proposal.block.clone())?;
                }
                debug!(block = %hash, "accept block proposal");
                hash
            }
            None => match inner.round.locked_hash() {
                Some(locked) => locked,
                None => return Ok(None),
            },
        };
        let deadline = inner.round.start_time() + self.ttl_ms(&[self.config.fsm.accept_block_ttl]);
        self.new_vote_message(&inner.round, block_hash, Topic::Proposal, deadline)
            .map(Some)
    }

    /// Records an incoming PROPOSAL endorsement; once PROPOSAL ∪ COMMIT
    /// reaches a super-majority for some hash, returns this node's LOCK
    /// endorsement for it. Insufficient endorsements yield `None`.
    pub fn new_lock_endorsement(
        &self,
        message: &EndorsedMessage,
    ) -> ContextResult<Option<EndorsedMessage>> {
        let mut inner = self.inner.write();
        let (block_hash, majority) =
            self.verify_vote(&mut inner.round, message, &[Topic::Proposal, Topic::Commit])?;
        if !majority {
            return Ok(None);
        }
        debug!(block = %block_hash, "locked");
        let deadline = inner.round.start_time()
            + self.ttl_ms(&[
                self.config.fsm.accept_block_ttl,
                self.config.fsm.accept_proposal_endorsement_ttl,
            ]);
        self.new_vote_message(&inner.round, block_hash, Topic::Lock, deadline)
            .map(Some)
    }

    /// Records an incoming LOCK endorsement; once LOCK ∪ COMMIT reaches a
    /// super-majority, returns this node's COMMIT endorsement.
    pub fn new_pre_commit_endorsement(
        &self,
        message: &EndorsedMessage,
    ) -> ContextResult<Option<EndorsedMessage>> {
        let mut inner = self.inner.write();
        let (block_hash, majority) =
            self.verify_vote(&mut inner.round, message, &[Topic::Lock, Topic::Commit])?;
        if !majority {
            return Ok(None);
        }
        debug!(block = %block_hash, "ready to pre-commit");
        let deadline = inner.round.start_time()
            + self.ttl_ms(&[
                self.config.fsm.accept_block_ttl,
                self.config.fsm.accept_proposal_endorsement_ttl,
                self.config.fsm.accept_lock_endorsement_ttl,
            ]);
        self.new_vote_message(&inner.round, block_hash, Topic::Commit, deadline)
            .map(Some)
    }

    /// Records an incoming COMMIT endorsement; once COMMIT reaches a
    /// super-majority, finalizes the pending block, commits it to the chain,
    /// resets the action pool and broadcasts the committed block.
    ///
    /// Returns `true` iff the block is now at the chain's tip, including
    /// the case where another node already committed this height.
    pub fn commit(&self, message: &EndorsedMessage) -> ContextResult<bool> {
        let mut inner = self.inner.write();
        let (block_hash, majority) = self.verify_vote(&mut inner.round, message, &[Topic::Commit])?;
        if !majority {
            return Ok(false);
        }
        debug!(block = %block_hash, "ready to commit");
        // Only endorsements of received blocks are accepted, so the lookup
        // cannot fail in practice
        let Some(block) = inner.round.block(&block_hash).cloned() else {
            return Ok(false);
        };
        info!(height = inner.round.height(), "consensus reached");

        let mut block = block;
        let commit_deadline = inner.round.start_time()
            + self.ttl_ms(&[
                self.config.fsm.accept_block_ttl,
                self.config.fsm.accept_proposal_endorsement_ttl,
                self.config.fsm.accept_lock_endorsement_ttl,
            ]);
        block.finalize(
            inner.round.endorsements(&block_hash, &[Topic::Commit]),
            commit_deadline,
        )?;

        match self.chain.commit_block(block.clone()) {
            Ok(()) => {}
            // Someone else already committed this height, nothing left to do
            Err(ChainError::InvalidTipHeight { .. }) => return Ok(true),
            Err(e) => return Err(e.into()),
        }
        self.action_pool.reset();

        match serde_json::to_vec(&block) {
            Ok(bytes) => {
                if let Err(e) = self.broadcast_handler.send(&bytes) {
                    error!(error = %e, height = block.height(), "failed to broadcast committed block");
                }
            }
            Err(e) => error!(error = %e, height = block.height(), "failed to serialize committed block"),
        }

        metrics::set_consensus_duration_ms(
            self.clock.now().saturating_sub(inner.round.start_time()),
        );
        if block.height() > 1 {
            match self.chain.block_header_by_height(block.height() - 1) {
                Ok(previous) => metrics::set_block_interval_ms(
                    block.timestamp().saturating_sub(previous.timestamp),
                ),
                Err(e) => error!(error = %e, height = block.height() - 1, "failed to read previous block header"),
            }
        }
        Ok(true)
    }

    /// Serializes an endorsed message and hands it to the broadcast sink.
    /// Failures are logged, never raised.
    pub fn broadcast(&self, message: &EndorsedMessage) {
        match serde_json::to_vec(message) {
            Ok(bytes) => {
                if let Err(e) = self.broadcast_handler.send(&bytes) {
                    error!(error = %e, "failed to broadcast consensus message");
                }
            }
            Err(e) => error!(error = %e, "failed to serialize consensus message"),
        }
    }

    /// This node's own COMMIT endorsement for the locked block, if it
    /// already issued one; used to short-circuit the pre-commit phase.
    pub fn pre_commit_endorsement(&self) -> Option<EndorsedMessage> {
        let inner = self.inner.read();
        let endorsement = inner.round.ready_to_commit(&self.address)?;
        let locked = inner.round.locked_hash()?;
        Some(EndorsedMessage::new(
            inner.round.height(),
            ConsensusMessage::Vote(ConsensusVote::new(locked, Topic::Commit)),
            endorsement,
        ))
    }

    /// True iff the event precedes the current round or refers to an
    /// artifact the round has already recorded.
    pub fn is_stale_event(&self, event: &ConsensusEvent) -> bool {
        let inner = self.inner.read();
        inner
            .round
            .is_stale(event.height(), event.round_num(), event.message())
    }

    /// True iff the event strictly follows the current round.
    pub fn is_future_event(&self, event: &ConsensusEvent) -> bool {
        let inner = self.inner.read();
        inner.round.is_future(event.height(), event.round_num())
    }

    /// True iff the event's age exceeds the unmatched-event TTL.
    pub fn is_stale_unmatched_event(&self, event: &ConsensusEvent) -> bool {
        let age = self.clock.now().saturating_sub(event.created_at());
        age > self.config.fsm.unmatched_event_ttl.as_millis() as u64
    }

    /// Tags an event with `(height, round, now)`. For an endorsed message
    /// the height and round derive from the message itself via the round
    /// calculator; round calculation failures drop the event with a log
    /// line.
    pub fn new_consensus_event(
        &self,
        kind: EventKind,
        message: Option<EndorsedMessage>,
    ) -> Option<ConsensusEvent> {
        match message {
            Some(message) => {
                let height = message.height;
                let timestamp = message.endorsement.timestamp;
                match self.calculator.round_info(height, timestamp) {
                    Ok((round_num, _)) => Some(ConsensusEvent::new(
                        kind,
                        Some(message),
                        height,
                        round_num,
                        self.clock.now(),
                    )),
                    Err(e) => {
                        error!(
                            error = %e,
                            height,
                            timestamp,
                            "failed to calculate round for consensus event"
                        );
                        None
                    }
                }
            }
            None => {
                let inner = self.inner.read();
                Some(ConsensusEvent::new(
                    kind,
                    None,
                    inner.round.height(),
                    inner.round.number(),
                    self.clock.now(),
                ))
            }
        }
    }

    /// An event that forces the FSM into `state` without side effects;
    /// testing and operational recovery hook.
    pub fn new_backdoor_event(&self, state: State) -> ConsensusEvent {
        let inner = self.inner.read();
        ConsensusEvent::new(
            EventKind::Backdoor(state),
            None,
            inner.round.height(),
            inner.round.number(),
            self.clock.now(),
        )
    }

    /// Idempotent mode switch. A deactivated node keeps tracking state and
    /// validating, but never proposes and reports itself as a non-delegate.
    pub fn activate(&self, active: bool) {
        self.inner.write().active = active;
    }

    /// Whether the node currently participates actively.
    pub fn active(&self) -> bool {
        self.inner.read().active
    }

    /// Validates that the endorser of `vote` is a delegate at `height` and
    /// that the endorsement signature verifies. Used on network ingress.
    pub fn check_vote_endorser(
        &self,
        height: u64,
        vote: &ConsensusVote,
        endorsement: &Endorsement,
    ) -> ContextResult<()> {
        let _inner = self.inner.read();
        let endorser = endorsement.endorser_address();
        if !self.calculator.is_delegate(&endorser, height)? {
            return Err(RoundError::NotADelegate(endorser).into());
        }
        if !endorsement.verify(vote) {
            return Err(RoundError::InvalidSignature(endorser).into());
        }
        Ok(())
    }

    /// Validates a block proposal arriving from the network, including the
    /// lock-carryover path for re-proposals endorsed by a proposer of a
    /// later round.
    pub fn check_block_proposer(
        &self,
        height: u64,
        proposal: &BlockProposal,
        endorsement: &Endorsement,
    ) -> ContextResult<()> {
        let _inner = self.inner.read();
        if height != proposal.block.height() {
            return Err(ContextError::HeightMismatch {
                expected: height,
                actual: proposal.block.height(),
            });
        }
        let endorser = endorsement.endorser_address();
        let expected = self.calculator.proposer(height, endorsement.timestamp)?;
        if expected != endorser {
            return Err(ContextError::WrongProposer {
                expected,
                got: endorser,
            });
        }
        let block_proposer = proposal.block.proposer_address();
        let expected_at_mint = self
            .calculator
            .proposer(height, proposal.block.timestamp())?;
        if expected_at_mint != block_proposer {
            return Err(ContextError::WrongProposer {
                expected: expected_at_mint,
                got: block_proposer,
            });
        }
        if !endorsement.verify(proposal) {
            return Err(RoundError::InvalidSignature(endorser).into());
        }
        if !proposal.block.verify_signature() {
            return Err(RoundError::InvalidBlockSignature(proposal.block_hash()).into());
        }
        if block_proposer != endorser {
            // A later-round proposer re-proposing someone else's block must
            // justify it with a proof-of-lock gathered in a prior round
            self.verify_proof_of_lock(height, proposal, endorsement.timestamp)?;
        }
        Ok(())
    }

    fn verify_proof_of_lock(
        &self,
        height: u64,
        proposal: &BlockProposal,
        timestamp: u64,
    ) -> ContextResult<()> {
        let mut round = self.calculator.new_round(height, timestamp)?;
        round.add_block(proposal.block.clone())?;
        let block_hash = proposal.block_hash();
        for endorsement in &proposal.proof_of_lock {
            let as_proposal = ConsensusVote::new(block_hash, Topic::Proposal);
            if round
                .add_vote_endorsement(&as_proposal, endorsement.clone())
                .is_ok()
            {
                continue;
            }
            let as_commit = ConsensusVote::new(block_hash, Topic::Commit);
            round.add_vote_endorsement(&as_commit, endorsement.clone())?;
        }
        if !round.endorsed_by_majority(&block_hash, &[Topic::Proposal, Topic::Commit]) {
            warn!(block = %block_hash, height, "proof of lock does not reach a super-majority");
            return Err(ContextError::InsufficientEndorsements(block_hash));
        }
        Ok(())
    }

    fn mint_new_block(&self, round: &RoundContext) -> ContextResult<EndorsedMessage> {
        let actions = self.action_pool.pending_action_map();
        debug!(senders = actions.len(), "picked actions from the action pool");
        let block = self.chain.mint_new_block(actions, round.start_time())?;
        let proof_of_unlock = if round.is_unlocked() {
            round.proof_of_lock()
        } else {
            Vec::new()
        };
        self.endorse_proposal(round, BlockProposal::new(block, proof_of_unlock))
    }

    fn endorse_proposal(
        &self,
        round: &RoundContext,
        proposal: BlockProposal,
    ) -> ContextResult<EndorsedMessage> {
        let endorsement = Endorsement::endorse(&self.key, &proposal, round.start_time())?;
        Ok(EndorsedMessage::new(
            proposal.block.height(),
            ConsensusMessage::Proposal(proposal),
            endorsement,
        ))
    }

    fn new_vote_message(
        &self,
        round: &RoundContext,
        block_hash: H256,
        topic: Topic,
        deadline_ms: u64,
    ) -> ContextResult<EndorsedMessage> {
        let vote = ConsensusVote::new(block_hash, topic);
        let endorsement = Endorsement::endorse(&self.key, &vote, deadline_ms)?;
        Ok(EndorsedMessage::new(
            round.height(),
            ConsensusMessage::Vote(vote),
            endorsement,
        ))
    }

    fn verify_vote(
        &self,
        round: &mut RoundContext,
        message: &EndorsedMessage,
        topics: &[Topic],
    ) -> ContextResult<(H256, bool)> {
        let vote = message.vote().ok_or(ContextError::InvalidMessage)?;
        round.add_vote_endorsement(vote, message.endorsement.clone())?;
        debug!(
            block = %vote.block_hash,
            topic = %vote.topic,
            endorser = %message.endorsement.endorser_address(),
            "verified consensus vote"
        );
        let majority = round.endorsed_by_majority(&vote.block_hash, topics);
        Ok((vote.block_hash, majority))
    }

    fn ttl_ms(&self, parts: &[Duration]) -> u64 {
        parts.iter().map(|d| d.as_millis() as u64).sum()
    }
}
