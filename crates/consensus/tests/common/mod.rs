//! Shared fixtures for the consensus integration tests: an in-memory chain,
//! action pool, broadcast recorder and manual clock wired to a set of
//! delegate keys.

#![allow(dead_code)]

use parking_lot::Mutex;
use rolldpos_consensus::{
    ActionPool, Broadcast, BroadcastError, Chain, ChainError, ConsensusConfig, ConsensusContext,
    ConsensusMessage, ConsensusVote, EndorsedMessage, ManualClock, Topic,
};
use rolldpos_consensus::types::BlockProposal;
use rolldpos_crypto::PrivateKey;
use rolldpos_types::{Address, Block, BlockHeader, Candidate, Endorsement, SignedAction, H256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Genesis timestamp used by every test, unix milliseconds.
pub const GENESIS_MS: u64 = 1_600_000_000_000;

/// Default test block interval.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(10);

/// Start of round 0 for height 1.
pub const HEIGHT1_ROUND0_START: u64 = GENESIS_MS + 10_000;

/// In-memory chain: committed blocks in a vector, a fixed candidate list,
/// and a swappable minting key standing in for the block factory.
pub struct TestChain {
    genesis_timestamp: u64,
    candidates: Vec<Candidate>,
    minter: Mutex<PrivateKey>,
    blocks: Mutex<Vec<Block>>,
}

impl TestChain {
    pub fn new(candidates: Vec<Candidate>, minter: PrivateKey) -> Self {
        Self {
            genesis_timestamp: GENESIS_MS,
            candidates,
            minter: Mutex::new(minter),
            blocks: Mutex::new(Vec::new()),
        }
    }

    /// Key used to sign minted blocks; tests point it at the delegate whose
    /// turn it is to propose.
    pub fn set_minter(&self, key: PrivateKey) {
        *self.minter.lock() = key;
    }

    pub fn parent_hash(&self) -> H256 {
        self.blocks
            .lock()
            .last()
            .map(|b| b.hash())
            .unwrap_or_else(|| H256::keccak256(b"genesis"))
    }

    pub fn committed_blocks(&self) -> Vec<Block> {
        self.blocks.lock().clone()
    }
}

impl Chain for TestChain {
    fn tip_height(&self) -> u64 {
        self.blocks.lock().len() as u64
    }

    fn genesis_timestamp(&self) -> u64 {
        self.genesis_timestamp
    }

    fn candidates_by_height(&self, _height: u64) -> Result<Vec<Candidate>, ChainError> {
        Ok(self.candidates.clone())
    }

    fn mint_new_block(
        &self,
        actions: HashMap<Address, Vec<SignedAction>>,
        timestamp: u64,
    ) -> Result<Block, ChainError> {
        let mut flattened: Vec<SignedAction> = actions.into_values().flatten().collect();
        flattened.sort_by_key(|a| (a.sender, a.nonce));
        let minter = self.minter.lock().clone();
        let mut block = Block::new(
            self.tip_height() + 1,
            timestamp,
            self.parent_hash(),
            flattened,
            minter.public_key(),
        );
        block
            .sign(&minter)
            .map_err(|e| ChainError::MintFailed(e.to_string()))?;
        Ok(block)
    }

    fn validate_block(&self, _block: &Block) -> Result<(), ChainError> {
        Ok(())
    }

    fn commit_block(&self, block: Block) -> Result<(), ChainError> {
        let mut blocks = self.blocks.lock();
        let tip = blocks.len() as u64;
        if block.height() != tip + 1 {
            return Err(ChainError::InvalidTipHeight {
                height: block.height(),
                tip,
            });
        }
        blocks.push(block);
        Ok(())
    }

    fn block_header_by_height(&self, height: u64) -> Result<BlockHeader, ChainError> {
        self.blocks
            .lock()
            .get((height as usize).wrapping_sub(1))
            .map(|b| b.header.clone())
            .ok_or(ChainError::BlockNotFound(height))
    }
}

/// Action pool with a fixed pending set and a reset counter.
#[derive(Default)]
pub struct TestActionPool {
    pending: Mutex<HashMap<Address, Vec<SignedAction>>>,
    resets: AtomicU64,
}

impl TestActionPool {
    pub fn with_pending(pending: HashMap<Address, Vec<SignedAction>>) -> Self {
        Self {
            pending: Mutex::new(pending),
            resets: AtomicU64::new(0),
        }
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }
}

impl ActionPool for TestActionPool {
    fn pending_action_map(&self) -> HashMap<Address, Vec<SignedAction>> {
        self.pending.lock().clone()
    }

    fn reset(&self) {
        self.pending.lock().clear();
        self.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn size(&self) -> u64 {
        self.pending.lock().values().map(|v| v.len() as u64).sum()
    }

    fn capacity(&self) -> u64 {
        1_000
    }
}

/// Broadcast sink that records every outgoing wire message.
#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSink {
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Deserialized endorsed messages among the recorded traffic.
    pub fn endorsed_messages(&self) -> Vec<EndorsedMessage> {
        self.messages
            .lock()
            .iter()
            .filter_map(|bytes| serde_json::from_slice(bytes).ok())
            .collect()
    }

    /// Deserialized committed blocks among the recorded traffic.
    pub fn committed_blocks(&self) -> Vec<Block> {
        self.messages
            .lock()
            .iter()
            .filter_map(|bytes| serde_json::from_slice::<Block>(bytes).ok())
            .filter(|block| block.footer.is_some())
            .collect()
    }
}

impl Broadcast for RecordingSink {
    fn send(&self, message: &[u8]) -> Result<(), BroadcastError> {
        self.messages.lock().push(message.to_vec());
        Ok(())
    }
}

/// A wired set of delegates sharing one chain, pool, sink and clock.
pub struct Fixture {
    pub keys: Vec<PrivateKey>,
    pub addresses: Vec<Address>,
    pub chain: Arc<TestChain>,
    pub pool: Arc<TestActionPool>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    pub config: ConsensusConfig,
}

impl Fixture {
    /// `n` delegates with descending stake, so the election order matches
    /// the key order and `keys[0]` proposes round 0 of height 1. Rotation
    /// is time-based: round `r` of height `h` is proposed by delegate
    /// `(h - epoch_start + r) % n`.
    pub fn new(n: usize) -> Self {
        let keys: Vec<PrivateKey> = (0..n).map(|_| PrivateKey::random()).collect();
        let addresses: Vec<Address> = keys
            .iter()
            .map(|k| Address::from_public_key(&k.public_key()))
            .collect();
        let candidates: Vec<Candidate> = addresses
            .iter()
            .enumerate()
            .map(|(i, addr)| Candidate::new(*addr, ((n - i) as u128) * 1_000))
            .collect();
        let chain = Arc::new(TestChain::new(candidates, keys[0].clone()));
        let config = ConsensusConfig::default()
            .with_block_interval(BLOCK_INTERVAL)
            .with_tolerated_overtime(Duration::from_secs(2))
            .with_num_delegates(n as u32)
            .with_num_sub_epochs(2)
            .with_time_based_rotation(true);
        Self {
            keys,
            addresses,
            chain,
            pool: Arc::new(TestActionPool::default()),
            sink: Arc::new(RecordingSink::default()),
            clock: Arc::new(ManualClock::new(GENESIS_MS)),
            config,
        }
    }

    /// Builds the consensus context of delegate `index`.
    pub fn context(&self, index: usize, active: bool) -> Arc<ConsensusContext> {
        Arc::new(
            ConsensusContext::new(
                self.config.clone(),
                active,
                self.chain.clone(),
                self.pool.clone(),
                self.sink.clone(),
                self.clock.clone(),
                self.keys[index].clone(),
            )
            .expect("failed to build consensus context"),
        )
    }

    /// A vote from delegate `index`, endorsed at `timestamp`.
    pub fn vote_message(
        &self,
        index: usize,
        height: u64,
        block_hash: H256,
        topic: Topic,
        timestamp: u64,
    ) -> EndorsedMessage {
        let vote = ConsensusVote::new(block_hash, topic);
        let endorsement =
            Endorsement::endorse(&self.keys[index], &vote, timestamp).expect("endorse vote");
        EndorsedMessage::new(height, ConsensusMessage::Vote(vote), endorsement)
    }

    /// A block proposal from delegate `index`, endorsed at `timestamp`.
    pub fn proposal_message(
        &self,
        index: usize,
        block: Block,
        proof_of_lock: Vec<Endorsement>,
        timestamp: u64,
    ) -> EndorsedMessage {
        let height = block.height();
        let proposal = BlockProposal::new(block, proof_of_lock);
        let endorsement =
            Endorsement::endorse(&self.keys[index], &proposal, timestamp).expect("endorse proposal");
        EndorsedMessage::new(height, ConsensusMessage::Proposal(proposal), endorsement)
    }

    /// A block minted and signed by delegate `index` outside the chain's
    /// mint path, for crafting adversarial proposals.
    pub fn block_signed_by(&self, index: usize, height: u64, timestamp: u64) -> Block {
        let mut block = Block::new(
            height,
            timestamp,
            self.chain.parent_hash(),
            Vec::new(),
            self.keys[index].public_key(),
        );
        block.sign(&self.keys[index]).expect("sign block");
        block
    }
}
