//! Collaborator contracts consumed by the consensus core.
//!
//! The core never talks to a concrete blockchain, action pool, network or
//! clock: each is a narrow capability injected at construction. Production
//! wires the real services; tests wire in-memory fakes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rolldpos_types::{Address, Block, BlockHeader, Candidate, SignedAction};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Errors surfaced by the chain collaborator.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The block does not extend the current tip. Another node already
    /// committed this height; callers treat it as success.
    #[error("block height {height} does not extend tip {tip}")]
    InvalidTipHeight {
        /// Height of the rejected block
        height: u64,
        /// Current tip height
        tip: u64,
    },

    /// No block at the requested height
    #[error("no block at height {0}")]
    BlockNotFound(u64),

    /// Block failed validation
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Minting failed
    #[error("failed to mint block: {0}")]
    MintFailed(String),

    /// Any other chain failure
    #[error("chain error: {0}")]
    Internal(String),
}

/// The blockchain service: tip tracking, candidate election data, minting,
/// validation and commitment.
pub trait Chain: Send + Sync {
    /// Height of the highest committed block.
    fn tip_height(&self) -> u64;

    /// Timestamp of the genesis block, unix milliseconds. Anchors the
    /// round-time grid.
    fn genesis_timestamp(&self) -> u64;

    /// Candidates registered at the given height, unordered.
    fn candidates_by_height(&self, height: u64) -> Result<Vec<Candidate>, ChainError>;

    /// Mints a new block over the pending actions at the given timestamp.
    fn mint_new_block(
        &self,
        actions: HashMap<Address, Vec<SignedAction>>,
        timestamp: u64,
    ) -> Result<Block, ChainError>;

    /// Validates a received block proposal.
    fn validate_block(&self, block: &Block) -> Result<(), ChainError>;

    /// Commits a finalized block. Returns [`ChainError::InvalidTipHeight`]
    /// when the block does not extend the tip.
    fn commit_block(&self, block: Block) -> Result<(), ChainError>;

    /// Header of the block at the given height.
    fn block_header_by_height(&self, height: u64) -> Result<BlockHeader, ChainError>;

    /// Address of this chain; empty for the root chain.
    fn chain_address(&self) -> String {
        String::new()
    }
}

/// The pool of pending user actions.
pub trait ActionPool: Send + Sync {
    /// Pending actions grouped by sender.
    fn pending_action_map(&self) -> HashMap<Address, Vec<SignedAction>>;

    /// Clears executed actions after a commit.
    fn reset(&self);

    /// Number of pending actions (telemetry only).
    fn size(&self) -> u64;

    /// Pool capacity (telemetry only).
    fn capacity(&self) -> u64;
}

/// Errors surfaced by the broadcast sink.
#[derive(Debug, Error)]
#[error("broadcast failed: {0}")]
pub struct BroadcastError(pub String);

/// Sink for outgoing wire messages: endorsed consensus messages and
/// committed blocks, already serialized.
pub trait Broadcast: Send + Sync {
    /// Hands a serialized message to the network.
    fn send(&self, message: &[u8]) -> Result<(), BroadcastError>;
}

/// Injected wall clock. All time reads in the core go through this trait so
/// tests can run against a manual clock.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time, unix milliseconds.
    fn now(&self) -> u64;

    /// Sleeps for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by the system time and the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Manually driven clock for deterministic tests.
///
/// `sleep` advances the clock by the requested duration and returns
/// immediately, so time-driven paths run instantly and reproducibly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Mutex<u64>,
}

impl ManualClock {
    /// Creates a clock starting at the given unix-millisecond time.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: Mutex::new(now_ms),
        }
    }

    /// Sets the current time.
    pub fn set(&self, now_ms: u64) {
        *self.now_ms.lock() = now_ms;
    }

    /// Advances the current time.
    pub fn advance(&self, duration: Duration) {
        *self.now_ms.lock() += duration.as_millis() as u64;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> u64 {
        *self.now_ms.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
