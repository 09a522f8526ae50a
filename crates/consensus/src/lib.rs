//! # Roll-DPoS Consensus
//!
//! The Roll-DPoS consensus core: the per-height, per-round decision engine
//! that drives a delegated proof-of-stake chain toward irreversible block
//! commitment.
//!
//! ## Protocol Flow
//!
//! For each height, delegates run timed rounds of a four-phase endorsement
//! protocol until one block commits:
//!
//! ```text
//! Round r, Height h:
//!
//! ┌──────────────┐
//! │   PROPOSE    │  proposer = delegates[(h - epoch_start (+ r)) % n]
//! │              │  broadcast BlockProposal{block, proof_of_lock}
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │   LOCK       │  on valid proposal: endorse (hash, PROPOSAL)
//! │              │  on >2/3 PROPOSAL ∪ COMMIT: lock, endorse (hash, LOCK)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │  PRE-COMMIT  │  on >2/3 LOCK ∪ COMMIT: endorse (hash, COMMIT)
//! └──────┬───────┘
//!        ▼
//! ┌──────────────┐
//! │   COMMIT     │  on >2/3 COMMIT: finalize block with endorsements,
//! │              │  commit to chain, reset action pool, broadcast
//! └──────────────┘
//! ```
//!
//! A round that times out rolls forward: the round calculator derives the
//! next round number from the wall clock, and a lock acquired in an earlier
//! round is carried into the next round of the same height together with
//! its proof-of-lock, so an isolated commit candidate survives partitions.
//!
//! ## Components
//!
//! - [`RoundCalculator`] - pure `(height, time)` → round/proposer/delegates
//! - [`EndorsementStore`] - per-round endorsement aggregation and lock state
//! - [`RoundContext`] - one round's identity plus its store
//! - [`ConsensusContext`] - the thread-safe action façade the FSM drives
//! - [`ConsensusFsm`] - the timed state machine
//!
//! External collaborators (chain, action pool, broadcast sink, clock) are
//! injected through the narrow traits in [`traits`].
//!
//! ## Safety
//!
//! - **At most one block per height**: commit requires more than two thirds
//!   of the delegate set to endorse COMMIT for the same hash.
//! - **Lock carryover**: once a round locks a hash, later rounds of the same
//!   height re-propose it with the endorsements that justified the lock.
//! - **Non-fatal failures**: a runtime consensus failure is logged and the
//!   next round retries; only construction-time misconfiguration is fatal.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod endorsement_store;
pub mod fsm;
mod metrics;
pub mod round;
pub mod round_calculator;
pub mod traits;
pub mod types;

pub use config::{ConfigError, ConsensusConfig, FsmConfig};
pub use context::{ConsensusContext, ContextError, ContextResult};
pub use endorsement_store::{EndorsementStore, StoreError};
pub use fsm::{ConsensusEvent, ConsensusFsm, EventKind, State};
pub use round::{RoundContext, RoundError};
pub use round_calculator::{CalculatorError, CalculatorResult, RoundCalculator};
pub use traits::{
    ActionPool, Broadcast, BroadcastError, Chain, ChainError, Clock, ManualClock, SystemClock,
};
pub use types::{
    domains, BlockProposal, ConsensusMessage, ConsensusVote, EndorsedMessage, Topic,
};
