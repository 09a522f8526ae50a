//! Round calculation: epochs, round numbers, proposers and delegate sets.
//!
//! The calculator is stateless apart from a handle to the chain (for
//! delegate election data and previous block timestamps) and the timing
//! configuration. Given a `(height, wall-clock time)` pair it answers which
//! round is active, when it started, who proposes, and who the delegates
//! are.

use crate::config::ConsensusConfig;
use crate::endorsement_store::EndorsementStore;
use crate::round::RoundContext;
use crate::traits::{Chain, ChainError};
use rolldpos_types::Address;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by the round calculator.
#[derive(Debug, Error)]
pub enum CalculatorError {
    /// Rounds never move to a lower height
    #[error("cannot update round to height {target} below current {current}")]
    HeightRegression {
        /// Height of the current round
        current: u64,
        /// Requested target height
        target: u64,
    },

    /// Not enough candidates registered to elect a full delegate set
    #[error("only {got} candidates for epoch of height {height}, {need} needed")]
    NotEnoughCandidates {
        /// Height whose epoch was queried
        height: u64,
        /// Candidates available
        got: usize,
        /// Delegates required
        need: usize,
    },

    /// Chain lookup failed
    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Result alias for calculator operations.
pub type CalculatorResult<T> = Result<T, CalculatorError>;

/// Computes rounds, proposers and delegate sets over `(height, time)`.
pub struct RoundCalculator {
    chain: Arc<dyn Chain>,
    block_interval_ms: u64,
    tolerated_overtime_ms: u64,
    time_based_rotation: bool,
    num_delegates: usize,
    epoch_length: u64,
}

impl RoundCalculator {
    /// Creates a calculator over the given chain and configuration.
    pub fn new(chain: Arc<dyn Chain>, config: &ConsensusConfig) -> Self {
        Self {
            chain,
            block_interval_ms: config.block_interval.as_millis() as u64,
            tolerated_overtime_ms: config.tolerated_overtime.as_millis() as u64,
            time_based_rotation: config.time_based_rotation,
            num_delegates: config.num_delegates as usize,
            epoch_length: config.epoch_length(),
        }
    }

    /// Epoch number containing `height`. Height 0 (genesis) maps to epoch 1.
    pub fn epoch_num(&self, height: u64) -> u64 {
        if height == 0 {
            return 1;
        }
        (height - 1) / self.epoch_length + 1
    }

    /// First height of the given epoch.
    pub fn epoch_start_height(&self, epoch: u64) -> u64 {
        (epoch - 1) * self.epoch_length + 1
    }

    /// Active round number and its start time for `height` at wall-clock
    /// `now_ms`, honoring the tolerated overtime window.
    pub fn round_info(&self, height: u64, now_ms: u64) -> CalculatorResult<(u32, u64)> {
        self.round_info_with(height, now_ms, self.tolerated_overtime_ms)
    }

    /// The epoch's delegate set for `height`: candidates at the epoch start
    /// height, ranked by stake descending with ties broken by address bytes
    /// ascending, truncated to the configured delegate count.
    ///
    /// When the epoch start height is beyond the chain tip (the usual case
    /// for the first height of a new epoch), the latest known set at the tip
    /// is used instead.
    pub fn delegates(&self, height: u64) -> CalculatorResult<Vec<Address>> {
        let epoch_start = self.epoch_start_height(self.epoch_num(height));
        let tip = self.chain.tip_height();
        let query_height = epoch_start.min(tip);
        let mut candidates = self.chain.candidates_by_height(query_height)?;
        if candidates.len() < self.num_delegates {
            return Err(CalculatorError::NotEnoughCandidates {
                height,
                got: candidates.len(),
                need: self.num_delegates,
            });
        }
        candidates.sort_by(|a, b| a.ranking_cmp(b));
        candidates.truncate(self.num_delegates);
        Ok(candidates.into_iter().map(|c| c.address).collect())
    }

    /// The designated proposer for `height` at wall-clock `now_ms`.
    pub fn proposer(&self, height: u64, now_ms: u64) -> CalculatorResult<Address> {
        let delegates = self.delegates(height)?;
        let (round_num, _) = self.round_info(height, now_ms)?;
        Ok(self.proposer_of(height, round_num, &delegates))
    }

    /// True iff `address` is a delegate of the epoch containing `height`.
    pub fn is_delegate(&self, address: &Address, height: u64) -> CalculatorResult<bool> {
        Ok(self.delegates(height)?.contains(address))
    }

    /// Builds a fresh round context with an empty endorsement store, using
    /// the untolerated round formula.
    pub fn new_round(&self, height: u64, now_ms: u64) -> CalculatorResult<RoundContext> {
        self.build(height, now_ms, 0, None, None)
    }

    /// Builds a fresh round context, keeping the previous round number
    /// within the tolerated overtime window after its nominal end.
    pub fn new_round_with_toleration(
        &self,
        height: u64,
        now_ms: u64,
    ) -> CalculatorResult<RoundContext> {
        self.build(height, now_ms, self.tolerated_overtime_ms, None, None)
    }

    /// Moves `current` to `(height, now_ms)`.
    ///
    /// Returns an equivalent context when the active `(height, round)` is
    /// unchanged. When only the round advances at the same height, the lock
    /// and its proof-of-lock are carried over into the fresh store. Heights
    /// never regress.
    pub fn update_round(
        &self,
        current: &RoundContext,
        height: u64,
        now_ms: u64,
    ) -> CalculatorResult<RoundContext> {
        if height < current.height() {
            return Err(CalculatorError::HeightRegression {
                current: current.height(),
                target: height,
            });
        }
        let (round_num, _) = self.round_info(height, now_ms)?;
        // Keep serving the current round when the clock has not yet reached
        // the next one
        if height == current.height() && round_num <= current.number() {
            return Ok(current.clone());
        }
        let store = if height == current.height() {
            Some(current.store().carryover())
        } else {
            None
        };
        // The delegate set is stable for the whole epoch
        let delegates = if self.epoch_num(height) == current.epoch_num() {
            Some(current.delegates().to_vec())
        } else {
            None
        };
        self.build(
            height,
            now_ms,
            self.tolerated_overtime_ms,
            delegates,
            store,
        )
    }

    fn build(
        &self,
        height: u64,
        now_ms: u64,
        overtime_ms: u64,
        delegates: Option<Vec<Address>>,
        store: Option<EndorsementStore>,
    ) -> CalculatorResult<RoundContext> {
        let epoch_num = self.epoch_num(height);
        let epoch_start_height = self.epoch_start_height(epoch_num);
        let delegates = match delegates {
            Some(delegates) => delegates,
            None => self.delegates(height)?,
        };
        let (round_num, round_start_time) = self.round_info_with(height, now_ms, overtime_ms)?;
        let proposer = self.proposer_of(height, round_num, &delegates);
        let store = store.unwrap_or_else(|| EndorsementStore::new(delegates.len()));
        Ok(RoundContext::new(
            height,
            epoch_num,
            epoch_start_height,
            round_num,
            round_start_time,
            proposer,
            delegates,
            store,
        ))
    }

    fn proposer_of(&self, height: u64, round_num: u32, delegates: &[Address]) -> Address {
        let epoch_start = self.epoch_start_height(self.epoch_num(height));
        let mut index = height.saturating_sub(epoch_start);
        if self.time_based_rotation {
            index += u64::from(round_num);
        }
        delegates[(index % delegates.len() as u64) as usize]
    }

    /// Round number and start time for wall-clock `now_ms`, with round 0
    /// lasting `block interval + overtime` and every later round exactly one
    /// block interval.
    fn round_info_with(
        &self,
        height: u64,
        now_ms: u64,
        overtime_ms: u64,
    ) -> CalculatorResult<(u32, u64)> {
        let interval = self.block_interval_ms;
        let zero_start = self.round_zero_start(height)?;
        let round_one_start = zero_start + interval + overtime_ms;
        // Height 0 is genesis: there is nothing to decide, the round never advances
        if height == 0 || now_ms < round_one_start {
            return Ok((0, zero_start));
        }
        let round_num = 1 + (now_ms - round_one_start) / interval;
        let round_start = round_one_start + (round_num - 1) * interval;
        Ok((round_num.min(u64::from(u32::MAX)) as u32, round_start))
    }

    /// Start of round 0 for `height`: the previous block's timestamp aligned
    /// down to the block-interval grid anchored at genesis, plus one block
    /// interval.
    fn round_zero_start(&self, height: u64) -> CalculatorResult<u64> {
        let genesis = self.chain.genesis_timestamp();
        let last = if height > 1 {
            let header = self.chain.block_header_by_height(height - 1)?;
            let elapsed = header.timestamp.saturating_sub(genesis);
            genesis + elapsed / self.block_interval_ms * self.block_interval_ms
        } else {
            genesis
        };
        Ok(last + self.block_interval_ms)
    }
}
