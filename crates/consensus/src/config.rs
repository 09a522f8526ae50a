//! Consensus configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors detected at construction time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The four phase TTLs must fit inside one block interval
    #[error(
        "invalid ttl config: accept_block {accept_block:?} + accept_proposal_endorsement \
         {accept_proposal_endorsement:?} + accept_lock_endorsement {accept_lock_endorsement:?} \
         + commit {commit:?} exceeds block interval {block_interval:?}"
    )]
    TtlSumExceedsBlockInterval {
        /// Window for accepting a block proposal
        accept_block: Duration,
        /// Window for accepting proposal endorsements
        accept_proposal_endorsement: Duration,
        /// Window for accepting lock endorsements
        accept_lock_endorsement: Duration,
        /// Window for committing
        commit: Duration,
        /// Configured block interval
        block_interval: Duration,
    },

    /// The delegate count must be non-zero
    #[error("number of delegates must be positive")]
    ZeroDelegates,
}

/// Timing and queueing parameters of the consensus FSM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsmConfig {
    /// Window for receiving the round's block proposal.
    pub accept_block_ttl: Duration,

    /// Window for collecting PROPOSAL endorsements.
    pub accept_proposal_endorsement_ttl: Duration,

    /// Window for collecting LOCK endorsements.
    pub accept_lock_endorsement_ttl: Duration,

    /// Window for collecting COMMIT endorsements and committing.
    pub commit_ttl: Duration,

    /// Events older than this are dropped without matching any round.
    pub unmatched_event_ttl: Duration,

    /// Capacity of the bounded FSM event queue. Producers block when full,
    /// which keeps event order deterministic under load.
    pub event_chan_size: usize,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            accept_block_ttl: Duration::from_secs(4),
            accept_proposal_endorsement_ttl: Duration::from_secs(2),
            accept_lock_endorsement_ttl: Duration::from_secs(2),
            commit_ttl: Duration::from_secs(2),
            unmatched_event_ttl: Duration::from_secs(3),
            event_chan_size: 10_000,
        }
    }
}

impl FsmConfig {
    /// Sum of the four phase TTLs.
    pub fn ttl_sum(&self) -> Duration {
        self.accept_block_ttl
            + self.accept_proposal_endorsement_ttl
            + self.accept_lock_endorsement_ttl
            + self.commit_ttl
    }
}

/// Top-level configuration of the Roll-DPoS consensus core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// FSM timing and queueing parameters.
    pub fsm: FsmConfig,

    /// Expected duration of one round.
    pub block_interval: Duration,

    /// Overtime window during which the previous round number keeps being
    /// served after its nominal end.
    pub tolerated_overtime: Duration,

    /// Proposer rotation mode: `true` rotates by round number as well as
    /// height, `false` by height only.
    pub time_based_rotation: bool,

    /// Number of delegates elected per epoch.
    pub num_delegates: u32,

    /// Number of sub-epochs; the epoch length in heights is
    /// `num_delegates * num_sub_epochs`.
    pub num_sub_epochs: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            fsm: FsmConfig::default(),
            block_interval: Duration::from_secs(10),
            tolerated_overtime: Duration::from_secs(2),
            time_based_rotation: false,
            num_delegates: 24,
            num_sub_epochs: 2,
        }
    }
}

impl ConsensusConfig {
    /// Set the block interval.
    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    /// Set the tolerated overtime window.
    pub fn with_tolerated_overtime(mut self, overtime: Duration) -> Self {
        self.tolerated_overtime = overtime;
        self
    }

    /// Enable or disable time-based proposer rotation.
    pub fn with_time_based_rotation(mut self, enabled: bool) -> Self {
        self.time_based_rotation = enabled;
        self
    }

    /// Set the delegate count.
    pub fn with_num_delegates(mut self, count: u32) -> Self {
        self.num_delegates = count;
        self
    }

    /// Set the sub-epoch count.
    pub fn with_num_sub_epochs(mut self, count: u32) -> Self {
        self.num_sub_epochs = count;
        self
    }

    /// Epoch length in heights.
    pub fn epoch_length(&self) -> u64 {
        u64::from(self.num_delegates) * u64::from(self.num_sub_epochs)
    }

    /// Validates the configuration.
    ///
    /// The four phase TTLs must fit inside one block interval, otherwise a
    /// round could outlive its own slot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_delegates == 0 {
            return Err(ConfigError::ZeroDelegates);
        }
        if self.fsm.ttl_sum() > self.block_interval {
            return Err(ConfigError::TtlSumExceedsBlockInterval {
                accept_block: self.fsm.accept_block_ttl,
                accept_proposal_endorsement: self.fsm.accept_proposal_endorsement_ttl,
                accept_lock_endorsement: self.fsm.accept_lock_endorsement_ttl,
                commit: self.fsm.commit_ttl,
                block_interval: self.block_interval,
            });
        }
        Ok(())
    }
}
