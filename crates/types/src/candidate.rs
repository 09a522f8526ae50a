//! Staked candidates eligible for delegate election.

use crate::Address;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A candidate registered for delegate election, ranked by stake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// The candidate's account address
    pub address: Address,
    /// Total stake voted to the candidate
    pub votes: u128,
}

impl Candidate {
    /// Creates a new candidate.
    pub fn new(address: Address, votes: u128) -> Self {
        Self { address, votes }
    }

    /// Ranking order for delegate election: stake descending, ties broken by
    /// address bytes ascending.
    pub fn ranking_cmp(&self, other: &Self) -> Ordering {
        other
            .votes
            .cmp(&self.votes)
            .then_with(|| self.address.cmp(&other.address))
    }
}
