//! Tests for endorsement aggregation: majority detection, topic
//! subsumption, idempotence and lock tracking.

mod common;

use common::{Fixture, HEIGHT1_ROUND0_START};
use rolldpos_consensus::{EndorsementStore, StoreError, Topic};
use rolldpos_types::H256;

/// Records a vote from delegate `index` straight into the store.
fn record(
    store: &mut EndorsementStore,
    fixture: &Fixture,
    index: usize,
    hash: H256,
    topic: Topic,
) {
    let message = fixture.vote_message(index, 1, hash, topic, HEIGHT1_ROUND0_START);
    store.add_vote_endorsement(message.vote().unwrap(), message.endorsement.clone());
}

#[test]
fn majority_threshold_is_strict_two_thirds() {
    // With 4 delegates, 2/3 of the set is 2.67: three endorsers are needed
    assert_eq!(EndorsementStore::new(4).majority_threshold(), 3);
    assert_eq!(EndorsementStore::new(3).majority_threshold(), 3);
    assert_eq!(EndorsementStore::new(24).majority_threshold(), 17);
}

#[test]
fn majority_counts_unique_endorsers() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    record(&mut store, &fixture, 0, hash, Topic::Proposal);
    record(&mut store, &fixture, 1, hash, Topic::Proposal);
    assert!(!store.endorsed_by_majority(&hash, &[Topic::Proposal]));

    record(&mut store, &fixture, 2, hash, Topic::Proposal);
    assert!(store.endorsed_by_majority(&hash, &[Topic::Proposal]));
}

#[test]
fn duplicate_endorsement_is_idempotent() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    record(&mut store, &fixture, 0, hash, Topic::Proposal);
    record(&mut store, &fixture, 0, hash, Topic::Proposal);
    record(&mut store, &fixture, 0, hash, Topic::Proposal);

    assert_eq!(store.endorser_count(&hash, &[Topic::Proposal]), 1);
    assert_eq!(store.endorsements(&hash, &[Topic::Proposal]).len(), 1);
}

#[test]
fn commit_endorsement_counts_at_every_stage() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    for i in 0..3 {
        record(&mut store, &fixture, i, hash, Topic::Commit);
    }

    // A COMMIT endorsement counts as a LOCK and as a PROPOSAL endorsement
    assert!(store.endorsed_by_majority(&hash, &[Topic::Proposal]));
    assert!(store.endorsed_by_majority(&hash, &[Topic::Lock]));
    assert!(store.endorsed_by_majority(&hash, &[Topic::Commit]));

    // A LOCK endorsement counts as a PROPOSAL but not as a COMMIT
    let mut store = EndorsementStore::new(4);
    for i in 0..3 {
        record(&mut store, &fixture, i, hash, Topic::Lock);
    }
    assert!(store.endorsed_by_majority(&hash, &[Topic::Proposal]));
    assert!(!store.endorsed_by_majority(&hash, &[Topic::Commit]));
}

#[test]
fn endorsement_union_prefers_first_listed_topic() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    // Delegate 0 endorses at PROPOSAL and COMMIT; delegate 1 only at COMMIT
    record(&mut store, &fixture, 0, hash, Topic::Proposal);
    record(&mut store, &fixture, 0, hash, Topic::Commit);
    record(&mut store, &fixture, 1, hash, Topic::Commit);

    let union = store.endorsements(&hash, &[Topic::Proposal, Topic::Commit]);
    assert_eq!(union.len(), 2);

    // LOCK endorsements never leak into a PROPOSAL/COMMIT union
    record(&mut store, &fixture, 2, hash, Topic::Lock);
    assert_eq!(
        store.endorsements(&hash, &[Topic::Proposal, Topic::Commit]).len(),
        2
    );
}

#[test]
fn duplicate_block_is_rejected() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let block = fixture.block_signed_by(0, 1, HEIGHT1_ROUND0_START);
    let hash = block.hash();

    store.add_block(block.clone()).unwrap();
    assert!(matches!(
        store.add_block(block),
        Err(StoreError::BlockAlreadyExists(h)) if h == hash
    ));
}

#[test]
fn lock_is_monotonic_within_a_round() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    record(&mut store, &fixture, 0, hash, Topic::Proposal);
    record(&mut store, &fixture, 1, hash, Topic::Proposal);
    assert!(!store.is_locked());

    record(&mut store, &fixture, 2, hash, Topic::Proposal);
    assert!(store.is_locked());
    assert_eq!(store.locked_hash(), Some(hash));

    // Further honest endorsements never move or clear the lock
    record(&mut store, &fixture, 3, hash, Topic::Proposal);
    let other = H256::keccak256(b"other");
    record(&mut store, &fixture, 0, other, Topic::Proposal);
    record(&mut store, &fixture, 1, other, Topic::Proposal);
    assert_eq!(store.locked_hash(), Some(hash));
    assert!(!store.is_unlocked());
}

#[test]
fn ready_to_commit_returns_own_commit_for_locked_block() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    for i in 0..3 {
        record(&mut store, &fixture, i, hash, Topic::Proposal);
    }
    assert!(store.ready_to_commit(&fixture.addresses[0]).is_none());

    record(&mut store, &fixture, 0, hash, Topic::Commit);
    let endorsement = store.ready_to_commit(&fixture.addresses[0]).unwrap();
    assert_eq!(endorsement.endorser_address(), fixture.addresses[0]);
    assert!(store.ready_to_commit(&fixture.addresses[1]).is_none());
}

#[test]
fn proof_of_lock_bundles_proposal_and_commit_endorsements() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let hash = H256::keccak256(b"block");

    assert!(store.proof_of_lock().is_empty());

    record(&mut store, &fixture, 0, hash, Topic::Proposal);
    record(&mut store, &fixture, 1, hash, Topic::Proposal);
    record(&mut store, &fixture, 2, hash, Topic::Commit);
    record(&mut store, &fixture, 3, hash, Topic::Lock);

    assert!(store.is_locked());
    // Delegates 0, 1 and 2; the LOCK endorsement is not part of the proof
    assert_eq!(store.proof_of_lock().len(), 3);
}

#[test]
fn carryover_keeps_lock_block_and_proof_only() {
    let fixture = Fixture::new(4);
    let mut store = EndorsementStore::new(4);
    let block = fixture.block_signed_by(0, 1, HEIGHT1_ROUND0_START);
    let locked = block.hash();
    let other = H256::keccak256(b"other");

    store.add_block(block).unwrap();
    for i in 0..3 {
        record(&mut store, &fixture, i, locked, Topic::Proposal);
    }
    record(&mut store, &fixture, 3, other, Topic::Proposal);

    let next = store.carryover();
    assert_eq!(next.locked_hash(), Some(locked));
    assert!(next.block(&locked).is_some());
    assert_eq!(next.proof_of_lock().len(), 3);
    // Endorsements for other hashes do not survive the round change
    assert_eq!(next.endorser_count(&other, &[Topic::Proposal]), 0);

    // Without a lock nothing carries
    let empty = EndorsementStore::new(4).carryover();
    assert!(empty.locked_hash().is_none());
    assert!(empty.proof_of_lock().is_empty());
}
