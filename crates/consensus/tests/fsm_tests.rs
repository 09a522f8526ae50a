//! Tests driving the consensus FSM deterministically, one event at a time,
//! over a manual clock.

mod common;

use common::{Fixture, GENESIS_MS, HEIGHT1_ROUND0_START};
use rolldpos_consensus::{Chain, Clock, ConsensusEvent, ConsensusFsm, EventKind, State, Topic};
use rolldpos_types::H256;

#[tokio::test]
async fn happy_path_drives_one_height_to_commit() {
    let fixture = Fixture::new(4);
    let ctx = fixture.context(0, true);
    let mut fsm = ConsensusFsm::new(ctx.clone());

    // Kick off the epoch: prepare, wait for round start (the manual clock
    // jumps there), mint and self-endorse the proposal
    let kickoff = ctx
        .new_consensus_event(EventKind::NewRound, None)
        .expect("event");
    fsm.process(kickoff).await;
    assert_eq!(fsm.state(), State::AcceptLockEndorsement);
    assert_eq!(ctx.height(), 1);
    assert_eq!(fixture.clock.now(), HEIGHT1_ROUND0_START);

    let proposal = fixture.sink.endorsed_messages()[0].clone();
    let hash = proposal.proposal().expect("first broadcast is the proposal").block_hash();

    // Two more PROPOSAL endorsements complete the super-majority; the node
    // emits its LOCK endorsement, which has to wait for the next phase
    for i in 1..3 {
        let message =
            fixture.vote_message(i, 1, hash, Topic::Proposal, HEIGHT1_ROUND0_START + 4_000);
        let event = ctx
            .new_consensus_event(EventKind::ReceiveProposalEndorsement, Some(message))
            .expect("event");
        fsm.process(event).await;
    }
    assert_eq!(fsm.state(), State::AcceptLockEndorsement);

    // The proposal-endorsement window closes; the buffered own LOCK
    // endorsement replays into the pre-commit phase
    let expire = ctx
        .new_consensus_event(EventKind::ExpireAcceptProposalEndorsement, None)
        .expect("event");
    fsm.process(expire).await;
    assert_eq!(fsm.state(), State::AcceptPreCommitEndorsement);

    // Two more LOCK endorsements produce the node's COMMIT endorsement
    for i in 1..3 {
        let message =
            fixture.vote_message(i, 1, hash, Topic::Lock, HEIGHT1_ROUND0_START + 6_000);
        let event = ctx
            .new_consensus_event(EventKind::ReceiveLockEndorsement, Some(message))
            .expect("event");
        fsm.process(event).await;
    }
    assert_eq!(fsm.state(), State::AcceptPreCommitEndorsement);
    assert_eq!(fixture.chain.tip_height(), 0);

    // Two more COMMIT endorsements commit the block and roll to height 2
    for i in 1..3 {
        let message =
            fixture.vote_message(i, 1, hash, Topic::Commit, HEIGHT1_ROUND0_START + 8_000);
        let event = ctx
            .new_consensus_event(EventKind::ReceivePreCommitEndorsement, Some(message))
            .expect("event");
        fsm.process(event).await;
    }

    assert_eq!(fixture.chain.tip_height(), 1);
    assert_eq!(ctx.height(), 2);
    assert_eq!(fixture.pool.reset_count(), 1);
    assert_eq!(fixture.sink.committed_blocks().len(), 1);
    // Height 2 belongs to delegate 1; this node waits for its proposal
    assert_eq!(fsm.state(), State::AcceptBlockProposal);

    // A late COMMIT endorsement for the decided height is stale and ignored
    let late = ConsensusEvent::new(
        EventKind::ReceivePreCommitEndorsement,
        Some(fixture.vote_message(3, 1, hash, Topic::Commit, HEIGHT1_ROUND0_START + 8_000)),
        1,
        0,
        fixture.clock.now(),
    );
    fsm.process(late).await;
    assert_eq!(fixture.chain.tip_height(), 1);
    assert_eq!(fsm.state(), State::AcceptBlockProposal);
}

#[tokio::test]
async fn silent_proposer_expires_into_next_round() {
    let fixture = Fixture::new(4);
    // Delegate 1 watches round 0, whose proposer never shows up
    let ctx = fixture.context(1, true);
    let mut fsm = ConsensusFsm::new(ctx.clone());

    let kickoff = ctx.new_consensus_event(EventKind::NewRound, None).expect("event");
    fsm.process(kickoff).await;
    // Not the proposer: nothing minted, waiting for a proposal
    assert_eq!(fsm.state(), State::AcceptBlockProposal);
    assert_eq!(fixture.sink.len(), 0);

    // Accept-block window expires with no lock to honor
    let expire = ctx.new_consensus_event(EventKind::ExpireAcceptBlock, None).expect("event");
    fsm.process(expire).await;
    assert_eq!(fsm.state(), State::AcceptLockEndorsement);
    assert_eq!(fixture.sink.len(), 0);

    // Remaining windows expire without any endorsements
    let expire = ctx
        .new_consensus_event(EventKind::ExpireAcceptProposalEndorsement, None)
        .expect("event");
    fsm.process(expire).await;
    assert_eq!(fsm.state(), State::AcceptPreCommitEndorsement);

    // The commit window expires after the round 0 span: the next prepare
    // lands in round 1, where this node itself proposes
    fixture.clock.set(HEIGHT1_ROUND0_START + 12_000);
    fixture.chain.set_minter(fixture.keys[1].clone());
    let expire = ctx.new_consensus_event(EventKind::ExpireCommit, None).expect("event");
    fsm.process(expire).await;

    assert_eq!(ctx.height(), 1);
    assert_eq!(fsm.state(), State::AcceptLockEndorsement);
    let messages = fixture.sink.endorsed_messages();
    assert!(messages[0].proposal().is_some(), "round-1 proposer minted");
}

#[tokio::test]
async fn backdoor_forces_state_without_side_effects() {
    let fixture = Fixture::new(4);
    let ctx = fixture.context(0, true);
    let mut fsm = ConsensusFsm::new(ctx.clone());

    let backdoor = ctx.new_backdoor_event(State::AcceptPreCommitEndorsement);
    fsm.process(backdoor).await;

    assert_eq!(fsm.state(), State::AcceptPreCommitEndorsement);
    // No prepare ran, no message left the node
    assert_eq!(ctx.height(), 0);
    assert_eq!(fixture.sink.len(), 0);
}

#[tokio::test]
async fn stale_and_aged_events_are_dropped() {
    let fixture = Fixture::new(4);
    let ctx = fixture.context(0, true);
    let mut fsm = ConsensusFsm::new(ctx.clone());
    fixture.clock.set(HEIGHT1_ROUND0_START);
    ctx.prepare().unwrap();

    // A vote for height 0 while the node decides height 1
    let stale = ConsensusEvent::new(
        EventKind::ReceiveProposalEndorsement,
        Some(fixture.vote_message(1, 0, H256::keccak256(b"old"), Topic::Proposal, GENESIS_MS)),
        0,
        0,
        fixture.clock.now(),
    );
    fsm.process(stale).await;
    assert_eq!(fsm.state(), State::Epoch);
    assert_eq!(fixture.sink.len(), 0);

    // An event older than the unmatched TTL dies even when it matches
    let aged = ConsensusEvent::new(
        EventKind::NewRound,
        None,
        1,
        0,
        fixture.clock.now().saturating_sub(60_000),
    );
    fsm.process(aged).await;
    assert_eq!(fsm.state(), State::Epoch);
}
