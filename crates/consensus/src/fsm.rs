//! The consensus finite-state machine.
//!
//! The FSM runs as a single cooperative task: it pulls one event at a time
//! from a bounded queue, filters it for freshness, and drives the consensus
//! context through the four-phase protocol. Per-state deadlines are armed
//! from the injected clock; when a deadline passes, the state's expiry event
//! fires instead of a queue event.
//!
//! ```text
//! ┌───────┐ prepare, not delegate: retry next interval
//! │ Epoch │◄────────────────────────────────────────────────┐
//! └───┬───┘                                                 │
//!     │ delegate                                            │
//!     ▼                                                     │
//! ┌────────────┐ wait for round start; proposer mints       │
//! │ RoundStart │                                            │
//! └───┬────────┘                                            │
//!     ▼                                                     │
//! ┌─────────────────────┐ proposal received / TTL           │
//! │ AcceptBlockProposal │────────────┐                      │
//! └─────────────────────┘            ▼                      │
//!              ┌───────────────────────┐ PROPOSAL endorsements;
//!              │ AcceptLockEndorsement │ emit LOCK on majority │
//!              └───────────┬───────────┘                    │
//!                          │ TTL / own pre-commit ready     │
//!                          ▼                                │
//!       ┌────────────────────────────┐ LOCK endorsements →  │
//!       │ AcceptPreCommitEndorsement │ COMMIT; commit on    │
//!       └────────────────────────────┘ majority ────────────┘
//!                         commit or TTL: back to Epoch
//! ```
//!
//! Stale events are dropped, future events are buffered and replayed after
//! the next `prepare`, and events older than the unmatched TTL are dropped
//! regardless of state.

use crate::context::ConsensusContext;
use crate::types::EndorsedMessage;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// States of the consensus FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Preparing the round for the current tip and wall time
    Epoch,
    /// Waiting for the round start; the proposer mints here
    RoundStart,
    /// Collecting the round's block proposal
    AcceptBlockProposal,
    /// Collecting PROPOSAL endorsements, emitting a LOCK on majority
    AcceptLockEndorsement,
    /// Collecting LOCK and COMMIT endorsements, committing on majority
    AcceptPreCommitEndorsement,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Epoch => "Epoch",
            State::RoundStart => "RoundStart",
            State::AcceptBlockProposal => "AcceptBlockProposal",
            State::AcceptLockEndorsement => "AcceptLockEndorsement",
            State::AcceptPreCommitEndorsement => "AcceptPreCommitEndorsement",
        };
        write!(f, "{name}")
    }
}

/// Kinds of events driving the FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Advance to the round for the current wall time
    NewRound,
    /// A block proposal arrived
    ReceiveBlockProposal,
    /// A PROPOSAL endorsement arrived
    ReceiveProposalEndorsement,
    /// A LOCK endorsement arrived
    ReceiveLockEndorsement,
    /// A COMMIT endorsement arrived
    ReceivePreCommitEndorsement,
    /// The accept-block window expired
    ExpireAcceptBlock,
    /// The proposal-endorsement window expired
    ExpireAcceptProposalEndorsement,
    /// The commit window expired
    ExpireCommit,
    /// Force the FSM into a state without side effects
    Backdoor(State),
}

/// An event tagged with the `(height, round)` it refers to and its creation
/// time.
#[derive(Debug, Clone)]
pub struct ConsensusEvent {
    kind: EventKind,
    message: Option<EndorsedMessage>,
    height: u64,
    round_num: u32,
    created_at: u64,
}

impl ConsensusEvent {
    /// Creates an event.
    pub fn new(
        kind: EventKind,
        message: Option<EndorsedMessage>,
        height: u64,
        round_num: u32,
        created_at: u64,
    ) -> Self {
        Self {
            kind,
            message,
            height,
            round_num,
            created_at,
        }
    }

    /// The event kind.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The message carried by the event, if any.
    pub fn message(&self) -> Option<&EndorsedMessage> {
        self.message.as_ref()
    }

    /// Height the event refers to.
    pub fn height(&self) -> u64 {
        self.height
    }

    /// Round the event refers to.
    pub fn round_num(&self) -> u32 {
        self.round_num
    }

    /// Wall-clock creation time, unix milliseconds.
    pub fn created_at(&self) -> u64 {
        self.created_at
    }
}

/// The consensus finite-state machine.
pub struct ConsensusFsm {
    ctx: Arc<ConsensusContext>,
    state: State,
    event_tx: mpsc::Sender<ConsensusEvent>,
    event_rx: mpsc::Receiver<ConsensusEvent>,
    /// Events to process before reading from the channel: self-delivered
    /// outputs and replayed buffers.
    ready: VecDeque<ConsensusEvent>,
    /// Events for a future `(height, round)`, replayed after the next
    /// prepare.
    future_events: Vec<ConsensusEvent>,
    /// Current-round events that did not match the state they arrived in,
    /// replayed on the next state transition.
    unmatched: Vec<ConsensusEvent>,
    /// Wall-clock deadline of the current state, unix milliseconds.
    deadline: Option<u64>,
}

impl ConsensusFsm {
    /// Creates the FSM over a shared consensus context. The event queue is
    /// bounded by the configured channel size; producers block when it is
    /// full, which keeps event order deterministic.
    pub fn new(ctx: Arc<ConsensusContext>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(ctx.config().fsm.event_chan_size);
        Self {
            ctx,
            state: State::Epoch,
            event_tx,
            event_rx,
            ready: VecDeque::new(),
            future_events: Vec::new(),
            unmatched: Vec::new(),
            deadline: None,
        }
    }

    /// A handle for enqueuing events from network ingress.
    pub fn sender(&self) -> mpsc::Sender<ConsensusEvent> {
        self.event_tx.clone()
    }

    /// The current state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Runs the FSM until every sender is dropped. Dropping the returned
    /// future cancels any armed deadline with it.
    pub async fn run(mut self) {
        info!("consensus fsm started");
        self.enter_epoch().await;
        self.drain_ready().await;
        while let Some(event) = self.next_event().await {
            self.process(event).await;
        }
        info!("consensus fsm stopped");
    }

    /// Handles one event against the current state, then any events the
    /// handling produced (own outputs, replayed buffers). Exposed for the
    /// run loop and for deterministic tests that drive the FSM directly.
    pub async fn process(&mut self, event: ConsensusEvent) {
        self.handle(event).await;
        self.drain_ready().await;
    }

    async fn drain_ready(&mut self) {
        while let Some(event) = self.ready.pop_front() {
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: ConsensusEvent) {
        if let EventKind::Backdoor(target) = event.kind {
            debug!(state = %self.state, target = %target, "backdoor transition");
            self.state = target;
            self.deadline = None;
            return;
        }
        if self.ctx.is_stale_event(&event) {
            trace!(kind = ?event.kind, height = event.height, round = event.round_num, "dropping stale event");
            return;
        }
        if self.ctx.is_future_event(&event) {
            if self.ctx.is_stale_unmatched_event(&event) {
                debug!(kind = ?event.kind, height = event.height, "dropping expired future event");
            } else {
                trace!(kind = ?event.kind, height = event.height, round = event.round_num, "buffering future event");
                self.future_events.push(event);
            }
            return;
        }
        if self.ctx.is_stale_unmatched_event(&event) {
            debug!(kind = ?event.kind, height = event.height, "dropping expired event");
            return;
        }

        match (self.state, event.kind) {
            (State::Epoch, EventKind::NewRound) => self.enter_epoch().await,
            (State::AcceptBlockProposal, EventKind::ReceiveBlockProposal) => {
                match self.ctx.new_proposal_endorsement(event.message()) {
                    Ok(Some(output)) => self.emit(EventKind::ReceiveProposalEndorsement, output),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "rejected block proposal");
                        return;
                    }
                }
                self.enter_accept_lock_endorsement();
            }
            (State::AcceptBlockProposal, EventKind::ExpireAcceptBlock) => {
                // No proposal in time: honor the lock if one is held
                match self.ctx.new_proposal_endorsement(None) {
                    Ok(Some(output)) => self.emit(EventKind::ReceiveProposalEndorsement, output),
                    Ok(None) => debug!("no proposal received and no lock to honor"),
                    Err(e) => error!(error = %e, "failed to endorse locked block"),
                }
                self.enter_accept_lock_endorsement();
            }
            (State::AcceptLockEndorsement, EventKind::ReceiveProposalEndorsement) => {
                if let Some(message) = event.message() {
                    match self.ctx.new_lock_endorsement(message) {
                        Ok(Some(output)) => self.emit(EventKind::ReceiveLockEndorsement, output),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "rejected proposal endorsement"),
                    }
                }
            }
            (State::AcceptLockEndorsement, EventKind::ExpireAcceptProposalEndorsement) => {
                self.enter_accept_pre_commit_endorsement();
            }
            (State::AcceptPreCommitEndorsement, EventKind::ReceiveLockEndorsement) => {
                if let Some(message) = event.message() {
                    match self.ctx.new_pre_commit_endorsement(message) {
                        Ok(Some(output)) => {
                            self.emit(EventKind::ReceivePreCommitEndorsement, output)
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "rejected lock endorsement"),
                    }
                }
            }
            (State::AcceptPreCommitEndorsement, EventKind::ReceivePreCommitEndorsement) => {
                let Some(message) = event.message() else {
                    return;
                };
                match self.ctx.commit(message) {
                    Ok(true) => self.enter_epoch().await,
                    Ok(false) => {}
                    // The next round retries; a consensus failure never
                    // aborts the node
                    Err(e) => error!(error = %e, "failed to commit"),
                }
            }
            (State::AcceptPreCommitEndorsement, EventKind::ExpireCommit) => {
                debug!(height = event.height, round = event.round_num, "round expired without commit");
                self.enter_epoch().await;
            }
            (state, kind) => {
                // Keep current-round events that may match a later state
                trace!(state = %state, kind = ?kind, "event does not match current state");
                self.unmatched.push(event);
            }
        }
    }

    /// Next event to process; `None` only when every sender is gone.
    async fn next_event(&mut self) -> Option<ConsensusEvent> {
        loop {
            let Some(deadline) = self.deadline else {
                return self.event_rx.recv().await;
            };
            let now = self.ctx.clock().now();
            if now >= deadline {
                self.deadline = None;
                if let Some(event) = self.expiry_event() {
                    return Some(event);
                }
                continue;
            }
            let remaining = Duration::from_millis(deadline - now);
            tokio::select! {
                biased;
                event = self.event_rx.recv() => return event,
                _ = self.ctx.clock().sleep(remaining) => {
                    self.deadline = None;
                    if let Some(event) = self.expiry_event() {
                        return Some(event);
                    }
                }
            }
        }
    }

    /// The expiry event of the current state.
    fn expiry_event(&self) -> Option<ConsensusEvent> {
        let kind = match self.state {
            State::Epoch => EventKind::NewRound,
            State::AcceptBlockProposal => EventKind::ExpireAcceptBlock,
            State::AcceptLockEndorsement => EventKind::ExpireAcceptProposalEndorsement,
            State::AcceptPreCommitEndorsement => EventKind::ExpireCommit,
            State::RoundStart => return None,
        };
        self.ctx.new_consensus_event(kind, None)
    }

    async fn enter_epoch(&mut self) {
        self.transition(State::Epoch);
        if let Err(e) = self.ctx.prepare() {
            error!(error = %e, "failed to prepare round, retrying next interval");
            self.arm_deadline(self.ctx.config().block_interval);
            return;
        }
        // Replay events buffered for what used to be the future
        for event in self.future_events.drain(..) {
            self.ready.push_back(event);
        }
        if !self.ctx.is_delegate() {
            debug!(height = self.ctx.height(), "not an active delegate, standing by");
            self.arm_deadline(self.ctx.config().block_interval);
            return;
        }
        self.enter_round_start().await;
    }

    async fn enter_round_start(&mut self) {
        self.transition(State::RoundStart);
        let elapsed = self.ctx.wait_until_round_start().await;
        if !elapsed.is_zero() {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "round already started");
        }
        match self.ctx.proposal() {
            Ok(Some(proposal)) => self.emit(EventKind::ReceiveBlockProposal, proposal),
            Ok(None) => {}
            Err(e) => error!(error = %e, "failed to produce proposal"),
        }
        self.transition(State::AcceptBlockProposal);
        self.arm_deadline(self.ctx.config().fsm.accept_block_ttl);
    }

    fn enter_accept_lock_endorsement(&mut self) {
        self.transition(State::AcceptLockEndorsement);
        self.arm_deadline(self.ctx.config().fsm.accept_proposal_endorsement_ttl);
        // Shortcut: a node that already issued its COMMIT endorsement for
        // the locked block skips straight to the pre-commit phase
        if let Some(own_commit) = self.ctx.pre_commit_endorsement() {
            self.emit(EventKind::ReceivePreCommitEndorsement, own_commit);
            self.enter_accept_pre_commit_endorsement();
        }
    }

    fn enter_accept_pre_commit_endorsement(&mut self) {
        self.transition(State::AcceptPreCommitEndorsement);
        self.arm_deadline(
            self.ctx.config().fsm.accept_lock_endorsement_ttl + self.ctx.config().fsm.commit_ttl,
        );
    }

    fn transition(&mut self, state: State) {
        if state != self.state {
            debug!(from = %self.state, to = %state, "fsm transition");
        }
        self.state = state;
        self.deadline = None;
        // A new state may match events that arrived too early for it
        for event in self.unmatched.drain(..) {
            self.ready.push_back(event);
        }
    }

    fn arm_deadline(&mut self, ttl: Duration) {
        self.deadline = Some(self.ctx.clock().now() + ttl.as_millis() as u64);
    }

    /// Broadcasts an own output and feeds it back into the event stream.
    fn emit(&mut self, kind: EventKind, message: EndorsedMessage) {
        self.ctx.broadcast(&message);
        if let Some(event) = self.ctx.new_consensus_event(kind, Some(message)) {
            self.ready.push_back(event);
        }
    }
}
