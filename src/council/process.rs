/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state machine through which the members of a council agree on the block at one height.
//!
//! A vote process runs on its own thread and owns every [`VoteProposal`] it knows about. The council
//! thread feeds it council messages through a channel and may cancel it at any time. Each revision
//! goes through four phases, each of which lasts a fixed duration:
//! 1. **Announce**: broadcast the revision this member is in.
//! 2. **Propose**: if fewer than [`proposal_threshold`] valid proposals exist for the revision,
//!    build one and broadcast it, even if it is empty.
//! 3. **Sign**: pick the best valid proposal of the revision (most operations, then smallest
//!    [voter distance](VoteProposal::voter_distance)), sign it, and broadcast every signature
//!    collected for it. Until the revision ends, a member that has not signed yet retries after
//!    every message it receives.
//! 4. **Escalate**: move to the revision given by [`escalated_revision`], and start over.
//!
//! Any time a proposal collects a quorum of block and proposal signatures, the process hands it to
//! the council through [`VoteProcessCallbacks::on_finalized`] and stops. A member that announces a
//! later revision at the same height moves this process to that revision immediately.

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::events::*;
use crate::ledger::InvalidOperations;
use crate::types::{
    block::Block,
    crypto_primitives::{Keypair, SigningKey},
    data_types::{BlockHeight, CryptoHash, IssuerIndex, Revision, Timestamp, UniqueIdentifier},
    vote_members::VoteMembers,
};

use super::{
    messages::{
        CouncilPayload, CurrentRevision, ProposalMessage, SignatureMessage, Vote, VoteResult,
    },
    proposal::VoteProposal,
};

/// Upper bound on how long a cancelled process takes to notice it was cancelled.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How far ahead of the local revision an announcement may be and still move the process there.
/// Announcements beyond it, or at [`Revision::MAX`], are dropped.
pub const MAX_REVISION_SKIP: u32 = 64;

/// What a vote process needs from the council that runs it.
pub trait VoteProcessCallbacks: Send + 'static {
    /// Build this member's proposal for the block after `previous`. `None` proposes nothing.
    fn get_proposal(&mut self, previous: &Block, revision: Revision) -> Option<Block>;

    /// Check another member's proposed block. Returns the operations at fault; empty if the block is
    /// valid.
    fn check_proposal(&mut self, previous: &Block, block: &Block) -> InvalidOperations;

    /// Send a message to every other member.
    fn broadcast(&mut self, payload: CouncilPayload);

    /// Called once, with the proposal that collected a quorum of signatures.
    fn on_finalized(&mut self, proposal: &VoteProposal);

    /// Called whenever a proposal gains a block, a vote, or signatures.
    fn on_proposal_changed(&mut self, proposal: &VoteProposal);
}

/// How long each phase of a revision lasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseTimeouts {
    pub announce: Duration,
    pub propose: Duration,
    pub sign: Duration,
    pub escalate: Duration,
}

impl Default for PhaseTimeouts {
    fn default() -> Self {
        PhaseTimeouts {
            announce: Duration::from_millis(200),
            propose: Duration::from_secs(1),
            sign: Duration::from_secs(1),
            escalate: Duration::from_secs(1),
        }
    }
}

pub struct VoteProcessConfig {
    pub signing_key: SigningKey,
    pub issuer: IssuerIndex,
    pub members: Arc<VoteMembers>,
    /// The last finalized block. The process agrees on the block at the height after it.
    pub previous: Block,
    pub timeouts: PhaseTimeouts,
}

/// The minimum number of valid proposals a revision needs before a member stops proposing its own.
pub fn proposal_threshold(member_count: usize) -> usize {
    usize::max(2, member_count / 4 + 1)
}

/// The revision that follows `current` when a revision ends without finalizing.
///
/// That is `current + 1`, unless at least half of the members announced a higher revision, in which
/// case it is the highest revision that half of the members have reached.
pub fn escalated_revision(
    current: Revision,
    announced: impl IntoIterator<Item = Revision>,
    member_count: usize,
) -> Revision {
    let mut announced: Vec<Revision> = announced.into_iter().collect();
    announced.sort_unstable_by(|a, b| b.cmp(a));
    let half = (member_count + 1) / 2;
    let next = current + 1;
    if half == 0 || announced.len() < half {
        return next;
    }
    Revision::max(next, announced[half - 1])
}

/// Among `candidates`, the proposal with the most operations, ties going to the smallest voter
/// distance.
pub fn best_proposal<'a>(
    candidates: impl Iterator<Item = &'a VoteProposal>,
) -> Option<&'a VoteProposal> {
    candidates.max_by_key(|proposal| {
        (
            proposal.operation_count(),
            Reverse(proposal.voter_distance()),
        )
    })
}

/// A handle to a running vote process. Dropping it cancels the process and waits for its thread.
pub struct VoteProcessHandle {
    height: BlockHeight,
    inbox: Sender<(IssuerIndex, CouncilPayload)>,
    cancelled: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl VoteProcessHandle {
    /// The height the process is agreeing on.
    pub fn height(&self) -> BlockHeight {
        self.height
    }

    /// Hand a verified council message from member `sender` to the process.
    pub fn deliver(&self, sender: IssuerIndex, payload: CouncilPayload) {
        let _ = self.inbox.send((sender, payload));
    }

    /// Ask the process to stop. Returns immediately, and may be called any number of times from any
    /// thread.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the process thread has exited, either because it finalized a block or because it was
    /// cancelled.
    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    /// Wait for the process thread to exit.
    pub fn join(mut self) {
        self.join_thread();
    }

    /// Cancel the process and wait for its thread to exit.
    pub fn stop(self) {
        self.cancel();
        self.join();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::warn!("vote process for height {} panicked", self.height);
            }
        }
    }
}

impl Drop for VoteProcessHandle {
    fn drop(&mut self) {
        self.cancel();
        self.join_thread();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Phase {
    Announce,
    Propose,
    Sign,
    Escalate,
}

/// Why the phases of a revision stopped before they ran out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    Cancelled,
    Finalized,
    SkipTo(Revision),
}

pub struct VoteProcess<C: VoteProcessCallbacks> {
    keypair: Keypair,
    me: IssuerIndex,
    members: Arc<VoteMembers>,
    previous: Block,
    height: BlockHeight,
    revision: Revision,
    phase: Phase,
    proposals: BTreeMap<(Revision, IssuerIndex), VoteProposal>,
    announced: BTreeMap<IssuerIndex, Revision>,
    signed: BTreeSet<Revision>,
    timeouts: PhaseTimeouts,
    callbacks: C,
    inbox: Receiver<(IssuerIndex, CouncilPayload)>,
    cancelled: Arc<AtomicBool>,
    event_publisher: Option<Sender<Event>>,
}

impl<C: VoteProcessCallbacks> VoteProcess<C> {
    /// Spawn a vote process for the height after `config.previous`.
    ///
    /// `restored` holds proposals for that height recovered from a previous run. The process starts
    /// in the highest revision among them.
    pub fn start(
        config: VoteProcessConfig,
        callbacks: C,
        restored: Vec<VoteProposal>,
        event_publisher: Option<Sender<Event>>,
    ) -> VoteProcessHandle {
        let height = config.previous.height + 1;
        let (inbox_sender, inbox) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));

        let revision = restored
            .iter()
            .filter(|proposal| proposal.height() == height)
            .map(|proposal| proposal.revision())
            .max()
            .unwrap_or(Revision::init());
        let proposals = restored
            .into_iter()
            .filter(|proposal| proposal.height() == height)
            .map(|proposal| ((proposal.revision(), proposal.issuer()), proposal))
            .collect();

        let process = VoteProcess {
            keypair: Keypair::new(config.signing_key),
            me: config.issuer,
            members: config.members,
            previous: config.previous,
            height,
            revision,
            phase: Phase::Announce,
            proposals,
            announced: BTreeMap::new(),
            signed: BTreeSet::new(),
            timeouts: config.timeouts,
            callbacks,
            inbox,
            cancelled: cancelled.clone(),
            event_publisher,
        };
        let thread = thread::spawn(move || process.run());

        VoteProcessHandle {
            height,
            inbox: inbox_sender,
            cancelled,
            thread: Some(thread),
        }
    }

    fn run(mut self) {
        Event::publish(
            &self.event_publisher,
            Event::StartProcess(StartProcessEvent {
                timestamp: SystemTime::now(),
                chain: self.members.chain(),
                height: self.height,
            }),
        );

        if self.finalize_restored() {
            return;
        }

        let interrupt = loop {
            match self.run_revision() {
                Ok(()) => {
                    let next = escalated_revision(
                        self.revision,
                        self.announced.values().copied(),
                        self.members.len(),
                    );
                    self.enter_revision(next);
                }
                Err(Interrupt::SkipTo(revision)) => self.enter_revision(revision),
                Err(interrupt) => break interrupt,
            }
        };

        if interrupt == Interrupt::Cancelled {
            Event::publish(
                &self.event_publisher,
                Event::CancelProcess(CancelProcessEvent {
                    timestamp: SystemTime::now(),
                    chain: self.members.chain(),
                    height: self.height,
                }),
            );
        }
    }

    fn finalize_restored(&mut self) -> bool {
        if let Some(proposal) = self.proposals.values().find(|proposal| proposal.is_finalized()) {
            self.callbacks.on_finalized(proposal);
            return true;
        }
        false
    }

    fn run_revision(&mut self) -> Result<(), Interrupt> {
        self.phase = Phase::Announce;
        self.announce();
        self.wait(self.timeouts.announce)?;

        self.phase = Phase::Propose;
        self.propose();
        self.wait(self.timeouts.propose)?;

        self.phase = Phase::Sign;
        self.sign()?;
        self.wait(self.timeouts.sign)?;

        self.phase = Phase::Escalate;
        self.wait(self.timeouts.escalate)
    }

    fn enter_revision(&mut self, revision: Revision) {
        self.revision = revision;
        // Proposals more than one revision behind can no longer be signed by anyone that follows.
        self.proposals
            .retain(|(proposal_revision, _), _| *proposal_revision + 1 >= revision);
    }

    fn announce(&mut self) {
        let announced = self.announced.entry(self.me).or_insert(self.revision);
        *announced = Revision::max(*announced, self.revision);

        Event::publish(
            &self.event_publisher,
            Event::EnterRevision(EnterRevisionEvent {
                timestamp: SystemTime::now(),
                height: self.height,
                revision: self.revision,
            }),
        );
        self.callbacks
            .broadcast(CouncilPayload::CurrentRevision(CurrentRevision {
                height: self.height,
                revision: self.revision,
            }));
    }

    fn propose(&mut self) {
        let revision = self.revision;
        let valid_proposals = self
            .proposals
            .iter()
            .filter(|((proposal_revision, _), proposal)| {
                *proposal_revision == revision && proposal.is_valid()
            })
            .count();
        if valid_proposals >= proposal_threshold(self.members.len()) {
            return;
        }
        let already_proposed = self
            .proposals
            .get(&(revision, self.me))
            .map(|proposal| proposal.is_proposed())
            .unwrap_or(false);
        if already_proposed {
            return;
        }

        let block = self.callbacks.get_proposal(&self.previous, revision);
        let proposal = proposal_entry(
            &mut self.proposals,
            &self.members,
            self.height,
            revision,
            self.me,
        );
        if !proposal.set_proposal(block.clone()) {
            log::warn!(
                "discarding own proposal for height {} revision {}: block does not match",
                self.height,
                revision
            );
            return;
        }
        let block_hash = block.as_ref().map(|block| block.hash);

        Event::publish(
            &self.event_publisher,
            Event::Propose(ProposeEvent {
                timestamp: SystemTime::now(),
                height: self.height,
                revision,
                block: block_hash,
                operation_count: proposal.operation_count(),
            }),
        );
        self.callbacks.broadcast(CouncilPayload::Proposal(ProposalMessage {
            height: self.height,
            revision,
            block,
        }));

        let result = match block_hash {
            Some(_) => VoteResult::Ok,
            None => VoteResult::EmptyProposal,
        };
        self.cast_vote(
            self.me,
            revision,
            block_hash.unwrap_or(CryptoHash::zero()),
            result,
            BTreeSet::new(),
        );
    }

    fn has_signed_in(&self, revision: Revision) -> bool {
        self.signed.contains(&revision)
            || self
                .proposals
                .iter()
                .any(|((proposal_revision, _), proposal)| {
                    *proposal_revision == revision && proposal.has_signed(&self.me)
                })
    }

    fn sign(&mut self) -> Result<(), Interrupt> {
        let revision = self.revision;
        if self.has_signed_in(revision) {
            return Ok(());
        }
        let best = best_proposal(
            self.proposals
                .values()
                .filter(|proposal| proposal.revision() == revision && proposal.is_valid()),
        )
        .map(|proposal| proposal.issuer());
        let block_issuer = match best {
            Some(block_issuer) => block_issuer,
            None => return Ok(()),
        };

        let proposal = match self.proposals.get_mut(&(revision, block_issuer)) {
            Some(proposal) => proposal,
            None => return Ok(()),
        };
        let (block_hash, attestation_bytes) = match proposal.block() {
            Some(block) => (block.hash, block.attestation_bytes()),
            None => return Ok(()),
        };
        let block_signature = self.keypair.sign(&block_hash.bytes());
        let proposal_signature = self.keypair.sign(&attestation_bytes);
        proposal.add_signature(self.me, block_signature, proposal_signature);
        self.signed.insert(revision);

        Event::publish(
            &self.event_publisher,
            Event::Sign(SignEvent {
                timestamp: SystemTime::now(),
                height: self.height,
                revision,
                block_issuer,
                block: block_hash,
            }),
        );
        self.callbacks
            .broadcast(CouncilPayload::Signature(signature_message(proposal)));
        self.callbacks.on_proposal_changed(proposal);

        if proposal.is_finalized() {
            self.callbacks.on_finalized(proposal);
            return Err(Interrupt::Finalized);
        }
        Ok(())
    }

    fn cast_vote(
        &mut self,
        block_issuer: IssuerIndex,
        revision: Revision,
        block_hash: CryptoHash,
        result: VoteResult,
        rejected: BTreeSet<UniqueIdentifier>,
    ) {
        let vote = Vote {
            voter: self.me,
            height: self.height,
            revision,
            block_issuer,
            block_hash,
            result,
            rejected,
            timestamp: Timestamp::now(),
        };
        if let Some(proposal) = self.proposals.get_mut(&(revision, block_issuer)) {
            proposal.add_vote(self.me, vote.clone());
            self.callbacks.on_proposal_changed(proposal);
        }
        self.callbacks.broadcast(CouncilPayload::Vote(vote.clone()));
        Event::publish(
            &self.event_publisher,
            Event::Vote(VoteEvent {
                timestamp: SystemTime::now(),
                vote,
            }),
        );
    }

    /// Handle messages until `duration` elapses. Returns early if the process was cancelled, a
    /// proposal was finalized, or another member moved to a later revision.
    fn wait(&mut self, duration: Duration) -> Result<(), Interrupt> {
        let deadline = Instant::now() + duration;
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(Interrupt::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }

            match self.inbox.recv_timeout(Duration::min(deadline - now, POLL_INTERVAL)) {
                Ok((sender, payload)) => {
                    self.on_message(sender, payload)?;
                    if self.phase >= Phase::Sign {
                        self.sign()?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => return Err(Interrupt::Cancelled),
            }
        }
    }

    fn in_window(&self, revision: Revision) -> bool {
        revision.distance(self.revision) <= 1
    }

    fn on_message(&mut self, sender: IssuerIndex, payload: CouncilPayload) -> Result<(), Interrupt> {
        if sender == self.me || !self.members.contains(&sender) {
            return Ok(());
        }
        if payload.height() != self.height {
            return Ok(());
        }

        match payload {
            CouncilPayload::CurrentRevision(current) => {
                self.on_current_revision(sender, current.revision)
            }
            CouncilPayload::Proposal(proposal) => {
                self.on_proposal(sender, proposal);
                Ok(())
            }
            CouncilPayload::Vote(vote) => {
                self.on_vote(sender, vote);
                Ok(())
            }
            CouncilPayload::Signature(signatures) => self.on_signature(signatures),
        }
    }

    fn on_current_revision(
        &mut self,
        sender: IssuerIndex,
        revision: Revision,
    ) -> Result<(), Interrupt> {
        let reachable = self.revision + MAX_REVISION_SKIP;
        if revision == Revision::MAX || revision > reachable {
            log::debug!(
                "ignoring revision {} announced by member {} at height {}, current revision is {}",
                revision,
                sender,
                self.height,
                self.revision
            );
            return Ok(());
        }
        let announced = self.announced.entry(sender).or_insert(revision);
        *announced = Revision::max(*announced, revision);
        if revision > self.revision {
            log::debug!(
                "member {} announced revision {} at height {}, skipping ahead from {}",
                sender,
                revision,
                self.height,
                self.revision
            );
            return Err(Interrupt::SkipTo(revision));
        }
        Ok(())
    }

    fn on_proposal(&mut self, sender: IssuerIndex, message: ProposalMessage) {
        let ProposalMessage {
            revision, block, ..
        } = message;
        let block_hash = block.as_ref().map(|block| block.hash);

        Event::publish(
            &self.event_publisher,
            Event::ReceiveProposal(ReceiveProposalEvent {
                timestamp: SystemTime::now(),
                origin: sender,
                height: self.height,
                revision,
                block: block_hash,
            }),
        );

        if !self.in_window(revision) {
            self.cast_vote(
                sender,
                revision,
                block_hash.unwrap_or(CryptoHash::zero()),
                VoteResult::InvalidRevision,
                BTreeSet::new(),
            );
            return;
        }
        let already_proposed = self
            .proposals
            .get(&(revision, sender))
            .map(|proposal| proposal.is_proposed())
            .unwrap_or(false);
        if already_proposed {
            return;
        }

        let (result, rejected) = match &block {
            Some(block) => self.verify_proposal(sender, revision, block),
            None => (VoteResult::EmptyProposal, BTreeSet::new()),
        };

        let proposal = proposal_entry(
            &mut self.proposals,
            &self.members,
            self.height,
            revision,
            sender,
        );
        proposal.set_proposal(block);

        self.cast_vote(
            sender,
            revision,
            block_hash.unwrap_or(CryptoHash::zero()),
            result,
            rejected,
        );
    }

    fn verify_proposal(
        &mut self,
        sender: IssuerIndex,
        revision: Revision,
        block: &Block,
    ) -> (VoteResult, BTreeSet<UniqueIdentifier>) {
        if block.chain != self.members.chain() {
            return (VoteResult::InvalidCouncilId, BTreeSet::new());
        }
        if block.height != self.height || block.revision != revision {
            return (VoteResult::InvalidBlockId, BTreeSet::new());
        }
        if block.issuer != sender {
            return (VoteResult::InvalidIssuer, BTreeSet::new());
        }
        if !block.extends(&self.previous) || !block.is_well_formed() {
            return (VoteResult::InvalidBlockId, BTreeSet::new());
        }

        let rejected = self.callbacks.check_proposal(&self.previous, block);
        if rejected.is_empty() {
            (VoteResult::Ok, rejected)
        } else {
            (VoteResult::InvalidTransactions, rejected)
        }
    }

    fn on_vote(&mut self, sender: IssuerIndex, vote: Vote) {
        if !self.in_window(vote.revision) || !self.members.contains(&vote.block_issuer) {
            return;
        }
        let proposal = proposal_entry(
            &mut self.proposals,
            &self.members,
            self.height,
            vote.revision,
            vote.block_issuer,
        );
        if proposal.add_vote(sender, vote) {
            self.callbacks.on_proposal_changed(proposal);
        }
    }

    fn on_signature(&mut self, message: SignatureMessage) -> Result<(), Interrupt> {
        if !self.in_window(message.revision) || !self.members.contains(&message.block_issuer) {
            return Ok(());
        }
        let proposal = proposal_entry(
            &mut self.proposals,
            &self.members,
            self.height,
            message.revision,
            message.block_issuer,
        );

        let mut added = false;
        for (issuer, block_signature) in message.block_signatures.iter() {
            if let Some(proposal_signature) = message.proposal_signatures.get(issuer) {
                added |= proposal.add_signature(*issuer, *block_signature, *proposal_signature);
            }
        }
        if !added {
            return Ok(());
        }

        self.callbacks.on_proposal_changed(proposal);
        if proposal.is_finalized() {
            self.callbacks.on_finalized(proposal);
            return Err(Interrupt::Finalized);
        }
        if proposal.has_signed(&self.me) {
            self.callbacks
                .broadcast(CouncilPayload::Signature(signature_message(proposal)));
        }
        Ok(())
    }
}

fn proposal_entry<'a>(
    proposals: &'a mut BTreeMap<(Revision, IssuerIndex), VoteProposal>,
    members: &Arc<VoteMembers>,
    height: BlockHeight,
    revision: Revision,
    issuer: IssuerIndex,
) -> &'a mut VoteProposal {
    proposals
        .entry((revision, issuer))
        .or_insert_with(|| VoteProposal::new(members.clone(), height, revision, issuer))
}

fn signature_message(proposal: &VoteProposal) -> SignatureMessage {
    SignatureMessage {
        height: proposal.height(),
        revision: proposal.revision(),
        block_issuer: proposal.issuer(),
        block_signatures: proposal.block_signatures().clone(),
        proposal_signatures: proposal.proposal_signatures().clone(),
    }
}
