/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a council emits, for event handling and logging.
//!
//! An event indicates that the action it names has been completed.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::council::messages::Vote;
use crate::ledger::{pluggables::StoreResult, OperationResult};
use crate::types::data_types::{
    BlockHeight, ChainAddress, CryptoHash, IssuerIndex, Revision, UniqueIdentifier,
};

pub enum Event {
    // Vote process lifecycle.
    StartProcess(StartProcessEvent),
    CancelProcess(CancelProcessEvent),
    EnterRevision(EnterRevisionEvent),
    // Events that involve broadcasting a council message.
    Propose(ProposeEvent),
    Vote(VoteEvent),
    Sign(SignEvent),
    // Events that involve receiving a council message.
    ReceiveProposal(ReceiveProposalEvent),
    // Events that change persistent state.
    Finalize(FinalizeEvent),
    StoreBlock(StoreBlockEvent),
    // Operation pool events.
    RejectOperation(RejectOperationEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

pub struct StartProcessEvent {
    pub timestamp: SystemTime,
    pub chain: ChainAddress,
    pub height: BlockHeight,
}

pub struct CancelProcessEvent {
    pub timestamp: SystemTime,
    pub chain: ChainAddress,
    pub height: BlockHeight,
}

pub struct EnterRevisionEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub revision: Revision,
}

pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub revision: Revision,
    /// `None` for an empty proposal.
    pub block: Option<CryptoHash>,
    pub operation_count: usize,
}

pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

pub struct SignEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub revision: Revision,
    pub block_issuer: IssuerIndex,
    pub block: CryptoHash,
}

pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: IssuerIndex,
    pub height: BlockHeight,
    pub revision: Revision,
    pub block: Option<CryptoHash>,
}

pub struct FinalizeEvent {
    pub timestamp: SystemTime,
    pub chain: ChainAddress,
    pub height: BlockHeight,
    pub revision: Revision,
    pub issuer: IssuerIndex,
    pub block: CryptoHash,
    pub operation_count: usize,
}

pub struct StoreBlockEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub block: CryptoHash,
    pub result: StoreResult,
}

pub struct RejectOperationEvent {
    pub timestamp: SystemTime,
    pub operation: UniqueIdentifier,
    pub result: OperationResult,
}
