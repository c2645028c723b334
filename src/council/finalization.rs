/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Side effects of finalizing a block, beyond storing it.
//!
//! A [`FinalizationHook`] does not touch the network itself. It returns the messages it wants sent,
//! and the council thread sends them after the block is stored: on the chain's own network, or on the
//! network of the parent ledger the council was started with.
//!
//! Root and data councils have no side effects ([`NoSideEffects`]). Service and maintenance councils
//! carry each finalized block to the root ledger ([`ParentLedgerCarrier`]), where importing it settles
//! purchases and payouts against account balances.

use crate::networking::Message;
use crate::types::{
    block::Block,
    crypto_primitives::{SigningKey, VerifyingKey},
    data_types::{AccountId, ChainAddress, ChainKind, KeyIndex, Timestamp, UniqueIdentifier},
    operations::{ChainBlockImport, Operation, OperationBody, OperationHeader},
    signatures::BlockSignatures,
};

pub enum OutboundMessage {
    /// To every member of this chain.
    Broadcast(Message),
    /// To one member of this chain.
    Send(VerifyingKey, Message),
    /// To the members of the parent ledger, over the council's parent network.
    Parent(Message),
}

pub trait FinalizationHook: Send + 'static {
    /// Called once `block` is stored, with the signatures that finalized it.
    fn on_finalized(&mut self, block: &Block, signatures: &BlockSignatures) -> Vec<OutboundMessage>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoSideEffects;

impl FinalizationHook for NoSideEffects {
    fn on_finalized(&mut self, _: &Block, _: &BlockSignatures) -> Vec<OutboundMessage> {
        Vec::new()
    }
}

/// Wraps every finalized service or maintenance block into an `ImportChainBlock` operation addressed
/// to the root ledger, signed with a chain key that has the
/// [`CHAIN_BLOCK`](crate::types::operations::ChainKeyFlags::CHAIN_BLOCK) flag, and sends it to the
/// parent ledger.
pub struct ParentLedgerCarrier {
    signing_key: SigningKey,
    key_index: KeyIndex,
    account: AccountId,
}

impl ParentLedgerCarrier {
    pub fn new(signing_key: SigningKey, key_index: KeyIndex, account: AccountId) -> Self {
        Self {
            signing_key,
            key_index,
            account,
        }
    }

    /// The carrier operation for `block`.
    ///
    /// Its unique identifier is derived from the block hash, so every member of the council that
    /// finalized `block` produces a carrier with the same identifier and the root ledger imports the
    /// block once.
    pub fn carrier(&self, block: &Block, signatures: &BlockSignatures) -> Operation {
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&block.hash.bytes()[..8]);
        let unique_id = UniqueIdentifier::new(u64::from_le_bytes(id_bytes) >> 1);

        let header = OperationHeader {
            chain: ChainAddress::root(),
            account: self.account,
            key_index: Some(self.key_index),
            timestamp: Timestamp::now(),
            unique_id,
        };
        let body = OperationBody::ImportChainBlock(Box::new(ChainBlockImport {
            block: block.clone(),
            proposal_signatures: signatures.proposal.clone(),
        }));
        Operation::new(&self.signing_key, header, body)
    }
}

impl FinalizationHook for ParentLedgerCarrier {
    fn on_finalized(&mut self, block: &Block, signatures: &BlockSignatures) -> Vec<OutboundMessage> {
        match block.chain.kind {
            ChainKind::Service | ChainKind::Maintain => {
                let carrier = self.carrier(block, signatures);
                log::debug!(
                    "carrying block {} of chain {} to the root ledger as operation {}",
                    block.height,
                    block.chain,
                    carrier.unique_id()
                );
                vec![OutboundMessage::Parent(Message::Operation(carrier))]
            }
            ChainKind::Root | ChainKind::Data => Vec::new(),
        }
    }
}
