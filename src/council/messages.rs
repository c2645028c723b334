/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages that members of a council exchange to agree on the next block of their chain.
//!
//! Every message is a [`CouncilMessage`]: a [`CouncilPayload`] addressed to one chain, tagged with the
//! issuer index of its sender, and signed by the sender's chain key. The four payloads are:
//! 1. [`ProposalMessage`]: a member's candidate block for a (height, revision), possibly empty.
//! 2. [`Vote`]: a member's verdict on another member's proposal.
//! 3. [`SignatureMessage`]: the signatures a member has collected for a proposal, including its own.
//! 4. [`CurrentRevision`]: the revision a member is currently in.

use std::collections::BTreeSet;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    crypto_primitives::{Signer, SigningKey},
    data_types::*,
    signatures::SignatureSet,
    signed_messages::SignedMessage,
};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CouncilMessage {
    pub chain: ChainAddress,
    pub issuer: IssuerIndex,
    pub payload: CouncilPayload,
    pub signature: SignatureBytes,
}

impl CouncilMessage {
    /// Create a message and sign it with `signing_key`.
    pub fn new(
        signing_key: &SigningKey,
        chain: ChainAddress,
        issuer: IssuerIndex,
        payload: CouncilPayload,
    ) -> CouncilMessage {
        let message = signing_bytes(chain, issuer, &payload);
        let signature = SignatureBytes::new(signing_key.sign(&message).to_bytes());
        CouncilMessage {
            chain,
            issuer,
            payload,
            signature,
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.payload.height()
    }

    pub fn revision(&self) -> Revision {
        self.payload.revision()
    }
}

impl SignedMessage for CouncilMessage {
    fn message_bytes(&self) -> Vec<u8> {
        signing_bytes(self.chain, self.issuer, &self.payload)
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

fn signing_bytes(chain: ChainAddress, issuer: IssuerIndex, payload: &CouncilPayload) -> Vec<u8> {
    let mut bytes = chain.try_to_vec().unwrap();
    bytes.extend(issuer.try_to_vec().unwrap());
    bytes.extend(payload.try_to_vec().unwrap());
    bytes
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CouncilPayload {
    Proposal(ProposalMessage),
    Vote(Vote),
    Signature(SignatureMessage),
    CurrentRevision(CurrentRevision),
}

impl CouncilPayload {
    pub fn height(&self) -> BlockHeight {
        match self {
            CouncilPayload::Proposal(proposal) => proposal.height,
            CouncilPayload::Vote(vote) => vote.height,
            CouncilPayload::Signature(signature) => signature.height,
            CouncilPayload::CurrentRevision(current) => current.height,
        }
    }

    pub fn revision(&self) -> Revision {
        match self {
            CouncilPayload::Proposal(proposal) => proposal.revision,
            CouncilPayload::Vote(vote) => vote.revision,
            CouncilPayload::Signature(signature) => signature.revision,
            CouncilPayload::CurrentRevision(current) => current.revision,
        }
    }
}

/// A member's candidate for the block at `height`. `block` is `None` if the member had nothing to
/// propose.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalMessage {
    pub height: BlockHeight,
    pub revision: Revision,
    pub block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub voter: IssuerIndex,
    pub height: BlockHeight,
    pub revision: Revision,
    /// Issuer of the proposal this vote is about.
    pub block_issuer: IssuerIndex,
    /// Hash of the proposed block, or [`CryptoHash::zero`] for an empty proposal.
    pub block_hash: CryptoHash,
    pub result: VoteResult,
    /// Ids of the operations that made the proposal invalid, if `result` is
    /// [`VoteResult::InvalidTransactions`].
    pub rejected: BTreeSet<UniqueIdentifier>,
    /// When the vote was cast. A member's later vote on the same proposal replaces its earlier one.
    pub timestamp: Timestamp,
}

impl Vote {
    pub fn is_positive(&self) -> bool {
        self.result == VoteResult::Ok
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum VoteResult {
    Ok,
    /// Some operations in the block are not admissible.
    InvalidTransactions,
    /// The block's hash, height, or links to the previous block are wrong.
    InvalidBlockId,
    /// The block was not issued by the member that proposed it.
    InvalidIssuer,
    /// The proposal's revision is too far from the voter's.
    InvalidRevision,
    /// The block belongs to another chain.
    InvalidCouncilId,
    EmptyProposal,
}

/// The block and proposal signatures a member has collected for the proposal of `block_issuer` at
/// (`height`, `revision`).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureMessage {
    pub height: BlockHeight,
    pub revision: Revision,
    pub block_issuer: IssuerIndex,
    pub block_signatures: SignatureSet,
    pub proposal_signatures: SignatureSet,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CurrentRevision {
    pub height: BlockHeight,
    pub revision: Revision,
}
