/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state a member keeps about one proposal: its block, the votes cast on it, and the signatures
//! collected for it.
//!
//! A proposal is identified by (height, revision, issuer). Votes and signatures may arrive before the
//! block they are about, so a `VoteProposal` can exist without a block. Signatures received before
//! the block are held back and verified once the block is known.

use std::{collections::BTreeMap, sync::Arc};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    block::Block,
    crypto_primitives::{Signature, Verifier},
    data_types::{BlockHeight, CryptoHash, IssuerIndex, Revision, SignatureBytes},
    signatures::{BlockSignatures, SignatureSet},
    vote_members::VoteMembers,
};

use super::messages::Vote;

pub struct VoteProposal {
    members: Arc<VoteMembers>,
    height: BlockHeight,
    revision: Revision,
    issuer: IssuerIndex,
    // Whether the proposal message itself has been seen, as opposed to only votes or signatures on it.
    proposed: bool,
    block: Option<Block>,
    votes: BTreeMap<IssuerIndex, Vote>,
    positive_votes: usize,
    block_signatures: SignatureSet,
    proposal_signatures: SignatureSet,
    pending_signatures: BTreeMap<IssuerIndex, (SignatureBytes, SignatureBytes)>,
}

impl VoteProposal {
    pub fn new(
        members: Arc<VoteMembers>,
        height: BlockHeight,
        revision: Revision,
        issuer: IssuerIndex,
    ) -> VoteProposal {
        VoteProposal {
            members,
            height,
            revision,
            issuer,
            proposed: false,
            block: None,
            votes: BTreeMap::new(),
            positive_votes: 0,
            block_signatures: SignatureSet::new(),
            proposal_signatures: SignatureSet::new(),
            pending_signatures: BTreeMap::new(),
        }
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn issuer(&self) -> IssuerIndex {
        self.issuer
    }

    pub fn block(&self) -> Option<&Block> {
        self.block.as_ref()
    }

    /// Hash of the proposed block, or [`CryptoHash::zero`] if no block is known.
    pub fn block_hash(&self) -> CryptoHash {
        self.block
            .as_ref()
            .map(|block| block.hash)
            .unwrap_or(CryptoHash::zero())
    }

    pub fn is_proposed(&self) -> bool {
        self.proposed
    }

    /// Record the proposal message, with the block it carries.
    ///
    /// Returns false, and changes nothing, if a proposal was already recorded or if `block` was not
    /// issued for this proposal's (height, revision, issuer).
    pub fn set_proposal(&mut self, block: Option<Block>) -> bool {
        if self.proposed {
            return false;
        }
        if let Some(block) = &block {
            let consistent = block.height == self.height
                && block.revision == self.revision
                && block.issuer == self.issuer
                && block.chain == self.members.chain();
            if !consistent {
                return false;
            }
        }

        self.proposed = true;
        self.block = block;
        self.recount_votes();
        let pending = std::mem::take(&mut self.pending_signatures);
        for (issuer, (block_signature, proposal_signature)) in pending {
            self.add_signature(issuer, block_signature, proposal_signature);
        }
        true
    }

    /// Record a vote received from `sender`.
    ///
    /// The vote is ignored if `sender` is not the voter or not a member, if the vote is about another
    /// proposal, or if an equally recent or newer vote from the same voter is already recorded.
    pub fn add_vote(&mut self, sender: IssuerIndex, vote: Vote) -> bool {
        if vote.voter != sender || !self.members.contains(&sender) {
            return false;
        }
        if vote.height != self.height
            || vote.revision != self.revision
            || vote.block_issuer != self.issuer
        {
            return false;
        }
        if let Some(previous) = self.votes.get(&sender) {
            if previous.timestamp >= vote.timestamp {
                return false;
            }
        }

        self.votes.insert(sender, vote);
        self.recount_votes();
        true
    }

    fn recount_votes(&mut self) {
        let block_hash = self.block_hash();
        self.positive_votes = self
            .votes
            .values()
            .filter(|vote| vote.is_positive() && vote.block_hash == block_hash)
            .count();
    }

    pub fn positive_votes(&self) -> usize {
        self.positive_votes
    }

    pub fn votes(&self) -> impl Iterator<Item = &Vote> {
        self.votes.values()
    }

    /// Record `issuer`'s signatures over the block hash and over the attestation bytes.
    ///
    /// If the block is not known yet, the signatures are held back until it is. Otherwise both must
    /// verify against `issuer`'s key to be accepted.
    pub fn add_signature(
        &mut self,
        issuer: IssuerIndex,
        block_signature: SignatureBytes,
        proposal_signature: SignatureBytes,
    ) -> bool {
        let verifying_key = match self.members.get(&issuer) {
            Some(verifying_key) => *verifying_key,
            None => return false,
        };
        if self.block_signatures.contains(&issuer) {
            return false;
        }
        let block = match &self.block {
            Some(block) => block,
            None => {
                if self.proposed {
                    return false;
                }
                self.pending_signatures
                    .insert(issuer, (block_signature, proposal_signature));
                return false;
            }
        };

        let block_signature_ok = verifying_key
            .verify(
                &block.hash.bytes(),
                &Signature::from_bytes(&block_signature.bytes()),
            )
            .is_ok();
        let proposal_signature_ok = verifying_key
            .verify(
                &block.attestation_bytes(),
                &Signature::from_bytes(&proposal_signature.bytes()),
            )
            .is_ok();
        if !(block_signature_ok && proposal_signature_ok) {
            return false;
        }

        self.block_signatures.insert(issuer, block_signature);
        self.proposal_signatures.insert(issuer, proposal_signature);
        true
    }

    pub fn has_signed(&self, issuer: &IssuerIndex) -> bool {
        self.block_signatures.contains(issuer)
    }

    pub fn block_signatures(&self) -> &SignatureSet {
        &self.block_signatures
    }

    pub fn proposal_signatures(&self) -> &SignatureSet {
        &self.proposal_signatures
    }

    pub fn signatures(&self) -> BlockSignatures {
        BlockSignatures {
            block: self.block_signatures.clone(),
            proposal: self.proposal_signatures.clone(),
        }
    }

    /// Whether the proposal carries a block and a quorum of members voted for it.
    pub fn is_valid(&self) -> bool {
        self.block.is_some() && self.members.is_quorum(self.positive_votes)
    }

    /// Whether a quorum of members signed both the block hash and the attestation bytes.
    pub fn is_finalized(&self) -> bool {
        match &self.block {
            Some(block) => {
                self.members
                    .is_block_signature_valid(block, &self.block_signatures)
                    && self
                        .members
                        .is_proposal_signature_valid(block, &self.proposal_signatures)
            }
            None => false,
        }
    }

    pub fn operation_count(&self) -> usize {
        self.block
            .as_ref()
            .map(|block| block.operation_count())
            .unwrap_or(0)
    }

    /// How far the issuer of this proposal is from the member preferred to propose at this height.
    ///
    /// The preferred member is the one at position `height % n` among the `n` members ordered by
    /// issuer index. Distance is counted forwards, wrapping around. Returns `usize::MAX` if the issuer
    /// is not a member.
    pub fn voter_distance(&self) -> usize {
        voter_distance(&self.members, self.height, self.issuer)
    }

    /// Capture the state of this proposal for persistence.
    pub fn to_record(&self) -> ProposalRecord {
        ProposalRecord {
            height: self.height,
            revision: self.revision,
            issuer: self.issuer,
            proposed: self.proposed,
            block: self.block.clone(),
            votes: self.votes.values().cloned().collect(),
            signatures: self.signatures(),
        }
    }

    /// Rebuild a proposal from a record, re-checking every vote and signature against `members`.
    pub fn from_record(members: Arc<VoteMembers>, record: ProposalRecord) -> VoteProposal {
        let mut proposal = VoteProposal::new(members, record.height, record.revision, record.issuer);
        if record.proposed {
            proposal.set_proposal(record.block);
        }
        for vote in record.votes {
            proposal.add_vote(vote.voter, vote);
        }
        for (issuer, block_signature) in record.signatures.block.iter() {
            if let Some(proposal_signature) = record.signatures.proposal.get(issuer) {
                proposal.add_signature(*issuer, *block_signature, *proposal_signature);
            }
        }
        proposal
    }
}

pub(crate) fn voter_distance(
    members: &VoteMembers,
    height: BlockHeight,
    issuer: IssuerIndex,
) -> usize {
    let n = members.len();
    let position = match members.issuers().position(|member| *member == issuer) {
        Some(position) => position,
        None => return usize::MAX,
    };
    let preferred = (height.int() % n as u64) as usize;
    (position + n - preferred) % n
}

/// What a member persists about one proposal, so that it can resume voting after a restart.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalRecord {
    pub height: BlockHeight,
    pub revision: Revision,
    pub issuer: IssuerIndex,
    pub proposed: bool,
    pub block: Option<Block>,
    pub votes: Vec<Vote>,
    pub signatures: BlockSignatures,
}
