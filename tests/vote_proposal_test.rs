//! Tests of per-proposal vote and signature tallies, and of how a vote process picks among valid
//! proposals.

mod common;

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use ed25519_dalek::{Signer, SigningKey};

use common::fixtures::*;
use ledger_council::{
    council::{
        messages::{Vote, VoteResult},
        process::best_proposal,
        proposal::VoteProposal,
    },
    types::{
        block::{Block, BlockPayload},
        data_types::{
            AccountId, BlockHeight, ChainAddress, CryptoHash, IssuerIndex, Revision, SignatureBytes,
            Timestamp,
        },
        operations::{Operation, OperationBody},
        vote_members::VoteMembers,
    },
};

fn council(n: usize) -> (Vec<SigningKey>, Arc<VoteMembers>) {
    let keys = keypairs(n);
    let members: BTreeMap<IssuerIndex, _> = keys
        .iter()
        .enumerate()
        .map(|(index, key)| (IssuerIndex::new(index as u16), key.verifying_key()))
        .collect();
    (keys, Arc::new(VoteMembers::new(ChainAddress::root(), members)))
}

// A block at height 1 issued by `issuer`, carrying `operations` transfers. Equal arguments give equal
// blocks.
fn block(issuer: u16, revision: u32, operations: usize) -> Block {
    let key = SigningKey::from_bytes(&[7; 32]);
    let payloads = (0..operations)
        .map(|i| {
            let mut header = header(ChainAddress::root(), AccountId::new(1), None, i as u64);
            header.timestamp = Timestamp::new(1_000);
            BlockPayload::Operation(Operation::new(
                &key,
                header,
                OperationBody::Transfer {
                    receiver: AccountId::new(2),
                    amount: 1,
                    reason: String::new(),
                },
            ))
        })
        .collect();
    Block::new(
        &Block::genesis(ChainAddress::root()),
        IssuerIndex::new(issuer),
        Revision::new(revision),
        Timestamp::new(1_000),
        payloads,
    )
}

fn vote(voter: u16, proposal: &VoteProposal, result: VoteResult, timestamp: u64) -> Vote {
    Vote {
        voter: IssuerIndex::new(voter),
        height: proposal.height(),
        revision: proposal.revision(),
        block_issuer: proposal.issuer(),
        block_hash: proposal.block_hash(),
        result,
        rejected: BTreeSet::new(),
        timestamp: Timestamp::new(timestamp),
    }
}

fn sign(key: &SigningKey, block: &Block) -> (SignatureBytes, SignatureBytes) {
    (
        SignatureBytes::new(key.sign(&block.hash.bytes()).to_bytes()),
        SignatureBytes::new(key.sign(&block.attestation_bytes()).to_bytes()),
    )
}

fn proposal(members: &Arc<VoteMembers>, issuer: u16, block: Option<Block>) -> VoteProposal {
    let mut proposal = VoteProposal::new(
        members.clone(),
        BlockHeight::new(1),
        Revision::init(),
        IssuerIndex::new(issuer),
    );
    assert!(proposal.set_proposal(block));
    proposal
}

#[test]
fn proposals_only_accept_their_own_block() {
    let (_, members) = council(4);
    let mut proposal = VoteProposal::new(
        members,
        BlockHeight::new(1),
        Revision::init(),
        IssuerIndex::new(1),
    );
    assert!(!proposal.set_proposal(Some(block(2, 0, 1))));
    assert!(!proposal.set_proposal(Some(block(1, 3, 1))));
    assert!(proposal.set_proposal(Some(block(1, 0, 1))));
    // Set once.
    assert!(!proposal.set_proposal(Some(block(1, 0, 2))));
    assert_eq!(proposal.operation_count(), 1);
    assert_eq!(proposal.block_hash(), block(1, 0, 1).hash);
}

#[test]
fn a_majority_of_positive_votes_makes_a_proposal_valid() {
    let (_, members) = council(4);
    let mut proposal = proposal(&members, 1, Some(block(1, 0, 1)));

    // Votes are only counted from the voter itself, and only from members.
    assert!(!proposal.add_vote(IssuerIndex::new(2), vote(3, &proposal, VoteResult::Ok, 1)));
    assert!(!proposal.add_vote(IssuerIndex::new(9), vote(9, &proposal, VoteResult::Ok, 1)));

    assert!(proposal.add_vote(IssuerIndex::new(0), vote(0, &proposal, VoteResult::Ok, 1)));
    assert!(proposal.add_vote(IssuerIndex::new(1), vote(1, &proposal, VoteResult::Ok, 1)));
    assert!(proposal.add_vote(
        IssuerIndex::new(2),
        vote(2, &proposal, VoteResult::InvalidTransactions, 1)
    ));
    assert_eq!(proposal.positive_votes(), 2);
    assert!(!proposal.is_valid());

    // A later vote replaces an earlier one, an older one does not.
    assert!(proposal.add_vote(IssuerIndex::new(2), vote(2, &proposal, VoteResult::Ok, 2)));
    assert!(!proposal.add_vote(
        IssuerIndex::new(2),
        vote(2, &proposal, VoteResult::InvalidBlockId, 1)
    ));
    assert_eq!(proposal.positive_votes(), 3);
    assert!(proposal.is_valid());
}

#[test]
fn votes_for_another_block_do_not_count() {
    let (_, members) = council(3);
    let mut proposal = proposal(&members, 0, Some(block(0, 0, 1)));
    for voter in 0..3 {
        let mut stale = vote(voter, &proposal, VoteResult::Ok, 1);
        stale.block_hash = CryptoHash::new([7; 32]);
        proposal.add_vote(IssuerIndex::new(voter), stale);
    }
    assert_eq!(proposal.positive_votes(), 0);
    assert!(!proposal.is_valid());
}

#[test]
fn empty_proposals_are_never_valid() {
    let (_, members) = council(3);
    let mut proposal = proposal(&members, 0, None);
    for voter in 0..3 {
        proposal.add_vote(
            IssuerIndex::new(voter),
            vote(voter, &proposal, VoteResult::Ok, 1),
        );
    }
    assert!(!proposal.is_valid());
    assert!(!proposal.is_finalized());
}

#[test]
fn a_majority_of_signatures_finalizes_a_proposal() {
    let (keys, members) = council(4);
    let block = block(1, 0, 1);
    let mut proposal = VoteProposal::new(
        members.clone(),
        BlockHeight::new(1),
        Revision::init(),
        IssuerIndex::new(1),
    );

    // Signatures that arrive before the block are held back until it does.
    let (block_signature, proposal_signature) = sign(&keys[0], &block);
    assert!(!proposal.add_signature(IssuerIndex::new(0), block_signature, proposal_signature));
    assert!(proposal.set_proposal(Some(block.clone())));
    assert!(proposal.has_signed(&IssuerIndex::new(0)));

    // A signature by the wrong key is refused.
    let (block_signature, proposal_signature) = sign(&keys[3], &block);
    assert!(!proposal.add_signature(IssuerIndex::new(2), block_signature, proposal_signature));

    let (block_signature, proposal_signature) = sign(&keys[1], &block);
    assert!(proposal.add_signature(IssuerIndex::new(1), block_signature, proposal_signature));
    assert!(!proposal.is_finalized());

    let (block_signature, proposal_signature) = sign(&keys[2], &block);
    assert!(proposal.add_signature(IssuerIndex::new(2), block_signature, proposal_signature));
    assert!(proposal.is_finalized());

    let signatures = proposal.signatures();
    assert!(members.is_block_signature_valid(&block, &signatures.block));
    assert!(members.is_proposal_signature_valid(&block, &signatures.proposal));
}

#[test]
fn records_restore_votes_and_signatures() {
    let (keys, members) = council(3);
    let block = block(0, 0, 1);
    let mut original = proposal(&members, 0, Some(block.clone()));
    original.add_vote(IssuerIndex::new(1), vote(1, &original, VoteResult::Ok, 1));
    original.add_vote(IssuerIndex::new(2), vote(2, &original, VoteResult::Ok, 1));
    for (index, key) in keys.iter().enumerate().take(2) {
        let (block_signature, proposal_signature) = sign(key, &block);
        original.add_signature(IssuerIndex::new(index as u16), block_signature, proposal_signature);
    }
    assert!(original.is_finalized());

    let restored = VoteProposal::from_record(members, original.to_record());
    assert_eq!(restored.positive_votes(), 2);
    assert!(restored.is_valid());
    assert!(restored.is_finalized());
    assert_eq!(restored.to_record(), original.to_record());
}

#[test]
fn voter_distance_counts_forward_from_the_preferred_issuer() {
    let (_, members) = council(4);
    // At height 1 the preferred issuer is the second member.
    assert_eq!(proposal(&members, 1, None).voter_distance(), 0);
    assert_eq!(proposal(&members, 2, None).voter_distance(), 1);
    assert_eq!(proposal(&members, 0, None).voter_distance(), 3);

    let outsider = VoteProposal::new(
        members,
        BlockHeight::new(1),
        Revision::init(),
        IssuerIndex::new(7),
    );
    assert_eq!(outsider.voter_distance(), usize::MAX);
}

#[test]
fn the_best_proposal_has_the_most_operations_then_the_smallest_distance() {
    let (_, members) = council(4);
    // At height 1, issuers 1, 2 and 0 are at distance 0, 1 and 3.
    let small = proposal(&members, 1, Some(block(1, 0, 1)));
    let far = proposal(&members, 0, Some(block(0, 0, 2)));
    let near = proposal(&members, 2, Some(block(2, 0, 2)));
    let candidates = [small, far, near];

    let best = best_proposal(candidates.iter()).unwrap();
    assert_eq!(best.issuer(), IssuerIndex::new(2));

    let best = best_proposal(candidates[..2].iter()).unwrap();
    assert_eq!(best.issuer(), IssuerIndex::new(0));

    assert!(best_proposal(std::iter::empty::<&VoteProposal>()).is_none());
}
