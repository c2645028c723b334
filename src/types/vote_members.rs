/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The set of members that vote on the blocks of one chain, and the quorum predicate.
//!
//! Members are identified by the [`IssuerIndex`] of the chain key they vote with. A `VoteMembers` is an
//! immutable snapshot: a [vote process](crate::council::process) takes one when it starts and uses it
//! for every revision it runs.

use std::collections::BTreeMap;

use crate::ledger::entities::ChainInfo;

use super::{
    block::Block,
    crypto_primitives::{Signature, Verifier, VerifyingKey},
    data_types::{ChainAddress, IssuerIndex},
    operations::ChainKeyFlags,
    signatures::SignatureSet,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteMembers {
    chain: ChainAddress,
    members: BTreeMap<IssuerIndex, VerifyingKey>,
}

impl VoteMembers {
    pub fn new(chain: ChainAddress, members: BTreeMap<IssuerIndex, VerifyingKey>) -> Self {
        Self { chain, members }
    }

    /// Collect the voting members of `chain` out of its registration: every key that is not revoked,
    /// carries the vote flag of `chain.kind`, and belongs to `chain.index`.
    ///
    /// Keys whose bytes are not valid Ed25519 points are skipped.
    pub fn from_chain_info(chain: ChainAddress, chain_info: &ChainInfo) -> Self {
        let vote_flag = ChainKeyFlags::vote_flag(chain.kind);
        let members = chain_info
            .chain_keys
            .iter()
            .filter(|key| !key.revoked && key.flags.contains(vote_flag))
            .filter(|key| key.chain_index == chain.index)
            .filter_map(|key| {
                VerifyingKey::from_bytes(&key.public_key)
                    .ok()
                    .map(|verifying_key| (key.index, verifying_key))
            })
            .collect();
        Self { chain, members }
    }

    pub fn chain(&self) -> ChainAddress {
        self.chain
    }

    pub fn get(&self, issuer: &IssuerIndex) -> Option<&VerifyingKey> {
        self.members.get(issuer)
    }

    pub fn contains(&self, issuer: &IssuerIndex) -> bool {
        self.members.contains_key(issuer)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Issuer indices in ascending order.
    pub fn issuers(&self) -> impl Iterator<Item = &IssuerIndex> {
        self.members.keys()
    }

    /// Find the issuer index that `verifying_key` is registered under.
    pub fn issuer_of(&self, verifying_key: &VerifyingKey) -> Option<IssuerIndex> {
        self.members
            .iter()
            .find(|(_, key)| *key == verifying_key)
            .map(|(issuer, _)| *issuer)
    }

    /// Whether `count` distinct member signatures are more than half of the members.
    pub fn is_quorum(&self, count: usize) -> bool {
        !self.members.is_empty() && count * 2 > self.members.len()
    }

    /// Count the signatures in `signatures` that were made by a member over `message`.
    pub fn count_valid_signatures(&self, message: &[u8], signatures: &SignatureSet) -> usize {
        signatures
            .iter()
            .filter(|(issuer, signature)| match self.members.get(issuer) {
                Some(verifying_key) => verifying_key
                    .verify(message, &Signature::from_bytes(&signature.bytes()))
                    .is_ok(),
                None => false,
            })
            .count()
    }

    /// Whether a quorum of members signed the hash of `block`.
    pub fn is_block_signature_valid(&self, block: &Block, signatures: &SignatureSet) -> bool {
        self.is_quorum(self.count_valid_signatures(&block.hash.bytes(), signatures))
    }

    /// Whether a quorum of members signed the [attestation bytes](Block::attestation_bytes) of `block`.
    pub fn is_proposal_signature_valid(&self, block: &Block, signatures: &SignatureSet) -> bool {
        self.is_quorum(self.count_valid_signatures(&block.attestation_bytes(), signatures))
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::SigningKey;
    use rand_core::OsRng;

    use super::*;
    use crate::types::{
        crypto_primitives::Keypair,
        data_types::{ChainID, ChainIndex, ChainKind},
    };

    fn members(n: u16) -> (Vec<Keypair>, VoteMembers) {
        let mut csprg = OsRng {};
        let keypairs: Vec<Keypair> = (0..n)
            .map(|_| Keypair::new(SigningKey::generate(&mut csprg)))
            .collect();
        let chain = ChainAddress::new(ChainKind::Service, ChainID::new(3), ChainIndex::new(0));
        let members = keypairs
            .iter()
            .enumerate()
            .map(|(i, keypair)| (IssuerIndex::new(i as u16), keypair.public()))
            .collect();
        (keypairs, VoteMembers::new(chain, members))
    }

    #[test]
    fn quorum_is_strict_majority() {
        let (_, four) = members(4);
        assert!(!four.is_quorum(2));
        assert!(four.is_quorum(3));

        let (_, three) = members(3);
        assert!(!three.is_quorum(1));
        assert!(three.is_quorum(2));

        let empty = VoteMembers::new(ChainAddress::root(), BTreeMap::new());
        assert!(!empty.is_quorum(0));
    }

    #[test]
    fn only_member_signatures_over_the_block_hash_count() {
        let (keypairs, vote_members) = members(4);
        let block = Block::genesis(vote_members.chain());
        let mut signatures = SignatureSet::new();

        signatures.insert(IssuerIndex::new(0), keypairs[0].sign(&block.hash.bytes()));
        signatures.insert(IssuerIndex::new(1), keypairs[1].sign(&block.hash.bytes()));
        // Signed by member 2 but filed under member 3.
        signatures.insert(IssuerIndex::new(3), keypairs[2].sign(&block.hash.bytes()));
        // Not a member.
        signatures.insert(IssuerIndex::new(9), keypairs[2].sign(&block.hash.bytes()));
        assert_eq!(
            vote_members.count_valid_signatures(&block.hash.bytes(), &signatures),
            2
        );
        assert!(!vote_members.is_block_signature_valid(&block, &signatures));

        signatures.insert(IssuerIndex::new(2), keypairs[2].sign(&block.hash.bytes()));
        assert!(vote_members.is_block_signature_valid(&block, &signatures));
        assert!(!vote_members.is_proposal_signature_valid(&block, &signatures));
    }
}
