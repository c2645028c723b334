/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Sets of co-signatures collected from the voting members of a chain.

use std::collections::{btree_map, BTreeMap};

use borsh::{BorshDeserialize, BorshSerialize};

use super::data_types::{IssuerIndex, SignatureBytes};

/// Signatures over one message, keyed by the issuer index of the member that made them.
///
/// A `SignatureSet` does not check its own contents. Whether a set forms a quorum is decided by
/// [`VoteMembers`](super::vote_members::VoteMembers).
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureSet(BTreeMap<IssuerIndex, SignatureBytes>);

impl SignatureSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Insert `signature` for `issuer`, replacing any signature previously stored for them.
    pub fn insert(&mut self, issuer: IssuerIndex, signature: SignatureBytes) {
        self.0.insert(issuer, signature);
    }

    pub fn get(&self, issuer: &IssuerIndex) -> Option<&SignatureBytes> {
        self.0.get(issuer)
    }

    pub fn contains(&self, issuer: &IssuerIndex) -> bool {
        self.0.contains_key(issuer)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<IssuerIndex, SignatureBytes> {
        self.0.iter()
    }
}

/// The two signature sets that finalize a block.
///
/// `block` holds signatures over the block hash. `proposal` holds signatures over the block's
/// [attestation bytes](super::block::Block::attestation_bytes), which bind the block to the
/// (height, revision, issuer) round that produced it.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockSignatures {
    pub block: SignatureSet,
    pub proposal: SignatureSet,
}
