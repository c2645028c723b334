/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type and its associated methods.
//!
//! A block is an ordered, immutable sequence of items for one chain at one height. Every item carries
//! a sequence id and a running validation hash:
//!
//! ```text
//! item[i].validation_hash = SHA256(item[i-1].validation_hash || item[i].sequence_id || item[i].payload)
//! ```
//!
//! where `item[-1].validation_hash` is the last validation hash of the previous block. Blocks are
//! only ever created through [`Block::new`] or [`Block::genesis`], which compute every derived field
//! once.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{crypto_primitives::hash_parts, data_types::*, operations::Operation};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub chain: ChainAddress,
    pub height: BlockHeight,
    pub issuer: IssuerIndex,
    pub revision: Revision,
    pub timestamp: Timestamp,
    pub previous_hash: CryptoHash,
    pub previous_validation_hash: CryptoHash,
    pub last_sequence_id: SequenceId,
    pub items: Vec<BlockItem>,
    pub hash: CryptoHash,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockItem {
    pub sequence_id: SequenceId,
    pub validation_hash: CryptoHash,
    pub payload: BlockPayload,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BlockPayload {
    Operation(Operation),

    /// Root-ledger bookkeeping: the balances of every account whose balance the block changed,
    /// ordered by account id.
    AccountDeltas(Vec<AccountBalance>),

    /// Bookkeeping of the other chain kinds: a digest of the entity updates the block makes.
    BlockState(BlockState),
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct AccountBalance {
    pub account: AccountId,
    pub balance: Amount,
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockState {
    pub operation_count: u32,
    pub updates_hash: CryptoHash,
}

impl Block {
    /// The block at height 0 of `chain`. Every node derives the same genesis block.
    pub fn genesis(chain: ChainAddress) -> Block {
        let mut block = Block {
            chain,
            height: BlockHeight::new(0),
            issuer: IssuerIndex::new(0),
            revision: Revision::init(),
            timestamp: Timestamp::new(0),
            previous_hash: CryptoHash::zero(),
            previous_validation_hash: CryptoHash::zero(),
            last_sequence_id: SequenceId::new(0),
            items: Vec::new(),
            hash: CryptoHash::zero(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Create the block that follows `previous`, assigning sequence ids from
    /// `previous.last_sequence_id + 1` and chaining validation hashes from `previous`.
    pub fn new(
        previous: &Block,
        issuer: IssuerIndex,
        revision: Revision,
        timestamp: Timestamp,
        payloads: Vec<BlockPayload>,
    ) -> Block {
        let previous_validation_hash = previous.last_validation_hash();
        let mut validation_hash = previous_validation_hash;
        let mut sequence_id = previous.last_sequence_id;
        let items: Vec<BlockItem> = payloads
            .into_iter()
            .map(|payload| {
                sequence_id = sequence_id + 1;
                validation_hash = Block::validation_hash(&validation_hash, sequence_id, &payload);
                BlockItem {
                    sequence_id,
                    validation_hash,
                    payload,
                }
            })
            .collect();

        let mut block = Block {
            chain: previous.chain,
            height: previous.height + 1,
            issuer,
            revision,
            timestamp,
            previous_hash: previous.hash,
            previous_validation_hash,
            last_sequence_id: sequence_id,
            items,
            hash: CryptoHash::zero(),
        };
        block.hash = block.compute_hash();
        block
    }

    pub fn validation_hash(
        previous: &CryptoHash,
        sequence_id: SequenceId,
        payload: &BlockPayload,
    ) -> CryptoHash {
        hash_parts(&[
            &previous.bytes()[..],
            &sequence_id.int().to_le_bytes()[..],
            &payload.try_to_vec().unwrap()[..],
        ])
    }

    pub fn last_validation_hash(&self) -> CryptoHash {
        self.items
            .last()
            .map(|item| item.validation_hash)
            .unwrap_or(self.previous_validation_hash)
    }

    fn compute_hash(&self) -> CryptoHash {
        hash_parts(&[
            &self.chain.try_to_vec().unwrap()[..],
            &self.height.int().to_le_bytes()[..],
            &self.issuer.int().to_le_bytes()[..],
            &self.revision.int().to_le_bytes()[..],
            &self.timestamp.millis().to_le_bytes()[..],
            &self.previous_hash.bytes()[..],
            &self.previous_validation_hash.bytes()[..],
            &self.last_sequence_id.int().to_le_bytes()[..],
            &self.last_validation_hash().bytes()[..],
            &(self.items.len() as u32).to_le_bytes()[..],
        ])
    }

    /// Check that the sequence ids, validation hashes and block hash are the ones [`Block::new`] would
    /// have derived. Says nothing about whether the contained operations are valid.
    pub fn is_well_formed(&self) -> bool {
        let mut validation_hash = self.previous_validation_hash;
        let mut expected_sequence_id = None;
        for item in &self.items {
            if let Some(expected) = expected_sequence_id {
                if item.sequence_id != expected {
                    return false;
                }
            }
            validation_hash = Block::validation_hash(&validation_hash, item.sequence_id, &item.payload);
            if validation_hash != item.validation_hash {
                return false;
            }
            expected_sequence_id = Some(item.sequence_id + 1);
        }

        let last_matches = match self.items.last() {
            Some(item) => item.sequence_id == self.last_sequence_id,
            None => true,
        };

        last_matches && self.hash == self.compute_hash()
    }

    /// Whether this block directly extends `previous`.
    pub fn extends(&self, previous: &Block) -> bool {
        self.chain == previous.chain
            && self.height == previous.height + 1
            && self.previous_hash == previous.hash
            && self.previous_validation_hash == previous.last_validation_hash()
            && self
                .items
                .first()
                .map(|item| item.sequence_id == previous.last_sequence_id + 1)
                .unwrap_or(true)
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.items.iter().filter_map(|item| match &item.payload {
            BlockPayload::Operation(operation) => Some(operation),
            _ => None,
        })
    }

    pub fn operation_count(&self) -> usize {
        self.operations().count()
    }

    /// The bytes that members sign to attest that this block was proposed by `issuer` at
    /// (`height`, `revision`) of `chain`.
    pub fn attestation_bytes(&self) -> Vec<u8> {
        let mut bytes = self.chain.try_to_vec().unwrap();
        bytes.extend(self.height.int().to_le_bytes());
        bytes.extend(self.revision.int().to_le_bytes());
        bytes.extend(self.issuer.int().to_le_bytes());
        bytes.extend(self.hash.bytes());
        bytes.extend((self.operation_count() as u32).to_le_bytes());
        bytes
    }
}
