/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The generic block generator and the per-chain-kind rules it is parameterized over.

use std::{
    collections::{BTreeMap, BTreeSet},
    panic::{catch_unwind, AssertUnwindSafe},
};

use crate::types::{
    block::{Block, BlockPayload},
    crypto_primitives::verify_with_bytes,
    data_types::{
        ChainAddress, ChainKind, IssuerIndex, Revision, Timestamp, UniqueIdentifier,
        VerifyingKeyBytes,
    },
    operations::Operation,
    signed_messages::SignedMessage,
    update_sets::LedgerUpdates,
};

use super::{
    pluggables::{ChainStorage, HistoryCheck, LedgerGet},
    staged::StagedLedger,
    InvalidOperations, LedgerEngine, OperationResult, CACHE_MAX_AGE, CACHE_MAX_DEPTH,
    INVALID_BLOCK_OPERATION, OPERATION_TTL, VERIFICATION_EXTRA_TIME,
};

/// The rules that make one chain kind different from the others.
///
/// The [`BlockGenerator`] handles expiry, dedup, signature verification, staging, ordering and block
/// assembly. A `ChainRules` implementation only says who must sign an operation, what the operation
/// does to staged state, and what bookkeeping item closes a block.
pub trait ChainRules: Send + 'static {
    fn kind(&self) -> ChainKind;

    /// Resolve the key that must have signed `operation`, or the reason the acting entity cannot be
    /// resolved.
    fn signer(
        &self,
        chain: ChainAddress,
        operation: &Operation,
        state: &dyn LedgerGet,
    ) -> Result<VerifyingKeyBytes, OperationResult>;

    /// Apply the type-specific rules of `operation`, writing its effects into `state`.
    ///
    /// Writes made before returning a rejection are discarded by the caller.
    fn apply<S: LedgerGet>(
        &self,
        chain: ChainAddress,
        operation: &Operation,
        state: &mut StagedLedger<S>,
    ) -> OperationResult;

    /// Filter the staged operations, given in unique-identifier order, before they are replayed into a
    /// block. Chain kinds that pay out of a bounded pool drop the operations that would overdraw it.
    fn settle<S: LedgerGet>(
        &self,
        _chain: ChainAddress,
        candidates: Vec<Operation>,
        _state: &StagedLedger<S>,
    ) -> Vec<Operation> {
        candidates
    }

    /// The synthetic item appended after the operations of a block, if any.
    fn bookkeeping<S: LedgerGet>(
        &self,
        chain: ChainAddress,
        operations: &[Operation],
        state: &StagedLedger<S>,
    ) -> Option<BlockPayload>;
}

/// What an operation is being admitted for. Decides how old it may be.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AdmissionMode {
    /// Into the pool, or into a block this member builds. Expires after [`OPERATION_TTL`].
    Building,
    /// Into a block proposed by another member. Expires after [`OPERATION_TTL`] plus
    /// [`VERIFICATION_EXTRA_TIME`].
    Verifying,
    /// Out of a finalized block. Never expires.
    Replaying,
}

/// A [`LedgerEngine`] for one chain, parameterized over the [`ChainRules`] of its kind.
pub struct BlockGenerator<S: ChainStorage, R: ChainRules> {
    chain: ChainAddress,
    storage: S,
    rules: R,
    state: StagedLedger<S>,
    // Admitted operations, ordered by unique identifier.
    accumulator: BTreeMap<UniqueIdentifier, Operation>,
    mode: AdmissionMode,
}

impl<S: ChainStorage, R: ChainRules> BlockGenerator<S, R> {
    pub fn new(chain: ChainAddress, storage: S, rules: R) -> Self {
        let state = StagedLedger::new(storage.clone(), CACHE_MAX_AGE, CACHE_MAX_DEPTH);
        Self {
            chain,
            storage,
            rules,
            state,
            accumulator: BTreeMap::new(),
            mode: AdmissionMode::Building,
        }
    }

    /// Read access to the staged state, for inspection.
    pub fn state(&self) -> &StagedLedger<S> {
        &self.state
    }

    fn admit(&mut self, operation: &Operation, now: Timestamp) -> OperationResult {
        if operation.chain() != self.chain {
            return OperationResult::WrongChain;
        }

        let ttl = match self.mode {
            AdmissionMode::Building => Some(OPERATION_TTL),
            AdmissionMode::Verifying => Some(OPERATION_TTL + VERIFICATION_EXTRA_TIME),
            AdmissionMode::Replaying => None,
        };
        if let Some(ttl) = ttl {
            if now > operation.header.timestamp.saturating_add(ttl) {
                return OperationResult::Expired;
            }
        }

        if self.accumulator.contains_key(&operation.unique_id()) {
            return OperationResult::AlreadyProcessed;
        }
        match self.storage.history_contains(operation) {
            HistoryCheck::Ok => (),
            HistoryCheck::AlreadyProcessed => return OperationResult::AlreadyProcessed,
            HistoryCheck::AlreadyJoined => return OperationResult::AlreadyJoined,
        }

        let chain = self.chain;
        let rules = &self.rules;
        let state = &mut self.state;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let signer = match rules.signer(chain, operation, &*state) {
                Ok(signer) => signer,
                Err(rejection) => return rejection,
            };
            if !verify_with_bytes(&signer, &operation.message_bytes(), &operation.signature) {
                return OperationResult::InvalidSignature;
            }
            rules.apply(chain, operation, state)
        }))
        .unwrap_or_else(|_| {
            log::warn!(
                "{} operation {} on chain {} panicked during admission",
                operation.body.name(),
                operation.unique_id(),
                chain
            );
            OperationResult::InternalFault
        });

        if result.is_ok() {
            self.state.commit();
            self.accumulator
                .insert(operation.unique_id(), operation.clone());
        } else {
            self.state.rollback();
        }
        result
    }

    fn is_anchored(&self, previous: &Block) -> bool {
        match self.storage.last_finalized_block(self.chain) {
            Some(last) => last.height == previous.height && last.hash == previous.hash,
            None => false,
        }
    }

    fn assemble(
        &mut self,
        previous: &Block,
        issuer: IssuerIndex,
        revision: Revision,
    ) -> Option<Block> {
        if !self.is_anchored(previous) {
            return None;
        }

        let candidates: Vec<Operation> = std::mem::take(&mut self.accumulator)
            .into_values()
            .collect();
        self.state.reset();
        let candidates = self.rules.settle(self.chain, candidates, &self.state);

        let now = Timestamp::now();
        let admitted: Vec<Operation> = candidates
            .into_iter()
            .filter(|operation| self.admit(operation, now).is_ok())
            .collect();
        if admitted.is_empty() {
            return None;
        }

        let timestamp = admitted
            .iter()
            .map(|operation| operation.header.timestamp)
            .chain(std::iter::once(previous.timestamp))
            .max()
            .unwrap_or(previous.timestamp);
        let bookkeeping = self.rules.bookkeeping(self.chain, &admitted, &self.state);

        let payloads: Vec<BlockPayload> = admitted
            .into_iter()
            .map(BlockPayload::Operation)
            .chain(bookkeeping)
            .collect();
        Some(Block::new(previous, issuer, revision, timestamp, payloads))
    }
}

impl<S: ChainStorage, R: ChainRules> LedgerEngine for BlockGenerator<S, R> {
    fn chain(&self) -> ChainAddress {
        self.chain
    }

    fn consume(&mut self, operation: &Operation) -> OperationResult {
        self.admit(operation, Timestamp::now())
    }

    fn build(&mut self, previous: &Block, issuer: IssuerIndex, revision: Revision) -> Option<Block> {
        self.assemble(previous, issuer, revision)
    }

    fn check_block(&mut self, previous: &Block, candidate: &Block) -> InvalidOperations {
        let mut invalid = BTreeSet::new();
        self.reset();

        if candidate.chain != self.chain || !candidate.extends(previous) || !candidate.is_well_formed()
        {
            invalid.insert(INVALID_BLOCK_OPERATION);
            return invalid;
        }

        self.mode = AdmissionMode::Verifying;
        let now = Timestamp::now();
        for operation in candidate.operations() {
            if !self.admit(operation, now).is_ok() {
                invalid.insert(operation.unique_id());
            }
        }
        let rebuilt = self.assemble(previous, candidate.issuer, candidate.revision);
        self.mode = AdmissionMode::Building;
        self.reset();

        let rebuilt = match rebuilt {
            Some(rebuilt) => rebuilt,
            None => {
                if invalid.is_empty() {
                    invalid.insert(INVALID_BLOCK_OPERATION);
                }
                return invalid;
            }
        };

        let len = candidate.items.len().max(rebuilt.items.len());
        for i in 0..len {
            match (candidate.items.get(i), rebuilt.items.get(i)) {
                (Some(proposed), Some(expected))
                    if proposed.validation_hash == expected.validation_hash =>
                {
                    continue
                }
                (Some(item), _) => {
                    match &item.payload {
                        BlockPayload::Operation(operation) => {
                            invalid.insert(operation.unique_id());
                        }
                        _ if invalid.is_empty() => {
                            invalid.insert(INVALID_BLOCK_OPERATION);
                        }
                        _ => (),
                    }
                    break;
                }
                _ => {
                    if invalid.is_empty() {
                        invalid.insert(INVALID_BLOCK_OPERATION);
                    }
                    break;
                }
            }
        }

        if invalid.is_empty() && rebuilt.hash != candidate.hash {
            invalid.insert(INVALID_BLOCK_OPERATION);
        }
        invalid
    }

    fn ledger_updates(&mut self, block: &Block) -> LedgerUpdates {
        self.reset();
        self.mode = AdmissionMode::Replaying;
        let now = Timestamp::now();
        for operation in block.operations() {
            let result = self.admit(operation, now);
            if !result.is_ok() {
                log::warn!(
                    "operation {} of finalized block {} on chain {} no longer applies: {:?}",
                    operation.unique_id(),
                    block.height,
                    self.chain,
                    result
                );
            }
        }
        self.mode = AdmissionMode::Building;
        let updates = self.state.updates();
        self.reset();
        updates
    }

    fn reset(&mut self) {
        self.accumulator.clear();
        self.state.reset();
    }

    fn clear_cache(&mut self) {
        self.state.clear_cache();
    }
}
