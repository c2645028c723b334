/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The deterministic state-transition engine that turns pending operations into blocks.
//!
//! Every chain kind is served by the same [`BlockGenerator`](generator::BlockGenerator), parameterized
//! over a [`ChainRules`](generator::ChainRules) implementation:
//!
//! |Chain kind|Rules|Engine alias|
//! |---|---|---|
//! |Root|[`RootRules`](root::RootRules)|[`RootLedger`]|
//! |Service|[`ServiceRules`](service::ServiceRules)|[`ServiceLedger`]|
//! |Data|[`DataRules`](data::DataRules)|[`DataLedger`]|
//! |Maintain|[`MaintainRules`](maintain::MaintainRules)|[`MaintainLedger`]|
//!
//! ## Admission
//!
//! [`consume`](LedgerEngine::consume) admits one operation at a time against staged, in-memory state:
//! 1. Reject if the operation is addressed to another chain, or has expired.
//! 2. Reject if it is already staged, or if chain storage reports it (or an equivalent registration)
//!    as already processed or joined.
//! 3. Resolve the key that must have signed it, loading the acting entity lazily.
//! 4. Verify the signature.
//! 5. Apply the rules of its type. Changes are staged only if every rule passes.
//!
//! ## Building and checking
//!
//! [`build`](LedgerEngine::build) replays every staged operation in unique-identifier order against fresh
//! staged state, drops those that no longer pass, and assembles the survivors plus one bookkeeping
//! item into a new block. [`check_block`](LedgerEngine::check_block) replays a candidate block's
//! operations, builds independently, and blames the operations whose validation hashes diverge.

use std::{collections::BTreeSet, time::Duration};

use crate::types::{
    block::Block,
    data_types::{ChainAddress, IssuerIndex, Revision, UniqueIdentifier},
    operations::Operation,
    update_sets::LedgerUpdates,
};

pub mod cache;

pub mod data;

pub mod entities;

pub mod generator;

pub mod maintain;

pub mod pluggables;

pub mod root;

pub mod rules;

pub mod service;

pub mod staged;

pub mod variables;

/// How long after its timestamp an operation may still be admitted.
pub const OPERATION_TTL: Duration = Duration::from_secs(10 * 60);

/// Allowance added to [`OPERATION_TTL`] while checking or replaying a block proposed by someone else,
/// so that an operation that expires between proposal and verification is not blamed.
pub const VERIFICATION_EXTRA_TIME: Duration = Duration::from_secs(30);

/// Reserved id reported by [`LedgerEngine::check_block`] when a block is invalid but no specific
/// operation in it can be blamed.
pub const INVALID_BLOCK_OPERATION: UniqueIdentifier = UniqueIdentifier::new(u64::MAX);

/// Default maximum age of an entry in the engine's storage cache.
pub const CACHE_MAX_AGE: Duration = Duration::from_secs(60);

/// Default maximum number of entries in the engine's storage cache.
pub const CACHE_MAX_DEPTH: usize = 4096;

/// Ids of the operations that a block check found invalid.
pub type InvalidOperations = BTreeSet<UniqueIdentifier>;

pub type RootLedger<S> = generator::BlockGenerator<S, root::RootRules>;

pub type ServiceLedger<S> = generator::BlockGenerator<S, service::ServiceRules>;

pub type DataLedger<S> = generator::BlockGenerator<S, data::DataRules>;

pub type MaintainLedger<S> = generator::BlockGenerator<S, maintain::MaintainRules>;

/// The outcome of admitting one operation. Returned, never raised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationResult {
    Ok,
    Expired,
    AlreadyProcessed,
    AlreadyJoined,
    WrongChain,
    AccountNotFound,
    InvalidAccount,
    InvalidSignature,
    InsufficientBalance,
    InvalidAmount,
    SelfTransfer,
    ChainNotFound,
    KeyNotFound,
    KeyNotAuthorized,
    InvalidChainName,
    InvalidUrl,
    InvalidChainKey,
    DuplicateKeyIndex,
    InvalidPurchaseCatalog,
    IncompatibleUpdate,
    LimitExceeded,
    NotJoined,
    InvalidKeyIndex,
    PurchaseNotFound,
    PriceMismatch,
    PurchaseRejected,
    ImportOutOfOrder,
    InvalidChainBlock,
    InsufficientSignatures,
    RevenueExceeded,
    /// Rejected by a [`FeatureHook`](service::FeatureHook), with a hook-specific code.
    FeatureRejected(u16),
    /// Admission panicked. The operation is treated as inadmissible.
    InternalFault,
    InvalidOperation,
}

impl OperationResult {
    pub fn is_ok(&self) -> bool {
        *self == OperationResult::Ok
    }

    /// Whether the operation may become admissible later without being resubmitted, e.g., once the
    /// acting account receives funds or a pending registration is finalized.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperationResult::InsufficientBalance
                | OperationResult::AccountNotFound
                | OperationResult::ChainNotFound
                | OperationResult::NotJoined
                | OperationResult::ImportOutOfOrder
        )
    }
}

/// The narrow interface a [council](crate::council) uses to drive the ledger of one chain.
///
/// Implementations are expected to be deterministic: two nodes with the same finalized storage must
/// build byte-identical blocks from the same set of admissible operations.
pub trait LedgerEngine: Send + 'static {
    /// The chain this engine builds blocks for.
    fn chain(&self) -> ChainAddress;

    /// Admit `operation` into the staged state.
    fn consume(&mut self, operation: &Operation) -> OperationResult;

    /// Build the block that follows `previous` out of the staged operations.
    ///
    /// Returns `None` if no staged operation qualifies, or if `previous` is not the chain's last
    /// finalized block.
    fn build(&mut self, previous: &Block, issuer: IssuerIndex, revision: Revision) -> Option<Block>;

    /// Check that `candidate` is the block this engine would build after `previous` from the same
    /// operations. Returns the ids of the operations at fault, or [`INVALID_BLOCK_OPERATION`] if the
    /// block is invalid but no operation can be blamed. An empty set means the block is valid.
    fn check_block(&mut self, previous: &Block, candidate: &Block) -> InvalidOperations;

    /// Compute the entity updates that finalizing `block` writes to storage. The block's operations
    /// are replayed without an expiry check, however long after their timestamps this runs.
    fn ledger_updates(&mut self, block: &Block) -> LedgerUpdates;

    /// Discard all staged operations and state.
    fn reset(&mut self);

    /// Drop every cached storage value. Called after storage changes underneath the engine.
    fn clear_cache(&mut self);
}
