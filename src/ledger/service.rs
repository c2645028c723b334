/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rules of service ledgers: joining a service, purchases from its catalog, and feature requests.
//!
//! Feature requests carry a payload whose meaning is defined by the service. Their validation is
//! delegated to a [`FeatureHook`] provided by the library user.

use crate::types::{
    block::BlockPayload,
    data_types::{AccountId, ChainAddress, ChainKind, KeyIndex, VerifyingKeyBytes},
    operations::{Operation, OperationBody, PurchaseType},
};

use super::{
    generator::ChainRules,
    pluggables::LedgerGet,
    rules::{self, fault, outcome, Admission},
    staged::StagedLedger,
    OperationResult,
};

/// A feature request being admitted, as seen by a [`FeatureHook`].
pub struct FeatureRequest<'a> {
    pub chain: ChainAddress,
    pub account: AccountId,
    pub feature_id: u32,
    pub payload: &'a [u8],
}

/// Service-defined validation of feature requests.
///
/// Reads go through `state`, which includes everything staged so far in the current block. A hook
/// returns [`OperationResult::Ok`] to admit the request, and typically
/// [`OperationResult::FeatureRejected`] with its own code otherwise.
pub trait FeatureHook: Send + 'static {
    fn validate(&self, request: &FeatureRequest, state: &dyn LedgerGet) -> OperationResult;
}

/// A [`FeatureHook`] that admits every feature request.
#[derive(Clone, Copy, Debug, Default)]
pub struct AcceptFeatures;

impl FeatureHook for AcceptFeatures {
    fn validate(&self, _request: &FeatureRequest, _state: &dyn LedgerGet) -> OperationResult {
        OperationResult::Ok
    }
}

pub struct ServiceRules {
    feature_hook: Box<dyn FeatureHook>,
}

impl ServiceRules {
    pub fn new() -> Self {
        Self::with_feature_hook(AcceptFeatures)
    }

    pub fn with_feature_hook(feature_hook: impl FeatureHook) -> Self {
        Self {
            feature_hook: Box::new(feature_hook),
        }
    }
}

impl Default for ServiceRules {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainRules for ServiceRules {
    fn kind(&self) -> ChainKind {
        ChainKind::Service
    }

    fn signer(
        &self,
        chain: ChainAddress,
        operation: &Operation,
        state: &dyn LedgerGet,
    ) -> Result<VerifyingKeyBytes, OperationResult> {
        let account = operation.header.account;
        match &operation.body {
            OperationBody::Join { .. } => rules::account_key(state, account),
            OperationBody::Purchase { .. } | OperationBody::FeatureRequest { .. } => {
                rules::service_key(state, chain.id, account, operation.header.key_index)
            }
            _ => Err(OperationResult::InvalidOperation),
        }
    }

    fn apply<S: LedgerGet>(
        &self,
        chain: ChainAddress,
        operation: &Operation,
        state: &mut StagedLedger<S>,
    ) -> OperationResult {
        let account = operation.header.account;
        outcome(match &operation.body {
            OperationBody::Join {
                key_index,
                public_key,
            } => join(chain, account, *key_index, public_key, state),
            OperationBody::Purchase {
                item_id,
                group_id,
                price,
            } => purchase(chain, account, *item_id, *group_id, *price, state),
            OperationBody::FeatureRequest {
                feature_id,
                payload,
            } => {
                if payload.len() > rules::MAX_FEATURE_PAYLOAD {
                    Err(OperationResult::LimitExceeded)
                } else {
                    let request = FeatureRequest {
                        chain,
                        account,
                        feature_id: *feature_id,
                        payload: payload.as_slice(),
                    };
                    rules::admission(self.feature_hook.validate(&request, &*state))
                }
            }
            _ => Err(OperationResult::InvalidOperation),
        })
    }

    fn bookkeeping<S: LedgerGet>(
        &self,
        _chain: ChainAddress,
        operations: &[Operation],
        state: &StagedLedger<S>,
    ) -> Option<BlockPayload> {
        Some(rules::block_state(operations, state))
    }
}

fn join<S: LedgerGet>(
    chain: ChainAddress,
    account: AccountId,
    key_index: KeyIndex,
    public_key: &VerifyingKeyBytes,
    state: &mut StagedLedger<S>,
) -> Admission {
    if !rules::is_valid_point(public_key) {
        return Err(OperationResult::InvalidAccount);
    }

    let mut service_account = state
        .service_account(chain.id, account)
        .map_err(fault)?
        .unwrap_or_default();
    let key_taken = service_account.keys.contains_key(&key_index)
        || service_account.keys.values().any(|key| key == public_key)
        || state
            .service_key_owner(chain.id, public_key)
            .map_err(fault)?
            .is_some();
    if key_taken {
        return Err(OperationResult::AlreadyJoined);
    }
    if key_index != service_account.next_key_index() {
        return Err(OperationResult::InvalidKeyIndex);
    }

    service_account.keys.insert(key_index, *public_key);
    state.set_service_account(chain.id, account, &service_account);
    state.set_service_key_owner(chain.id, public_key, account);
    Ok(())
}

fn purchase<S: LedgerGet>(
    chain: ChainAddress,
    account: AccountId,
    item_id: u32,
    group_id: u32,
    price: u64,
    state: &mut StagedLedger<S>,
) -> Admission {
    let mut service_account = state
        .service_account(chain.id, account)
        .map_err(fault)?
        .ok_or(OperationResult::NotJoined)?;
    let chain_info = state
        .chain_info(chain.id)
        .map_err(fault)?
        .ok_or(OperationResult::ChainNotFound)?;
    let info = chain_info
        .purchase(item_id, group_id)
        .ok_or(OperationResult::PurchaseNotFound)?;
    if info.price != price {
        return Err(OperationResult::PriceMismatch);
    }

    let rejected = match info.purchase_type {
        PurchaseType::Repeatable => false,
        PurchaseType::OncePerItem => service_account
            .purchases
            .get(&(item_id, group_id))
            .map(|count| *count > 0)
            .unwrap_or(false),
        PurchaseType::OncePerGroup => service_account
            .purchases
            .iter()
            .any(|((_, group), count)| *group == group_id && *count > 0),
    };
    if rejected {
        return Err(OperationResult::PurchaseRejected);
    }

    // The root ledger debits the payer only when a service block is imported, so every purchase it has
    // not imported yet, including those staged in this block, is counted against the balance.
    let payer = state
        .account(account)
        .map_err(fault)?
        .ok_or(OperationResult::AccountNotFound)?;
    let purchased = state.purchase_total(chain.id, account).map_err(fault)?;
    let imported = state
        .committed()
        .imported_purchases(chain.id, account)
        .map_err(fault)?;
    let outstanding = purchased.saturating_sub(imported);
    if payer.balance < outstanding.saturating_add(price) {
        return Err(OperationResult::InsufficientBalance);
    }
    state.set_purchase_total(chain.id, account, purchased.saturating_add(price));

    *service_account
        .purchases
        .entry((item_id, group_id))
        .or_insert(0) += 1;
    state.set_service_account(chain.id, account, &service_account);
    Ok(())
}
