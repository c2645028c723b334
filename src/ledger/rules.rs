/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Validation rules and key lookups shared by more than one chain kind.

use std::collections::{BTreeMap, BTreeSet};

use borsh::BorshSerialize;

use crate::types::{
    block::{BlockPayload, BlockState},
    crypto_primitives::{hash_parts, VerifyingKey},
    data_types::{AccountId, Amount, ChainID, KeyIndex, VerifyingKeyBytes},
    operations::{ChainKeyFlags, ChainRegistration, Operation, PurchaseType},
};

use super::{
    entities::ChainInfo,
    pluggables::{LedgerGet, LedgerGetError},
    staged::StagedLedger,
    OperationResult,
};

pub const MIN_CHAIN_NAME_LENGTH: usize = 2;
pub const MAX_CHAIN_NAME_LENGTH: usize = 64;
pub const MAX_URL_LENGTH: usize = 256;
pub const MAX_ENDPOINTS: usize = 8;
pub const MAX_CHAIN_KEYS: usize = 32;
pub const MAX_PURCHASES: usize = 64;
pub const MAX_DESCRIPTION_LENGTH: usize = 256;
pub const MAX_DATA_PAYLOAD: usize = 64 * 1024;
pub const MAX_FEATURE_PAYLOAD: usize = 16 * 1024;
pub const MAX_TRANSFER_REASON_LENGTH: usize = 256;

/// Outcome of a rule that either passes or rejects with a specific code.
pub(crate) type Admission = Result<(), OperationResult>;

pub(crate) fn outcome(admission: Admission) -> OperationResult {
    match admission {
        Ok(()) => OperationResult::Ok,
        Err(rejection) => rejection,
    }
}

pub(crate) fn admission(result: OperationResult) -> Admission {
    if result.is_ok() {
        Ok(())
    } else {
        Err(result)
    }
}

/// Storage that cannot be decoded is an internal fault, not a property of the operation.
pub(crate) fn fault(err: LedgerGetError) -> OperationResult {
    log::warn!("{}", err);
    OperationResult::InternalFault
}

pub(crate) fn is_valid_point(public_key: &VerifyingKeyBytes) -> bool {
    VerifyingKey::from_bytes(public_key).is_ok()
}

/// The public key of root account `account`.
pub(crate) fn account_key(
    state: &dyn LedgerGet,
    account: AccountId,
) -> Result<VerifyingKeyBytes, OperationResult> {
    match state.account(account).map_err(fault)? {
        Some(account) => Ok(account.public_key),
        None => Err(OperationResult::AccountNotFound),
    }
}

/// The public key of the chain key at `key_index` of chain `chain_id`, provided it is not revoked and
/// carries `flag`.
pub(crate) fn chain_key(
    state: &dyn LedgerGet,
    chain_id: ChainID,
    key_index: Option<KeyIndex>,
    flag: ChainKeyFlags,
) -> Result<VerifyingKeyBytes, OperationResult> {
    let chain_info = state
        .chain_info(chain_id)
        .map_err(fault)?
        .ok_or(OperationResult::ChainNotFound)?;
    let key = key_index
        .and_then(|index| chain_info.chain_key(index))
        .ok_or(OperationResult::KeyNotFound)?;
    if key.revoked || !key.flags.contains(flag) {
        return Err(OperationResult::KeyNotAuthorized);
    }
    Ok(key.public_key)
}

/// The public key that `account` joined service `chain_id` with at `key_index`.
pub(crate) fn service_key(
    state: &dyn LedgerGet,
    chain_id: ChainID,
    account: AccountId,
    key_index: Option<KeyIndex>,
) -> Result<VerifyingKeyBytes, OperationResult> {
    let service_account = state
        .service_account(chain_id, account)
        .map_err(fault)?
        .ok_or(OperationResult::NotJoined)?;
    key_index
        .and_then(|index| service_account.keys.get(&index).copied())
        .ok_or(OperationResult::KeyNotFound)
}

/// Whether `url` is an absolute http(s) URL with a plausible host.
pub fn is_valid_url(url: &str) -> bool {
    if url.len() > MAX_URL_LENGTH || url.chars().any(char::is_whitespace) {
        return false;
    }
    let rest = match url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };
    let host = rest
        .split(|c: char| c == '/' || c == ':' || c == '?' || c == '#')
        .next()
        .unwrap_or("");
    !host.is_empty()
        && !host.starts_with('.')
        && !host.ends_with('.')
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

pub fn is_valid_chain_name(name: &str) -> bool {
    let len = name.chars().count();
    (MIN_CHAIN_NAME_LENGTH..=MAX_CHAIN_NAME_LENGTH).contains(&len)
        && !name.chars().any(char::is_control)
        && name.trim() == name
}

/// Check the metadata a chain is registered or updated with.
pub fn validate_registration(registration: &ChainRegistration) -> OperationResult {
    outcome(check_registration(registration))
}

fn check_registration(registration: &ChainRegistration) -> Admission {
    if !is_valid_chain_name(&registration.name) {
        return Err(OperationResult::InvalidChainName);
    }
    if !registration.website.is_empty() && !is_valid_url(&registration.website) {
        return Err(OperationResult::InvalidUrl);
    }

    if registration.endpoints.len() > MAX_ENDPOINTS {
        return Err(OperationResult::LimitExceeded);
    }
    if !registration.endpoints.iter().all(|url| is_valid_url(url)) {
        return Err(OperationResult::InvalidUrl);
    }

    if registration.chain_keys.len() > MAX_CHAIN_KEYS {
        return Err(OperationResult::LimitExceeded);
    }
    let mut indices = BTreeSet::new();
    for key in &registration.chain_keys {
        if !indices.insert(key.index) {
            return Err(OperationResult::DuplicateKeyIndex);
        }
        if !is_valid_point(&key.public_key) {
            return Err(OperationResult::InvalidChainKey);
        }
    }

    if registration.purchases.len() > MAX_PURCHASES {
        return Err(OperationResult::LimitExceeded);
    }
    let mut entries = BTreeSet::new();
    let mut group_types: BTreeMap<u32, PurchaseType> = BTreeMap::new();
    for purchase in &registration.purchases {
        if purchase.description.len() > MAX_DESCRIPTION_LENGTH {
            return Err(OperationResult::LimitExceeded);
        }
        if !entries.insert((purchase.item_id, purchase.group_id)) {
            return Err(OperationResult::InvalidPurchaseCatalog);
        }
        let group_type = group_types
            .entry(purchase.group_id)
            .or_insert(purchase.purchase_type);
        if *group_type != purchase.purchase_type {
            return Err(OperationResult::InvalidPurchaseCatalog);
        }
    }

    Ok(())
}

/// Check that `update` can replace the registration of `existing`:
/// - every existing chain key is kept, with the same public key,
/// - a revoked key stays revoked,
/// - a purchase that is kept keeps its purchase type.
pub fn check_update_compatible(existing: &ChainInfo, update: &ChainRegistration) -> OperationResult {
    for key in &existing.chain_keys {
        let updated = match update.chain_keys.iter().find(|other| other.index == key.index) {
            Some(updated) => updated,
            None => return OperationResult::IncompatibleUpdate,
        };
        if updated.public_key != key.public_key || (key.revoked && !updated.revoked) {
            return OperationResult::IncompatibleUpdate;
        }
    }

    for purchase in &existing.purchases {
        let changed_type = update
            .purchases
            .iter()
            .find(|other| other.item_id == purchase.item_id && other.group_id == purchase.group_id)
            .map(|other| other.purchase_type != purchase.purchase_type)
            .unwrap_or(false);
        if changed_type {
            return OperationResult::IncompatibleUpdate;
        }
    }

    OperationResult::Ok
}

/// The bookkeeping item of the non-root chain kinds: the number of operations in the block and a digest
/// of the entity updates they stage.
pub(crate) fn block_state<S: LedgerGet>(
    operations: &[Operation],
    state: &StagedLedger<S>,
) -> BlockPayload {
    let updates = state.updates().try_to_vec().unwrap();
    BlockPayload::BlockState(BlockState {
        operation_count: operations.len() as u32,
        updates_hash: hash_parts(&[&updates[..]]),
    })
}

pub(crate) fn checked_credit(balance: Amount, amount: Amount) -> Result<Amount, OperationResult> {
    balance
        .checked_add(amount)
        .ok_or(OperationResult::InvalidAmount)
}
