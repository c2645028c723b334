/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each ledger entity is stored in chain storage.
//!
//! # List of entities
//!
//! |Entity|Key|Value|Written by|
//! |---|---|---|---|
//! |Accounts|`ACCOUNTS ++ account id`|[`Account`](super::entities::Account)|Root|
//! |Account by key|`ACCOUNT_BY_KEY ++ public key`|[`AccountId`]|Root|
//! |Next account id|`NEXT_ACCOUNT_ID`|[`AccountId`]|Root|
//! |Chains|`CHAINS ++ chain id`|[`ChainInfo`](super::entities::ChainInfo)|Root|
//! |Next chain id|`NEXT_CHAIN_ID`|[`ChainID`]|Root|
//! |Revenue pools|`REVENUE_POOLS ++ chain id`|[`Amount`](crate::types::data_types::Amount)|Root|
//! |Imported heights|`IMPORTED_HEIGHTS ++ chain address`|[`BlockHeight`](crate::types::data_types::BlockHeight)|Root|
//! |Imported service keys|`IMPORTED_SERVICE_KEYS ++ chain id ++ account id ++ key index`|public key|Root|
//! |Imported payouts|`IMPORTED_PAYOUTS ++ chain id`|[`Amount`](crate::types::data_types::Amount)|Root|
//! |Service accounts|`SERVICE_ACCOUNTS ++ chain id ++ account id`|[`ServiceAccount`](super::entities::ServiceAccount)|Service|
//! |Service key owners|`SERVICE_KEYS ++ chain id ++ public key`|[`AccountId`]|Service|
//! |Revenue accounts|`REVENUE_ACCOUNTS ++ chain id ++ account id`|[`RevenueAccount`](super::entities::RevenueAccount)|Maintain|
//! |Payout totals|`PAYOUT_TOTALS ++ chain id`|[`Amount`](crate::types::data_types::Amount)|Maintain|
//! |Purchase totals|`PURCHASE_TOTALS ++ chain id ++ account id`|[`Amount`](crate::types::data_types::Amount)|Service|
//! |Imported purchases|`IMPORTED_PURCHASES ++ chain id ++ account id`|[`Amount`](crate::types::data_types::Amount)|Root|
//!
//! Ids are encoded big-endian so that keys sort in id order. All values are Borsh-serialized.

use borsh::BorshSerialize;

use crate::types::data_types::{AccountId, ChainAddress, ChainID, KeyIndex, VerifyingKeyBytes};

pub const ACCOUNTS: [u8; 1] = [0];
pub const ACCOUNT_BY_KEY: [u8; 1] = [1];
pub const NEXT_ACCOUNT_ID: [u8; 1] = [2];
pub const CHAINS: [u8; 1] = [3];
pub const NEXT_CHAIN_ID: [u8; 1] = [4];
pub const REVENUE_POOLS: [u8; 1] = [5];
pub const IMPORTED_HEIGHTS: [u8; 1] = [6];
pub const IMPORTED_SERVICE_KEYS: [u8; 1] = [7];
pub const IMPORTED_PAYOUTS: [u8; 1] = [8];
pub const SERVICE_ACCOUNTS: [u8; 1] = [9];
pub const SERVICE_KEYS: [u8; 1] = [10];
pub const REVENUE_ACCOUNTS: [u8; 1] = [11];
pub const PAYOUT_TOTALS: [u8; 1] = [12];
pub const PURCHASE_TOTALS: [u8; 1] = [13];
pub const IMPORTED_PURCHASES: [u8; 1] = [14];

/// Takes references to two byteslices and returns a vector containing the bytes of the first one, and
/// then the bytes of the second one.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}

pub fn account(id: AccountId) -> Vec<u8> {
    concat(&ACCOUNTS, &id.int().to_be_bytes())
}

pub fn account_by_key(public_key: &VerifyingKeyBytes) -> Vec<u8> {
    concat(&ACCOUNT_BY_KEY, public_key)
}

pub fn chain(chain_id: ChainID) -> Vec<u8> {
    concat(&CHAINS, &chain_id.int().to_be_bytes())
}

pub fn revenue_pool(chain_id: ChainID) -> Vec<u8> {
    concat(&REVENUE_POOLS, &chain_id.int().to_be_bytes())
}

pub fn imported_height(chain: ChainAddress) -> Vec<u8> {
    concat(&IMPORTED_HEIGHTS, &chain.try_to_vec().unwrap())
}

pub fn imported_service_key(chain_id: ChainID, account: AccountId, key_index: KeyIndex) -> Vec<u8> {
    let key = concat(&IMPORTED_SERVICE_KEYS, &chain_id.int().to_be_bytes());
    let key = concat(&key, &account.int().to_be_bytes());
    concat(&key, &key_index.int().to_be_bytes())
}

pub fn imported_payouts(chain_id: ChainID) -> Vec<u8> {
    concat(&IMPORTED_PAYOUTS, &chain_id.int().to_be_bytes())
}

pub fn service_account(chain_id: ChainID, account: AccountId) -> Vec<u8> {
    let key = concat(&SERVICE_ACCOUNTS, &chain_id.int().to_be_bytes());
    concat(&key, &account.int().to_be_bytes())
}

pub fn service_key(chain_id: ChainID, public_key: &VerifyingKeyBytes) -> Vec<u8> {
    let key = concat(&SERVICE_KEYS, &chain_id.int().to_be_bytes());
    concat(&key, public_key)
}

pub fn revenue_account(chain_id: ChainID, account: AccountId) -> Vec<u8> {
    let key = concat(&REVENUE_ACCOUNTS, &chain_id.int().to_be_bytes());
    concat(&key, &account.int().to_be_bytes())
}

pub fn payout_total(chain_id: ChainID) -> Vec<u8> {
    concat(&PAYOUT_TOTALS, &chain_id.int().to_be_bytes())
}

pub fn purchase_total(chain_id: ChainID, account: AccountId) -> Vec<u8> {
    let key = concat(&PURCHASE_TOTALS, &chain_id.int().to_be_bytes());
    concat(&key, &account.int().to_be_bytes())
}

pub fn imported_purchases(chain_id: ChainID, account: AccountId) -> Vec<u8> {
    let key = concat(&IMPORTED_PURCHASES, &chain_id.int().to_be_bytes());
    concat(&key, &account.int().to_be_bytes())
}
