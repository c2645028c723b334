/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Ledger entities, as stored in chain storage.

use std::collections::BTreeMap;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    data_types::{AccountId, Amount, ChainID, KeyIndex, VerifyingKeyBytes},
    operations::{ChainKey, ChainRegistration, PurchaseInfo},
};

/// An account on the root ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Account {
    pub id: AccountId,
    pub public_key: VerifyingKeyBytes,
    pub balance: Amount,
}

/// A chain registration on the root ledger.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ChainInfo {
    pub chain_id: ChainID,
    pub owner: AccountId,
    pub name: String,
    pub website: String,
    pub endpoints: Vec<String>,
    pub chain_keys: Vec<ChainKey>,
    pub purchases: Vec<PurchaseInfo>,
}

impl ChainInfo {
    pub fn new(chain_id: ChainID, owner: AccountId, registration: ChainRegistration) -> Self {
        Self {
            chain_id,
            owner,
            name: registration.name,
            website: registration.website,
            endpoints: registration.endpoints,
            chain_keys: registration.chain_keys,
            purchases: registration.purchases,
        }
    }

    pub fn chain_key(&self, index: KeyIndex) -> Option<&ChainKey> {
        self.chain_keys.iter().find(|key| key.index == index)
    }

    pub fn purchase(&self, item_id: u32, group_id: u32) -> Option<&PurchaseInfo> {
        self.purchases
            .iter()
            .find(|purchase| purchase.item_id == item_id && purchase.group_id == group_id)
    }
}

/// An account's membership of one service: the keys it joined with, and what it bought.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ServiceAccount {
    pub keys: BTreeMap<KeyIndex, VerifyingKeyBytes>,
    /// Number of times each (item id, group id) was bought.
    pub purchases: BTreeMap<(u32, u32), u32>,
}

impl ServiceAccount {
    /// The index the next joined key must use. Keys are numbered from 0 without gaps.
    pub fn next_key_index(&self) -> KeyIndex {
        KeyIndex::new(self.keys.len() as u16)
    }
}

/// An account's revenue on one maintenance chain.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RevenueAccount {
    pub entitlement: Amount,
    pub paid: Amount,
}
