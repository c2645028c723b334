/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! In-memory staged state that operations are admitted against.
//!
//! A [`StagedLedger`] layers three tiers over chain storage, read top to bottom:
//! 1. **Pending** writes of the operation currently being admitted.
//! 2. **Staged** writes of every operation admitted so far.
//! 3. **Committed** values, read lazily from storage through a [`BoundedCache`].
//!
//! Rules write only into the pending tier. The [generator](super::generator) commits the pending tier
//! into the staged tier if the operation is admitted, and rolls it back otherwise. Nothing reaches
//! storage until the block is finalized and the staged tier is handed over as [`LedgerUpdates`].

use std::{cell::RefCell, collections::BTreeMap, time::Duration};

use borsh::BorshSerialize;

use crate::types::{
    data_types::{
        AccountId, Amount, BlockHeight, ChainAddress, ChainID, KeyIndex, VerifyingKeyBytes,
    },
    update_sets::LedgerUpdates,
};

use super::{
    cache::BoundedCache,
    entities::{Account, ChainInfo, RevenueAccount, ServiceAccount},
    pluggables::LedgerGet,
    variables,
};

pub struct StagedLedger<S: LedgerGet> {
    storage: S,
    cache: RefCell<BoundedCache<Vec<u8>, Option<Vec<u8>>>>,
    staged: BTreeMap<Vec<u8>, Vec<u8>>,
    pending: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl<S: LedgerGet> StagedLedger<S> {
    pub fn new(storage: S, cache_max_age: Duration, cache_max_depth: usize) -> Self {
        Self {
            storage,
            cache: RefCell::new(BoundedCache::new(cache_max_age, cache_max_depth)),
            staged: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// A read-only view of committed storage that ignores everything staged.
    pub fn committed(&self) -> Committed<'_, S> {
        Committed(self)
    }

    fn committed_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        let key = key.to_vec();
        if let Some(value) = self.cache.borrow_mut().get(&key) {
            return value;
        }
        let value = self.storage.get(&key);
        self.cache.borrow_mut().insert(key, value.clone());
        value
    }

    /// Stage `value` at `key`, as part of the operation currently being admitted.
    pub fn put<T: BorshSerialize>(&mut self, key: Vec<u8>, value: &T) {
        self.pending.insert(key, value.try_to_vec().unwrap());
    }

    pub fn set_account(&mut self, account: &Account) {
        self.put(variables::account(account.id), account);
        self.put(variables::account_by_key(&account.public_key), &account.id);
    }

    pub fn set_next_account_id(&mut self, id: AccountId) {
        self.put(variables::NEXT_ACCOUNT_ID.to_vec(), &id);
    }

    pub fn set_chain_info(&mut self, chain_info: &ChainInfo) {
        self.put(variables::chain(chain_info.chain_id), chain_info);
    }

    pub fn set_next_chain_id(&mut self, chain_id: ChainID) {
        self.put(variables::NEXT_CHAIN_ID.to_vec(), &chain_id);
    }

    pub fn set_service_account(
        &mut self,
        chain_id: ChainID,
        account: AccountId,
        service_account: &ServiceAccount,
    ) {
        self.put(variables::service_account(chain_id, account), service_account);
    }

    pub fn set_service_key_owner(
        &mut self,
        chain_id: ChainID,
        public_key: &VerifyingKeyBytes,
        account: AccountId,
    ) {
        self.put(variables::service_key(chain_id, public_key), &account);
    }

    pub fn set_revenue_account(
        &mut self,
        chain_id: ChainID,
        account: AccountId,
        revenue_account: &RevenueAccount,
    ) {
        self.put(variables::revenue_account(chain_id, account), revenue_account);
    }

    pub fn set_revenue_pool(&mut self, chain_id: ChainID, amount: Amount) {
        self.put(variables::revenue_pool(chain_id), &amount);
    }

    pub fn set_payout_total(&mut self, chain_id: ChainID, amount: Amount) {
        self.put(variables::payout_total(chain_id), &amount);
    }

    pub fn set_purchase_total(&mut self, chain_id: ChainID, account: AccountId, amount: Amount) {
        self.put(variables::purchase_total(chain_id, account), &amount);
    }

    pub fn set_imported_height(&mut self, chain: ChainAddress, height: BlockHeight) {
        self.put(variables::imported_height(chain), &height);
    }

    pub fn set_imported_service_key(
        &mut self,
        chain_id: ChainID,
        account: AccountId,
        key_index: KeyIndex,
        public_key: &VerifyingKeyBytes,
    ) {
        self.put(
            variables::imported_service_key(chain_id, account, key_index),
            public_key,
        );
    }

    pub fn set_imported_payouts(&mut self, chain_id: ChainID, amount: Amount) {
        self.put(variables::imported_payouts(chain_id), &amount);
    }

    pub fn set_imported_purchases(&mut self, chain_id: ChainID, account: AccountId, amount: Amount) {
        self.put(variables::imported_purchases(chain_id, account), &amount);
    }

    /// Staged (not pending) values whose key starts with `prefix`, in key order.
    pub fn staged_with_prefix<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
        self.staged
            .range(prefix.to_vec()..)
            .take_while(move |(key, _)| key.starts_with(prefix))
    }

    /// Move the pending writes into the staged tier.
    pub(crate) fn commit(&mut self) {
        self.staged.append(&mut self.pending);
    }

    /// Discard the pending writes.
    pub(crate) fn rollback(&mut self) {
        self.pending.clear();
    }

    /// Discard everything pending and staged. The cache is kept.
    pub(crate) fn reset(&mut self) {
        self.rollback();
        self.staged.clear();
    }

    pub(crate) fn clear_cache(&mut self) {
        self.cache.borrow_mut().clear();
    }

    /// The staged writes, as the update set to apply on finalization.
    pub fn updates(&self) -> LedgerUpdates {
        let mut updates = LedgerUpdates::new();
        for (key, value) in &self.staged {
            updates.insert(key.clone(), value.clone());
        }
        updates
    }
}

impl<S: LedgerGet> LedgerGet for StagedLedger<S> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(value) = self.pending.get(key) {
            return Some(value.clone());
        }
        if let Some(value) = self.staged.get(key) {
            return Some(value.clone());
        }
        self.committed_get(key)
    }
}

/// See [`StagedLedger::committed`].
pub struct Committed<'a, S: LedgerGet>(&'a StagedLedger<S>);

impl<S: LedgerGet> LedgerGet for Committed<'_, S> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.committed_get(key)
    }
}
