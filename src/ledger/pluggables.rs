/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Traits for pluggable chain storage.
//!
//! Durable storage of blocks and entities is provided by the library user. The engine only reads
//! entities through [`LedgerGet`] and only writes them as the [`LedgerUpdates`] handed to
//! [`ChainStorage::store`] when a block is finalized.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::types::{
    block::Block,
    data_types::{
        AccountId, Amount, BlockHeight, ChainAddress, ChainID, KeyIndex, VerifyingKeyBytes,
    },
    operations::Operation,
    signatures::BlockSignatures,
    update_sets::LedgerUpdates,
};

use super::{
    entities::{Account, ChainInfo, RevenueAccount, ServiceAccount},
    variables,
};

/// Read access to the entities stored in chain storage.
///
/// Implementors provide [`get`](Self::get). The typed accessors decode the values stored at the keys
/// defined in [`variables`].
pub trait LedgerGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    fn account(&self, id: AccountId) -> Result<Option<Account>, LedgerGetError> {
        decode(self, &variables::account(id), || LedgerKey::Account { id })
    }

    fn account_by_key(
        &self,
        public_key: &VerifyingKeyBytes,
    ) -> Result<Option<AccountId>, LedgerGetError> {
        decode(self, &variables::account_by_key(public_key), || {
            LedgerKey::AccountByKey
        })
    }

    fn next_account_id(&self) -> Result<AccountId, LedgerGetError> {
        Ok(decode(self, &variables::NEXT_ACCOUNT_ID, || LedgerKey::NextAccountId)?
            .unwrap_or(AccountId::new(1)))
    }

    fn chain_info(&self, chain_id: ChainID) -> Result<Option<ChainInfo>, LedgerGetError> {
        decode(self, &variables::chain(chain_id), || LedgerKey::Chain {
            chain_id,
        })
    }

    fn next_chain_id(&self) -> Result<ChainID, LedgerGetError> {
        Ok(decode(self, &variables::NEXT_CHAIN_ID, || LedgerKey::NextChainId)?
            .unwrap_or(ChainID::new(1)))
    }

    fn service_account(
        &self,
        chain_id: ChainID,
        account: AccountId,
    ) -> Result<Option<ServiceAccount>, LedgerGetError> {
        decode(self, &variables::service_account(chain_id, account), || {
            LedgerKey::ServiceAccount { chain_id, account }
        })
    }

    fn service_key_owner(
        &self,
        chain_id: ChainID,
        public_key: &VerifyingKeyBytes,
    ) -> Result<Option<AccountId>, LedgerGetError> {
        decode(self, &variables::service_key(chain_id, public_key), || {
            LedgerKey::ServiceKey { chain_id }
        })
    }

    fn revenue_account(
        &self,
        chain_id: ChainID,
        account: AccountId,
    ) -> Result<Option<RevenueAccount>, LedgerGetError> {
        decode(self, &variables::revenue_account(chain_id, account), || {
            LedgerKey::RevenueAccount { chain_id, account }
        })
    }

    fn revenue_pool(&self, chain_id: ChainID) -> Result<Amount, LedgerGetError> {
        Ok(decode(self, &variables::revenue_pool(chain_id), || {
            LedgerKey::RevenuePool { chain_id }
        })?
        .unwrap_or(0))
    }

    fn payout_total(&self, chain_id: ChainID) -> Result<Amount, LedgerGetError> {
        Ok(decode(self, &variables::payout_total(chain_id), || {
            LedgerKey::PayoutTotal { chain_id }
        })?
        .unwrap_or(0))
    }

    /// Total price of every purchase `account` made on service chain `chain_id`.
    fn purchase_total(&self, chain_id: ChainID, account: AccountId) -> Result<Amount, LedgerGetError> {
        Ok(decode(self, &variables::purchase_total(chain_id, account), || {
            LedgerKey::PurchaseTotal { chain_id, account }
        })?
        .unwrap_or(0))
    }

    fn imported_height(&self, chain: ChainAddress) -> Result<BlockHeight, LedgerGetError> {
        Ok(decode(self, &variables::imported_height(chain), || {
            LedgerKey::ImportedHeight { chain }
        })?
        .unwrap_or(BlockHeight::new(0)))
    }

    fn imported_service_key(
        &self,
        chain_id: ChainID,
        account: AccountId,
        key_index: KeyIndex,
    ) -> Result<Option<VerifyingKeyBytes>, LedgerGetError> {
        decode(
            self,
            &variables::imported_service_key(chain_id, account, key_index),
            || LedgerKey::ImportedServiceKey {
                chain_id,
                account,
                key_index,
            },
        )
    }

    fn imported_payouts(&self, chain_id: ChainID) -> Result<Amount, LedgerGetError> {
        Ok(decode(self, &variables::imported_payouts(chain_id), || {
            LedgerKey::ImportedPayouts { chain_id }
        })?
        .unwrap_or(0))
    }

    /// Total price of the purchases of `account` on chain `chain_id` that the root ledger imported.
    fn imported_purchases(
        &self,
        chain_id: ChainID,
        account: AccountId,
    ) -> Result<Amount, LedgerGetError> {
        Ok(decode(self, &variables::imported_purchases(chain_id, account), || {
            LedgerKey::ImportedPurchases { chain_id, account }
        })?
        .unwrap_or(0))
    }
}

fn decode<G: LedgerGet + ?Sized, T: BorshDeserialize>(
    getter: &G,
    key: &[u8],
    ledger_key: impl FnOnce() -> LedgerKey,
) -> Result<Option<T>, LedgerGetError> {
    match getter.get(key) {
        Some(bytes) => T::deserialize(&mut bytes.as_slice())
            .map(Some)
            .map_err(|err| LedgerGetError::DeserializeValueError {
                key: ledger_key(),
                source: err,
            }),
        None => Ok(None),
    }
}

/// Durable storage of the blocks and entities of every chain this node follows.
pub trait ChainStorage: LedgerGet + Clone + Send + 'static {
    /// The highest finalized block of `chain`, if the chain is known to this storage.
    fn last_finalized_block(&self, chain: ChainAddress) -> Option<Block>;

    /// Persist a finalized `block` with the signatures that finalized it, and apply `updates`.
    fn store(
        &mut self,
        block: &Block,
        signatures: &BlockSignatures,
        updates: &LedgerUpdates,
    ) -> StoreResult;

    /// Check whether `operation`, or a registration equivalent to it, is already part of finalized
    /// history.
    fn history_contains(&self, operation: &Operation) -> HistoryCheck;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreResult {
    Ok,
    /// The block is ahead of the stored chain. Storage must sync before it can accept it.
    SyncRequired,
    /// The block does not extend the stored chain's last block.
    InvalidHash,
    /// The chain has no stored blocks to extend.
    MissingBlock,
    /// Storage does not accept blocks for this chain.
    NotActive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryCheck {
    Ok,
    AlreadyProcessed,
    AlreadyJoined,
}

#[derive(Debug)]
pub enum LedgerGetError {
    DeserializeValueError {
        key: LedgerKey,
        source: std::io::Error,
    },
}

impl Display for LedgerGetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerGetError::DeserializeValueError { key, source } => {
                write!(f, "failed to deserialize {}: {}", key, source)
            }
        }
    }
}

/// Identifies which entity a [`LedgerGetError`] is about.
#[derive(Debug)]
pub enum LedgerKey {
    Account { id: AccountId },
    AccountByKey,
    NextAccountId,
    Chain { chain_id: ChainID },
    NextChainId,
    ServiceAccount { chain_id: ChainID, account: AccountId },
    ServiceKey { chain_id: ChainID },
    RevenueAccount { chain_id: ChainID, account: AccountId },
    RevenuePool { chain_id: ChainID },
    PayoutTotal { chain_id: ChainID },
    PurchaseTotal { chain_id: ChainID, account: AccountId },
    ImportedHeight { chain: ChainAddress },
    ImportedServiceKey {
        chain_id: ChainID,
        account: AccountId,
        key_index: KeyIndex,
    },
    ImportedPayouts { chain_id: ChainID },
    ImportedPurchases { chain_id: ChainID, account: AccountId },
}

impl Display for LedgerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerKey::Account { id } => write!(f, "Account {}", id),
            LedgerKey::AccountByKey => write!(f, "Account by key"),
            LedgerKey::NextAccountId => write!(f, "Next account id"),
            LedgerKey::Chain { chain_id } => write!(f, "Chain {}", chain_id),
            LedgerKey::NextChainId => write!(f, "Next chain id"),
            LedgerKey::ServiceAccount { chain_id, account } => {
                write!(f, "Service account {} of chain {}", account, chain_id)
            }
            LedgerKey::ServiceKey { chain_id } => write!(f, "Service key of chain {}", chain_id),
            LedgerKey::RevenueAccount { chain_id, account } => {
                write!(f, "Revenue account {} of chain {}", account, chain_id)
            }
            LedgerKey::RevenuePool { chain_id } => write!(f, "Revenue pool of chain {}", chain_id),
            LedgerKey::PayoutTotal { chain_id } => write!(f, "Payout total of chain {}", chain_id),
            LedgerKey::PurchaseTotal { chain_id, account } => {
                write!(f, "Purchase total of account {} on chain {}", account, chain_id)
            }
            LedgerKey::ImportedHeight { chain } => write!(f, "Imported height of chain {}", chain),
            LedgerKey::ImportedServiceKey {
                chain_id,
                account,
                key_index,
            } => write!(
                f,
                "Imported service key {} of account {} on chain {}",
                key_index, account, chain_id
            ),
            LedgerKey::ImportedPayouts { chain_id } => {
                write!(f, "Imported payouts of chain {}", chain_id)
            }
            LedgerKey::ImportedPurchases { chain_id, account } => write!(
                f,
                "Imported purchases of account {} on chain {}",
                account, chain_id
            ),
        }
    }
}
