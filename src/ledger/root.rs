/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rules of the root ledger: accounts, chain registrations, transfers, and the import of finalized
//! service and maintenance blocks.
//!
//! Importing a block re-applies the parts of its operations that touch root state:
//! - `Join` records the joined service key, so later purchases can be verified here. Keys are numbered
//!   from 0 without gaps, as on the service chain.
//! - `Purchase` debits the payer, credits the revenue pool of the chain, and adds the price to the
//!   payer's imported purchases, which the service chain subtracts from its own purchase total.
//! - `RevenueRequest` debits the revenue pool and credits the requester.
//! - `FeatureRequest` and `AssignRevenue` are only verified.

use borsh::BorshDeserialize;

use crate::types::{
    block::{AccountBalance, BlockPayload},
    crypto_primitives::verify_with_bytes,
    data_types::{AccountId, ChainAddress, ChainID, ChainKind, KeyIndex, VerifyingKeyBytes},
    operations::{ChainBlockImport, ChainKeyFlags, ChainRegistration, Operation, OperationBody},
    signed_messages::SignedMessage,
    vote_members::VoteMembers,
};

use super::{
    entities::{Account, ChainInfo},
    generator::ChainRules,
    pluggables::LedgerGet,
    rules::{self, fault, outcome, Admission},
    staged::StagedLedger,
    variables, OperationResult,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct RootRules;

impl ChainRules for RootRules {
    fn kind(&self) -> ChainKind {
        ChainKind::Root
    }

    fn signer(
        &self,
        _chain: ChainAddress,
        operation: &Operation,
        state: &dyn LedgerGet,
    ) -> Result<VerifyingKeyBytes, OperationResult> {
        match &operation.body {
            OperationBody::RegisterAccount { public_key } => {
                if rules::is_valid_point(public_key) {
                    Ok(*public_key)
                } else {
                    Err(OperationResult::InvalidAccount)
                }
            }
            OperationBody::RegisterChain(_)
            | OperationBody::UpdateChain { .. }
            | OperationBody::Transfer { .. } => rules::account_key(state, operation.header.account),
            OperationBody::ImportChainBlock(import) => rules::chain_key(
                state,
                import.block.chain.id,
                operation.header.key_index,
                ChainKeyFlags::CHAIN_BLOCK,
            ),
            _ => Err(OperationResult::InvalidOperation),
        }
    }

    fn apply<S: LedgerGet>(
        &self,
        _chain: ChainAddress,
        operation: &Operation,
        state: &mut StagedLedger<S>,
    ) -> OperationResult {
        let account = operation.header.account;
        outcome(match &operation.body {
            OperationBody::RegisterAccount { public_key } => register_account(public_key, state),
            OperationBody::RegisterChain(registration) => {
                register_chain(account, registration, state)
            }
            OperationBody::UpdateChain {
                chain_id,
                registration,
            } => update_chain(account, *chain_id, registration, state),
            OperationBody::Transfer {
                receiver,
                amount,
                reason,
            } => transfer(account, *receiver, *amount, reason, state),
            OperationBody::ImportChainBlock(import) => import_chain_block(import, state),
            _ => Err(OperationResult::InvalidOperation),
        })
    }

    /// Closes a block with the new balances of every account whose balance it changed.
    fn bookkeeping<S: LedgerGet>(
        &self,
        _chain: ChainAddress,
        _operations: &[Operation],
        state: &StagedLedger<S>,
    ) -> Option<BlockPayload> {
        let committed = state.committed();
        let deltas: Vec<AccountBalance> = state
            .staged_with_prefix(&variables::ACCOUNTS)
            .filter_map(|(_, value)| Account::try_from_slice(value).ok())
            .filter(|account| match committed.account(account.id) {
                Ok(Some(previous)) => previous.balance != account.balance,
                Ok(None) => account.balance != 0,
                Err(_) => true,
            })
            .map(|account| AccountBalance {
                account: account.id,
                balance: account.balance,
            })
            .collect();

        if deltas.is_empty() {
            None
        } else {
            Some(BlockPayload::AccountDeltas(deltas))
        }
    }
}

fn register_account<S: LedgerGet>(
    public_key: &VerifyingKeyBytes,
    state: &mut StagedLedger<S>,
) -> Admission {
    if state.account_by_key(public_key).map_err(fault)?.is_some() {
        return Err(OperationResult::AlreadyProcessed);
    }
    let id = state.next_account_id().map_err(fault)?;
    state.set_account(&Account {
        id,
        public_key: *public_key,
        balance: 0,
    });
    state.set_next_account_id(id.next());
    Ok(())
}

fn register_chain<S: LedgerGet>(
    owner: AccountId,
    registration: &ChainRegistration,
    state: &mut StagedLedger<S>,
) -> Admission {
    rules::admission(rules::validate_registration(registration))?;
    let chain_id = state.next_chain_id().map_err(fault)?;
    state.set_chain_info(&ChainInfo::new(chain_id, owner, registration.clone()));
    state.set_next_chain_id(ChainID::new(chain_id.int() + 1));
    Ok(())
}

fn update_chain<S: LedgerGet>(
    owner: AccountId,
    chain_id: ChainID,
    registration: &ChainRegistration,
    state: &mut StagedLedger<S>,
) -> Admission {
    let existing = state
        .chain_info(chain_id)
        .map_err(fault)?
        .ok_or(OperationResult::ChainNotFound)?;
    if existing.owner != owner {
        return Err(OperationResult::InvalidAccount);
    }
    rules::admission(rules::validate_registration(registration))?;
    rules::admission(rules::check_update_compatible(&existing, registration))?;
    state.set_chain_info(&ChainInfo::new(chain_id, owner, registration.clone()));
    Ok(())
}

fn transfer<S: LedgerGet>(
    sender: AccountId,
    receiver: AccountId,
    amount: u64,
    reason: &str,
    state: &mut StagedLedger<S>,
) -> Admission {
    if sender == receiver {
        return Err(OperationResult::SelfTransfer);
    }
    if amount == 0 {
        return Err(OperationResult::InvalidAmount);
    }
    if reason.len() > rules::MAX_TRANSFER_REASON_LENGTH {
        return Err(OperationResult::LimitExceeded);
    }

    let mut from = state
        .account(sender)
        .map_err(fault)?
        .ok_or(OperationResult::AccountNotFound)?;
    let mut to = state
        .account(receiver)
        .map_err(fault)?
        .ok_or(OperationResult::AccountNotFound)?;
    if from.balance < amount {
        return Err(OperationResult::InsufficientBalance);
    }
    from.balance -= amount;
    to.balance = rules::checked_credit(to.balance, amount)?;

    state.set_account(&from);
    state.set_account(&to);
    Ok(())
}

fn import_chain_block<S: LedgerGet>(
    import: &ChainBlockImport,
    state: &mut StagedLedger<S>,
) -> Admission {
    let block = &import.block;
    if !matches!(block.chain.kind, ChainKind::Service | ChainKind::Maintain)
        || !block.is_well_formed()
    {
        return Err(OperationResult::InvalidChainBlock);
    }

    let chain_info = state
        .chain_info(block.chain.id)
        .map_err(fault)?
        .ok_or(OperationResult::ChainNotFound)?;
    let imported = state.imported_height(block.chain).map_err(fault)?;
    if block.height <= imported {
        return Err(OperationResult::AlreadyProcessed);
    }
    if block.height > imported + 1 {
        return Err(OperationResult::ImportOutOfOrder);
    }

    let members = VoteMembers::from_chain_info(block.chain, &chain_info);
    if !members.is_proposal_signature_valid(block, &import.proposal_signatures) {
        return Err(OperationResult::InsufficientSignatures);
    }

    for operation in block.operations() {
        if operation.chain() != block.chain {
            return Err(OperationResult::InvalidChainBlock);
        }
        import_operation(&chain_info, operation, state)?;
    }

    state.set_imported_height(block.chain, block.height);
    Ok(())
}

fn import_operation<S: LedgerGet>(
    chain_info: &ChainInfo,
    operation: &Operation,
    state: &mut StagedLedger<S>,
) -> Admission {
    let chain_id = chain_info.chain_id;
    let account = operation.header.account;
    let verify = |key: VerifyingKeyBytes| {
        if verify_with_bytes(&key, &operation.message_bytes(), &operation.signature) {
            Ok(())
        } else {
            Err(OperationResult::InvalidSignature)
        }
    };

    match &operation.body {
        OperationBody::Join {
            key_index,
            public_key,
        } => {
            verify(rules::account_key(&*state, account)?)?;
            import_join(chain_id, account, *key_index, public_key, state)?;
        }
        OperationBody::Purchase {
            item_id,
            group_id,
            price,
        } => {
            verify(imported_service_key(state, chain_id, operation)?)?;
            let info = chain_info
                .purchase(*item_id, *group_id)
                .ok_or(OperationResult::PurchaseNotFound)?;
            if info.price != *price {
                return Err(OperationResult::PriceMismatch);
            }

            let mut payer = state
                .account(account)
                .map_err(fault)?
                .ok_or(OperationResult::AccountNotFound)?;
            if payer.balance < *price {
                return Err(OperationResult::InsufficientBalance);
            }
            payer.balance -= *price;
            let pool = state.revenue_pool(chain_id).map_err(fault)?;
            let pool = rules::checked_credit(pool, *price)?;
            let imported = state.imported_purchases(chain_id, account).map_err(fault)?;
            state.set_account(&payer);
            state.set_revenue_pool(chain_id, pool);
            state.set_imported_purchases(chain_id, account, imported.saturating_add(*price));
        }
        OperationBody::FeatureRequest { .. } => {
            verify(imported_service_key(state, chain_id, operation)?)?;
        }
        OperationBody::AssignRevenue { .. } => {
            verify(rules::chain_key(
                &*state,
                chain_id,
                operation.header.key_index,
                ChainKeyFlags::REVENUE,
            )?)?;
        }
        OperationBody::RevenueRequest { amount } => {
            verify(rules::account_key(&*state, account)?)?;
            let pool = state.revenue_pool(chain_id).map_err(fault)?;
            if pool < *amount {
                return Err(OperationResult::InsufficientBalance);
            }
            let mut requester = state
                .account(account)
                .map_err(fault)?
                .ok_or(OperationResult::AccountNotFound)?;
            requester.balance = rules::checked_credit(requester.balance, *amount)?;
            let payouts = state.imported_payouts(chain_id).map_err(fault)?;
            state.set_revenue_pool(chain_id, pool - *amount);
            state.set_account(&requester);
            state.set_imported_payouts(chain_id, payouts.saturating_add(*amount));
        }
        _ => return Err(OperationResult::InvalidChainBlock),
    }
    Ok(())
}

/// Record a joined service key, under the same rules the service chain applied when admitting it.
fn import_join<S: LedgerGet>(
    chain_id: ChainID,
    account: AccountId,
    key_index: KeyIndex,
    public_key: &VerifyingKeyBytes,
    state: &mut StagedLedger<S>,
) -> Admission {
    if !rules::is_valid_point(public_key) {
        return Err(OperationResult::InvalidAccount);
    }

    let mut next_key_index = KeyIndex::new(0);
    while let Some(key) = state
        .imported_service_key(chain_id, account, next_key_index)
        .map_err(fault)?
    {
        if key == *public_key {
            return Err(OperationResult::AlreadyJoined);
        }
        next_key_index = match next_key_index.int().checked_add(1) {
            Some(index) => KeyIndex::new(index),
            None => return Err(OperationResult::InvalidKeyIndex),
        };
    }
    if key_index < next_key_index {
        return Err(OperationResult::AlreadyJoined);
    }
    if key_index != next_key_index {
        return Err(OperationResult::InvalidKeyIndex);
    }

    state.set_imported_service_key(chain_id, account, key_index, public_key);
    Ok(())
}

fn imported_service_key<S: LedgerGet>(
    state: &StagedLedger<S>,
    chain_id: ChainID,
    operation: &Operation,
) -> Result<VerifyingKeyBytes, OperationResult> {
    let key_index = operation.header.key_index.ok_or(OperationResult::KeyNotFound)?;
    state
        .imported_service_key(chain_id, operation.header.account, key_index)
        .map_err(fault)?
        .ok_or(OperationResult::NotJoined)
}
