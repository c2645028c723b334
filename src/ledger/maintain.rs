/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rules of maintenance ledgers, which assign a service's revenue to accounts and pay it out.
//!
//! Payouts are drawn from the revenue pool that the root ledger accumulates from the service's
//! purchases. A payout leaves the pool only once the block containing it is imported into the root
//! ledger, so the amount still available to this chain is
//!
//! ```text
//! available = revenue pool - (payouts finalized here - payouts imported into root)
//! ```

use crate::types::{
    block::BlockPayload,
    data_types::{AccountId, Amount, ChainAddress, ChainKind, VerifyingKeyBytes},
    operations::{ChainKeyFlags, Operation, OperationBody},
};

use super::{
    generator::ChainRules,
    pluggables::LedgerGet,
    rules::{self, fault, outcome, Admission},
    staged::StagedLedger,
    OperationResult,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct MaintainRules;

impl MaintainRules {
    fn available<S: LedgerGet>(
        chain: ChainAddress,
        state: &StagedLedger<S>,
    ) -> Result<Amount, OperationResult> {
        let committed = state.committed();
        let pool = committed.revenue_pool(chain.id).map_err(fault)?;
        let paid = committed.payout_total(chain.id).map_err(fault)?;
        let imported = committed.imported_payouts(chain.id).map_err(fault)?;
        Ok(pool.saturating_sub(paid.saturating_sub(imported)))
    }
}

impl ChainRules for MaintainRules {
    fn kind(&self) -> ChainKind {
        ChainKind::Maintain
    }

    fn signer(
        &self,
        chain: ChainAddress,
        operation: &Operation,
        state: &dyn LedgerGet,
    ) -> Result<VerifyingKeyBytes, OperationResult> {
        match &operation.body {
            OperationBody::AssignRevenue { .. } => rules::chain_key(
                state,
                chain.id,
                operation.header.key_index,
                ChainKeyFlags::REVENUE,
            ),
            OperationBody::RevenueRequest { .. } => {
                rules::account_key(state, operation.header.account)
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
        outcome(match &operation.body {
            OperationBody::AssignRevenue { receiver, amount } => {
                assign_revenue(chain, *receiver, *amount, state)
            }
            OperationBody::RevenueRequest { amount } => {
                request_revenue(chain, operation.header.account, *amount, state)
            }
            _ => Err(OperationResult::InvalidOperation),
        })
    }

    /// Drop the revenue requests that would overdraw the pool, walking them in unique-identifier
    /// order.
    fn settle<S: LedgerGet>(
        &self,
        chain: ChainAddress,
        candidates: Vec<Operation>,
        state: &StagedLedger<S>,
    ) -> Vec<Operation> {
        let mut available = Self::available(chain, state).unwrap_or(0);
        candidates
            .into_iter()
            .filter(|operation| match &operation.body {
                OperationBody::RevenueRequest { amount } => {
                    if *amount > available {
                        log::debug!(
                            "revenue request {} on chain {} would overdraw the pool",
                            operation.unique_id(),
                            chain
                        );
                        false
                    } else {
                        available -= *amount;
                        true
                    }
                }
                _ => true,
            })
            .collect()
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

fn assign_revenue<S: LedgerGet>(
    chain: ChainAddress,
    receiver: AccountId,
    amount: Amount,
    state: &mut StagedLedger<S>,
) -> Admission {
    if amount == 0 {
        return Err(OperationResult::InvalidAmount);
    }
    if state.account(receiver).map_err(fault)?.is_none() {
        return Err(OperationResult::AccountNotFound);
    }
    let mut revenue_account = state
        .revenue_account(chain.id, receiver)
        .map_err(fault)?
        .unwrap_or_default();
    revenue_account.entitlement = rules::checked_credit(revenue_account.entitlement, amount)?;
    state.set_revenue_account(chain.id, receiver, &revenue_account);
    Ok(())
}

fn request_revenue<S: LedgerGet>(
    chain: ChainAddress,
    requester: AccountId,
    amount: Amount,
    state: &mut StagedLedger<S>,
) -> Admission {
    if amount == 0 {
        return Err(OperationResult::InvalidAmount);
    }
    let mut revenue_account = state
        .revenue_account(chain.id, requester)
        .map_err(fault)?
        .unwrap_or_default();
    let requested = rules::checked_credit(revenue_account.paid, amount)?;
    if requested > revenue_account.entitlement {
        return Err(OperationResult::RevenueExceeded);
    }
    revenue_account.paid = requested;
    let payout_total = state.payout_total(chain.id).map_err(fault)?;
    state.set_revenue_account(chain.id, requester, &revenue_account);
    state.set_payout_total(chain.id, payout_total.saturating_add(amount));
    Ok(())
}
