/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rules of data ledgers, which record opaque data items signed by accounts that joined the service.

use crate::types::{
    block::BlockPayload,
    data_types::{ChainAddress, ChainKind, VerifyingKeyBytes},
    operations::{Operation, OperationBody},
};

use super::{
    generator::ChainRules, pluggables::LedgerGet, rules, staged::StagedLedger, OperationResult,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct DataRules;

impl ChainRules for DataRules {
    fn kind(&self) -> ChainKind {
        ChainKind::Data
    }

    fn signer(
        &self,
        chain: ChainAddress,
        operation: &Operation,
        state: &dyn LedgerGet,
    ) -> Result<VerifyingKeyBytes, OperationResult> {
        match &operation.body {
            OperationBody::Data { .. } => rules::service_key(
                state,
                chain.id,
                operation.header.account,
                operation.header.key_index,
            ),
            _ => Err(OperationResult::InvalidOperation),
        }
    }

    fn apply<S: LedgerGet>(
        &self,
        _chain: ChainAddress,
        operation: &Operation,
        _state: &mut StagedLedger<S>,
    ) -> OperationResult {
        match &operation.body {
            OperationBody::Data { payload } if payload.len() > rules::MAX_DATA_PAYLOAD => {
                OperationResult::LimitExceeded
            }
            OperationBody::Data { .. } => OperationResult::Ok,
            _ => OperationResult::InvalidOperation,
        }
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
