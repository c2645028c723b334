//! A simple, volatile, in-memory implementation of [`ChainStorage`].

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use borsh::BorshSerialize;
use ledger_council::{
    ledger::{
        pluggables::{ChainStorage, HistoryCheck, LedgerGet, StoreResult},
        variables,
    },
    types::{
        block::Block,
        data_types::{BlockHeight, ChainAddress, UniqueIdentifier},
        operations::{Operation, OperationBody},
        signatures::BlockSignatures,
        update_sets::LedgerUpdates,
    },
};

/// An in-memory implementation of [`ChainStorage`]. Clones share the same state.
#[derive(Clone)]
pub(crate) struct MemDB(Arc<Mutex<MemDBInner>>);

struct MemDBInner {
    values: HashMap<Vec<u8>, Vec<u8>>,
    blocks: HashMap<ChainAddress, Vec<(Block, BlockSignatures)>>,
    history: HashSet<(ChainAddress, UniqueIdentifier)>,
}

impl MemDB {
    /// Create a new, empty `MemDB`.
    pub(crate) fn new() -> MemDB {
        MemDB(Arc::new(Mutex::new(MemDBInner {
            values: HashMap::new(),
            blocks: HashMap::new(),
            history: HashSet::new(),
        })))
    }

    /// Write `value` at `key` directly, bypassing block storage.
    pub(crate) fn put<T: BorshSerialize>(&self, key: Vec<u8>, value: &T) {
        self.0
            .lock()
            .unwrap()
            .values
            .insert(key, value.try_to_vec().unwrap());
    }

    /// Start following `chain` from its genesis block.
    pub(crate) fn add_genesis(&self, chain: ChainAddress) {
        self.0
            .lock()
            .unwrap()
            .blocks
            .insert(chain, vec![(Block::genesis(chain), BlockSignatures::default())]);
    }

    /// Height of the last stored block of `chain`.
    pub(crate) fn height(&self, chain: ChainAddress) -> Option<BlockHeight> {
        self.last_finalized_block(chain).map(|block| block.height)
    }

    /// Every stored block of `chain`, genesis included.
    pub(crate) fn blocks(&self, chain: ChainAddress) -> Vec<(Block, BlockSignatures)> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(&chain)
            .cloned()
            .unwrap_or_default()
    }
}

impl LedgerGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().values.get(key).cloned()
    }
}

impl ChainStorage for MemDB {
    fn last_finalized_block(&self, chain: ChainAddress) -> Option<Block> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(&chain)
            .and_then(|blocks| blocks.last())
            .map(|(block, _)| block.clone())
    }

    fn store(
        &mut self,
        block: &Block,
        signatures: &BlockSignatures,
        updates: &LedgerUpdates,
    ) -> StoreResult {
        let mut inner = self.0.lock().unwrap();
        let last = match inner.blocks.get(&block.chain).and_then(|blocks| blocks.last()) {
            Some((last, _)) => last.clone(),
            None => return StoreResult::MissingBlock,
        };
        if block.height > last.height + 1 {
            return StoreResult::SyncRequired;
        }
        if !block.extends(&last) {
            return StoreResult::InvalidHash;
        }

        for (key, value) in updates.inserts() {
            inner.values.insert(key.clone(), value.clone());
        }
        for operation in block.operations() {
            inner.history.insert((block.chain, operation.unique_id()));
        }
        if let Some(blocks) = inner.blocks.get_mut(&block.chain) {
            blocks.push((block.clone(), signatures.clone()));
        }
        StoreResult::Ok
    }

    fn history_contains(&self, operation: &Operation) -> HistoryCheck {
        if self
            .0
            .lock()
            .unwrap()
            .history
            .contains(&(operation.chain(), operation.unique_id()))
        {
            return HistoryCheck::AlreadyProcessed;
        }
        match &operation.body {
            OperationBody::RegisterAccount { public_key }
                if self.get(&variables::account_by_key(public_key)).is_some() =>
            {
                HistoryCheck::AlreadyProcessed
            }
            OperationBody::Join { public_key, .. }
                if self
                    .get(&variables::service_key(operation.chain().id, public_key))
                    .is_some() =>
            {
                HistoryCheck::AlreadyJoined
            }
            _ => HistoryCheck::Ok,
        }
    }
}
