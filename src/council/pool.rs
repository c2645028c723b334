/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Operations received by a council that have not been finalized yet.
//!
//! The pool is keyed by unique identifier, so a retransmitted operation replaces nothing and is
//! counted once. When the pool is full, new operations are refused until finalized or rejected
//! operations make room.

use std::collections::BTreeMap;

use crate::types::{data_types::UniqueIdentifier, operations::Operation};

/// Default maximum number of operations a council keeps pending.
pub const DEFAULT_POOL_CAPACITY: usize = 65_536;

pub struct OperationPool {
    operations: BTreeMap<UniqueIdentifier, Operation>,
    capacity: usize,
}

impl OperationPool {
    pub fn new(capacity: usize) -> OperationPool {
        OperationPool {
            operations: BTreeMap::new(),
            capacity,
        }
    }

    /// Add `operation` to the pool. Returns false if an operation with the same unique identifier is
    /// already pending, or if the pool is full.
    pub fn insert(&mut self, operation: Operation) -> bool {
        if self.operations.contains_key(&operation.unique_id()) {
            return false;
        }
        if self.operations.len() >= self.capacity {
            log::warn!(
                "operation pool is full, dropping operation {}",
                operation.unique_id()
            );
            return false;
        }
        self.operations.insert(operation.unique_id(), operation);
        true
    }

    pub fn remove(&mut self, unique_id: &UniqueIdentifier) -> Option<Operation> {
        self.operations.remove(unique_id)
    }

    pub fn remove_all<'a>(&mut self, unique_ids: impl IntoIterator<Item = &'a UniqueIdentifier>) {
        for unique_id in unique_ids {
            self.operations.remove(unique_id);
        }
    }

    pub fn contains(&self, unique_id: &UniqueIdentifier) -> bool {
        self.operations.contains_key(unique_id)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// A copy of every pending operation, in unique-identifier order.
    pub fn snapshot(&self) -> Vec<Operation> {
        self.operations.values().cloned().collect()
    }
}

impl Default for OperationPool {
    fn default() -> Self {
        OperationPool::new(DEFAULT_POOL_CAPACITY)
    }
}
