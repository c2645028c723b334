/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that store the entity updates a block makes.

use std::collections::{btree_map, BTreeMap};

use borsh::{BorshDeserialize, BorshSerialize};

/// Generic set of key-value insertions that are written to storage when a particular block is
/// finalized.
///
/// Backed by a `BTreeMap` so that iterating over, serializing, or hashing an `UpdateSet` gives the
/// same result on every node.
#[derive(Clone, Debug, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct UpdateSet<K: Ord, V> {
    inserts: BTreeMap<K, V>,
}

impl<K: Ord, V> UpdateSet<K, V> {
    /// Create a new, empty `UpdateSet`.
    pub fn new() -> Self {
        Self {
            inserts: BTreeMap::new(),
        }
    }

    /// Schedule the insertion of a `key`-`value` pair when the block that corresponds to this
    /// `UpdateSet` gets finalized.
    pub fn insert(&mut self, key: K, value: V) {
        self.inserts.insert(key, value);
    }

    /// Get the value this `UpdateSet` is scheduled to insert at `key`, if any.
    pub fn get_insert(&self, key: &K) -> Option<&V> {
        self.inserts.get(key)
    }

    /// Get an iterator over all of the key-value pairs that this `UpdateSet` will insert, in key order.
    pub fn inserts(&self) -> btree_map::Iter<K, V> {
        self.inserts.iter()
    }

    pub fn len(&self) -> usize {
        self.inserts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty()
    }
}

/// Set of raw key-value updates written to chain storage when a block is finalized.
pub type LedgerUpdates = UpdateSet<Vec<u8>, Vec<u8>>;
