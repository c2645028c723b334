/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A node library for a family of ledgers: one root ledger, plus service, data and maintenance
//! ledgers for every registered service.
//!
//! The library has two halves:
//! 1. [`ledger`]: a deterministic engine that admits signed operations and builds them into blocks,
//!    with one set of rules per chain kind.
//! 2. [`council`]: the protocol through which the members of a chain agree on, sign, and store each
//!    block the engine builds.
//!
//! Storage and networking are provided by the library user through the
//! [`ChainStorage`](ledger::pluggables::ChainStorage) and [`Network`](networking::Network) traits. A
//! council member is started with a [`CouncilSpec`](replica::CouncilSpec).

pub mod types;

pub mod ledger;

pub mod council;

pub mod networking;

pub mod events;

pub mod logging;

pub(crate) mod event_bus;

pub mod replica;
