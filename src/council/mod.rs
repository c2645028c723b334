/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The agreement protocol through which the members of a chain finalize its blocks one height at a
//! time.
//!
//! ## Overview
//!
//! Every chain is run by a council: the holders of the chain keys that carry the chain kind's vote
//! flag. Members are known to each other by [issuer index](crate::types::data_types::IssuerIndex).
//! For each height, the members run a [vote process](process):
//! 1. Members propose candidate blocks built by their [engine](crate::ledger::LedgerEngine) out of
//!    the operations in their [pool](pool).
//! 2. Members check each other's proposals by rebuilding them, and [vote](messages::Vote) on them.
//! 3. Members sign the best proposal that a majority voted for, twice: once over the block hash, and
//!    once over the block's attestation bytes.
//! 4. A proposal signed twice by a majority is final. The [council thread](protocol) stores it and
//!    starts on the next height.
//!
//! If a revision ends without a final block, members move to a later revision and try again.
//!
//! ## Modules
//!
//! - [`messages`]: the messages members exchange.
//! - [`proposal`]: per-proposal tallies of votes and signatures.
//! - [`process`]: the per-height state machine.
//! - [`protocol`]: the council thread that drives processes and stores finalized blocks.
//! - [`pool`]: pending operations.
//! - [`persistence`]: the local cache of in-flight proposals.
//! - [`finalization`]: side effects of finalization.

pub mod finalization;

pub mod messages;

pub mod persistence;

pub mod pool;

pub mod process;

pub mod proposal;

pub mod protocol;
