/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the council's
//! [configuration](crate::replica::CouncilConfiguration).
//!
//! Ledger council logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [ReceiveProposal](crate::events::ReceiveProposalEvent) is printed:
//!
//! ```text
//! ReceiveProposal, 1701329264, 2, 17, 0, fNGCJyk
//! ```
//!
//! In the snippet:
//! - The third value is the issuer index of the member that proposed.
//! - The fourth and fifth values are the height and revision of the proposal.
//! - The sixth value is the first seven characters of the Base64 encoding of the hash of the proposed
//!   block, or `-` for an empty proposal.

use crate::events::*;
use crate::types::data_types::CryptoHash;
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

// Names of each event in PascalCase for printing:
pub const START_PROCESS: &str = "StartProcess";
pub const CANCEL_PROCESS: &str = "CancelProcess";
pub const ENTER_REVISION: &str = "EnterRevision";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const SIGN: &str = "Sign";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";

pub const FINALIZE: &str = "Finalize";
pub const STORE_BLOCK: &str = "StoreBlock";

pub const REJECT_OPERATION: &str = "RejectOperation";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartProcessEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |start_process_event: &StartProcessEvent| {
            log::info!(
                "{}, {}, {}, {}",
                START_PROCESS,
                secs_since_unix_epoch(start_process_event.timestamp),
                start_process_event.chain,
                start_process_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for CancelProcessEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |cancel_process_event: &CancelProcessEvent| {
            log::info!(
                "{}, {}, {}, {}",
                CANCEL_PROCESS,
                secs_since_unix_epoch(cancel_process_event.timestamp),
                cancel_process_event.chain,
                cancel_process_event.height
            )
        };
        Box::new(logger)
    }
}

impl Logger for EnterRevisionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |enter_revision_event: &EnterRevisionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ENTER_REVISION,
                secs_since_unix_epoch(enter_revision_event.timestamp),
                enter_revision_event.height,
                enter_revision_event.revision
            )
        };
        Box::new(logger)
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |propose_event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(propose_event.timestamp),
                propose_event.height,
                propose_event.revision,
                optional_hash(&propose_event.block),
                propose_event.operation_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {:?}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.vote.height,
                vote_event.vote.revision,
                vote_event.vote.block_issuer,
                first_seven_base64_chars(&vote_event.vote.block_hash.bytes()),
                vote_event.vote.result,
                vote_event.vote.rejected.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for SignEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |sign_event: &SignEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                SIGN,
                secs_since_unix_epoch(sign_event.timestamp),
                sign_event.height,
                sign_event.revision,
                sign_event.block_issuer,
                first_seven_base64_chars(&sign_event.block.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_proposal_event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(receive_proposal_event.timestamp),
                receive_proposal_event.origin,
                receive_proposal_event.height,
                receive_proposal_event.revision,
                optional_hash(&receive_proposal_event.block)
            )
        };
        Box::new(logger)
    }
}

impl Logger for FinalizeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |finalize_event: &FinalizeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {}",
                FINALIZE,
                secs_since_unix_epoch(finalize_event.timestamp),
                finalize_event.chain,
                finalize_event.height,
                finalize_event.revision,
                finalize_event.issuer,
                first_seven_base64_chars(&finalize_event.block.bytes()),
                finalize_event.operation_count
            )
        };
        Box::new(logger)
    }
}

impl Logger for StoreBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |store_block_event: &StoreBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {:?}",
                STORE_BLOCK,
                secs_since_unix_epoch(store_block_event.timestamp),
                store_block_event.height,
                first_seven_base64_chars(&store_block_event.block.bytes()),
                store_block_event.result
            )
        };
        Box::new(logger)
    }
}

impl Logger for RejectOperationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reject_operation_event: &RejectOperationEvent| {
            log::info!(
                "{}, {}, {}, {:?}",
                REJECT_OPERATION,
                secs_since_unix_epoch(reject_operation_event.timestamp),
                reject_operation_event.operation,
                reject_operation_event.result
            )
        };
        Box::new(logger)
    }
}

// Get a more readable representation of a bytesequence by base64-encoding it and taking the first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn optional_hash(hash: &Option<CryptoHash>) -> String {
    match hash {
        Some(hash) => first_seven_base64_chars(&hash.bytes()),
        None => String::from("-"),
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
