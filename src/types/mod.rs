//! Types and traits that are used across the ledger engine and the council.
//!
//! Types specific to one component live next to it, e.g., [`crate::council::messages`] and
//! [`crate::ledger::entities`].

pub mod data_types;

pub mod crypto_primitives;

pub mod signed_messages;

pub mod signatures;

pub mod operations;

pub mod block;

pub mod vote_members;

pub mod update_sets;
