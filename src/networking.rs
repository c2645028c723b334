/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the poller thread
//! that councils use to receive from the network.
//!
//! Peers are reachable by their `VerifyingKey`. Networking providers interact with a council's
//! threads through implementations of the [Network] trait. Framing and transport are up to the
//! provider: a council only hands it [`Message`]s and expects [`Message`]s back.
//!
//! A council assumes that one `Network` instance carries the traffic of exactly one chain. Council
//! messages and operations addressed to another chain are dropped by the council thread.

use std::collections::HashSet;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::council::{messages::CouncilMessage, protocol::CouncilCommand};
use crate::types::{crypto_primitives::VerifyingKey, operations::Operation};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Message {
    /// A message of the agreement protocol, exchanged between the members of a council.
    Council(CouncilMessage),
    /// A client operation, gossiped so that every member's pool sees it.
    Operation(Operation),
}

pub trait Network: Clone + Send {
    /// Send a message to all peers except those in `exclude`, without blocking.
    fn broadcast(&mut self, message: Message, exclude: &HashSet<VerifyingKey>);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: Message);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, Message)>;
}

/// Spawn the poller thread, which polls the Network for messages and forwards them to the council
/// thread as [`CouncilCommand`]s.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
    to_council: Sender<CouncilCommand>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            let command = match msg {
                Message::Council(council_msg) => CouncilCommand::Message(origin, council_msg),
                Message::Operation(operation) => CouncilCommand::Operation(operation),
            };
            let _ = to_council.send(command);
        } else {
            thread::yield_now()
        }
    })
}
