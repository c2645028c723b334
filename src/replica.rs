/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and shut down a council member.
//!
//! A council member runs the agreement protocol for one chain. To run one, the library user builds a
//! [`CouncilSpec`] out of:
//! 1. An engine for the chain (a [`LedgerEngine`], e.g. a [`RootLedger`](crate::ledger::RootLedger)).
//! 2. The chain's storage (a [`ChainStorage`]), which must already hold the chain's genesis block
//!    and registration.
//! 3. A [`Network`] that carries the chain's traffic.
//! 4. A [`FinalizationHook`], e.g. [`NoSideEffects`](crate::council::finalization::NoSideEffects).
//! 5. A [`CouncilConfiguration`].
//! 6. For service and maintenance chains, a second [`Network`] that reaches the root ledger's members,
//!    over which the finalization hook sends carrier operations.
//!
//! and calls [`start`](CouncilSpec::start) on it:
//!
//! ```ignore
//! let council = CouncilSpec::builder()
//!     .engine(engine)
//!     .storage(storage)
//!     .network(network)
//!     .finalization_hook(NoSideEffects)
//!     .configuration(configuration)
//!     .on_finalize(|event: &FinalizeEvent| println!("finalized {}", event.height))
//!     .build()
//!     .start()?;
//! ```
//!
//! The returned [`Council`] is a handle to the member's threads. Operations are passed to it with
//! [`submit`](Council::submit). Dropping it shuts every thread down.

use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use typed_builder::TypedBuilder;

use crate::council::{
    finalization::FinalizationHook,
    persistence::ProposalStore,
    pool::{OperationPool, DEFAULT_POOL_CAPACITY},
    process::PhaseTimeouts,
    protocol::{CouncilCommand, CouncilError, CouncilParameters, CouncilThread},
};
use crate::event_bus::*;
use crate::events::*;
use crate::ledger::{pluggables::ChainStorage, LedgerEngine};
use crate::networking::{start_polling, Network};
use crate::types::{
    crypto_primitives::SigningKey,
    data_types::{ChainAddress, IssuerIndex},
    operations::Operation,
};

/// Stores the user-defined parameters required to start a council member.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [CouncilConfiguration]. On the builder call the following methods to construct a valid [CouncilConfiguration].

    Required:
    - `.me(...)`
    - `.issuer(...)`
    - `.chain(...)`
    - `.log_events(...)`

    Optional:
    - `.announce_time(...)`
    - `.propose_time(...)`
    - `.sign_time(...)`
    - `.escalate_time(...)`
    - `.proposal_cache_dir(...)`
    - `.keep_heights(...)`
    - `.pool_capacity(...)`
"))]
pub struct CouncilConfiguration {
    #[builder(setter(doc = "Set the member's chain key, used to sign council messages and blocks. Required."))]
    pub me: SigningKey,
    #[builder(setter(doc = "Set the index of the member's chain key in the chain's registration. Required."))]
    pub issuer: IssuerIndex,
    #[builder(setter(doc = "Set the chain this council agrees on. Required."))]
    pub chain: ChainAddress,
    #[builder(default = Duration::from_millis(200), setter(doc = "Set how long the announce phase of a revision lasts. Optional, defaults to 200ms."))]
    pub announce_time: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how long the propose phase of a revision lasts. Optional, defaults to 1s."))]
    pub propose_time: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how long the sign phase of a revision lasts. Optional, defaults to 1s."))]
    pub sign_time: Duration,
    #[builder(default = Duration::from_secs(1), setter(doc = "Set how long the escalate phase of a revision lasts. Optional, defaults to 1s."))]
    pub escalate_time: Duration,
    #[builder(default, setter(strip_option, doc = "Set the directory in-flight proposals are saved to. Optional, proposals are not saved if unset."))]
    pub proposal_cache_dir: Option<PathBuf>,
    #[builder(default = 3, setter(doc = "Set how many heights of saved proposals are kept. Optional, defaults to 3."))]
    pub keep_heights: u64,
    #[builder(default = DEFAULT_POOL_CAPACITY, setter(doc = "Set the maximum number of pending operations. Optional."))]
    pub pool_capacity: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

impl CouncilConfiguration {
    pub fn timeouts(&self) -> PhaseTimeouts {
        PhaseTimeouts {
            announce: self.announce_time,
            propose: self.propose_time,
            sign: self.sign_time,
            escalate: self.escalate_time,
        }
    }
}

/// Stores all necessary parameters and trait implementations required to run a [Council].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [CouncilSpec]. On the builder call the following methods to construct a valid [CouncilSpec].

    Required:
    - `.engine(...)`
    - `.storage(...)`
    - `.network(...)`
    - `.finalization_hook(...)`
    - `.configuration(...)`

    Optional:
    - `.parent_network(...)`
    - `.on_start_process(...)`
    - `.on_cancel_process(...)`
    - `.on_enter_revision(...)`
    - `.on_propose(...)`
    - `.on_vote(...)`
    - `.on_sign(...)`
    - `.on_receive_proposal(...)`
    - `.on_finalize(...)`
    - `.on_store_block(...)`
    - `.on_reject_operation(...)`
"))]
pub struct CouncilSpec<S: ChainStorage, E: LedgerEngine, N: Network + 'static, H: FinalizationHook> {
    #[builder(setter(doc = "Set the engine of the chain. The argument must implement the [LedgerEngine] trait. Required."))]
    engine: E,
    #[builder(setter(doc = "Set the chain's storage. The argument must implement the [ChainStorage] trait. Required."))]
    storage: S,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network] trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the side effects of finalizing a block. The argument must implement the [FinalizationHook] trait. Required."))]
    finalization_hook: H,
    #[builder(setter(doc = "Set the [configuration](CouncilConfiguration), which contains the necessary parameters to run a council member. Required."))]
    configuration: CouncilConfiguration,
    #[builder(default, setter(strip_option, doc = "Set the network of the parent ledger, which receives the messages the finalization hook addresses to it. Optional, those messages are dropped if unset."))]
    parent_network: Option<N>,
    #[builder(default, setter(transform = |handler: impl Fn(&StartProcessEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StartProcessEvent>),
    doc = "Register a handler closure to be invoked after a vote process starts. Optional."))]
    on_start_process: Option<HandlerPtr<StartProcessEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CancelProcessEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CancelProcessEvent>),
    doc = "Register a handler closure to be invoked after a vote process is cancelled. Optional."))]
    on_cancel_process: Option<HandlerPtr<CancelProcessEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EnterRevisionEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EnterRevisionEvent>),
    doc = "Register a handler closure to be invoked after the member enters a revision. Optional."))]
    on_enter_revision: Option<HandlerPtr<EnterRevisionEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ProposeEvent>),
    doc = "Register a handler closure to be invoked after the member broadcasts a proposal. Optional."))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the member votes on a proposal. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&SignEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SignEvent>),
    doc = "Register a handler closure to be invoked after the member signs a proposal. Optional."))]
    on_sign: Option<HandlerPtr<SignEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>),
    doc = "Register a handler closure to be invoked after the member receives a proposal. Optional."))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&FinalizeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<FinalizeEvent>),
    doc = "Register a handler closure to be invoked after a block is finalized. Optional."))]
    on_finalize: Option<HandlerPtr<FinalizeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&StoreBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<StoreBlockEvent>),
    doc = "Register a handler closure to be invoked after storage is asked to store a finalized block. Optional."))]
    on_store_block: Option<HandlerPtr<StoreBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectOperationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectOperationEvent>),
    doc = "Register a handler closure to be invoked after an operation is dropped from the pool. Optional."))]
    on_reject_operation: Option<HandlerPtr<RejectOperationEvent>>,
}

impl<S: ChainStorage, E: LedgerEngine, N: Network + 'static, H: FinalizationHook>
    CouncilSpec<S, E, N, H>
{
    /// Starts all threads and channels associated with running a council member, and returns the
    /// handles to them in a [Council] struct.
    pub fn start(self) -> Result<Council, CouncilError> {
        let configuration = self.configuration;
        let proposal_store = match &configuration.proposal_cache_dir {
            Some(dir) => Some(Arc::new(ProposalStore::open(dir)?)),
            None => None,
        };
        let timeouts = configuration.timeouts();
        let parameters = CouncilParameters {
            signing_key: configuration.me,
            issuer: configuration.issuer,
            chain: configuration.chain,
            timeouts,
            keep_heights: configuration.keep_heights,
        };

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_start_process,
            self.on_cancel_process,
            self.on_enter_revision,
            self.on_propose,
            self.on_vote,
            self.on_sign,
            self.on_receive_proposal,
            self.on_finalize,
            self.on_store_block,
            self.on_reject_operation,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let (to_council, commands) = mpsc::channel();
        let (council_shutdown, council_shutdown_receiver) = mpsc::channel();
        let council_thread = CouncilThread::new(
            parameters,
            self.storage,
            Arc::new(Mutex::new(self.engine)),
            Arc::new(Mutex::new(OperationPool::new(configuration.pool_capacity))),
            self.network.clone(),
            self.parent_network,
            self.finalization_hook,
            proposal_store,
            (to_council.clone(), commands),
            council_shutdown_receiver,
            event_publisher,
        )?;
        let council_thread = council_thread.start();

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network, poller_shutdown_receiver, to_council.clone());

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Ok(Council {
            commands: to_council,
            poller: Some(poller),
            poller_shutdown,
            council_thread: Some(council_thread),
            council_shutdown,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A handle to the background threads of a council member. When this value is dropped, all
/// background threads are gracefully shut down.
pub struct Council {
    commands: Sender<CouncilCommand>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    council_thread: Option<JoinHandle<()>>,
    council_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl Council {
    /// Add an operation to the member's pool, and gossip it to the other members.
    ///
    /// Operations already in the chain's finalized history are dropped.
    pub fn submit(&self, operation: Operation) {
        let _ = self.commands.send(CouncilCommand::Submit(operation));
    }

    /// Tell the council that storage holds a newer finalized block than the one it is agreeing on
    /// top of, e.g., after the library user synced storage. Cancels the current vote process and
    /// starts one on top of storage's last finalized block.
    pub fn on_new_block(&self) {
        let _ = self.commands.send(CouncilCommand::NewBlock);
    }

    /// Tell the council that storage was rebuilt, so that cached entities are read again.
    pub fn on_storage_rebuilt(&self) {
        let _ = self.commands.send(CouncilCommand::StorageRebuilt);
    }
}

impl Drop for Council {
    fn drop(&mut self) {
        // The council thread receives commands from the poller, and assumes that the poller lives
        // longer than it.
        self.event_bus_shutdown
            .iter()
            .for_each(|shutdown| {
                let _ = shutdown.send(());
            });
        if let Some(event_bus) = self.event_bus.take() {
            let _ = event_bus.join();
        }

        let _ = self.council_shutdown.send(());
        if let Some(council_thread) = self.council_thread.take() {
            let _ = council_thread.join();
        }

        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            let _ = poller.join();
        }
    }
}
