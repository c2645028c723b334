/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The council thread, which runs one [vote process](super::process) after another for a chain.
//!
//! The council thread is the only owner of the current [`VoteProcessHandle`]. It receives every input
//! as a [`CouncilCommand`]: messages and operations forwarded by the poller thread, operations
//! submitted by the library user, finalized blocks reported by the vote process, and notifications
//! about storage. For each council message it checks the chain and the signature, then:
//! - Delivers it to the vote process if it is about the height being agreed on.
//! - Buffers it if it is about the height after that, and delivers it once that height starts.
//! - Drops it otherwise.
//!
//! When a block is finalized, the council thread computes its ledger updates, stores it, removes its
//! operations from the pool, runs the [finalization hook](super::finalization), and starts the vote
//! process for the next height.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::Display,
    sync::{
        mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::events::*;
use crate::ledger::{
    pluggables::{ChainStorage, HistoryCheck, LedgerGetError, StoreResult},
    InvalidOperations, LedgerEngine, OperationResult,
};
use crate::networking::{Message, Network};
use crate::types::{
    block::Block,
    crypto_primitives::{SigningKey, VerifyingKey},
    data_types::{BlockHeight, ChainAddress, IssuerIndex, Revision, UniqueIdentifier},
    operations::Operation,
    signatures::BlockSignatures,
    signed_messages::SignedMessage,
    vote_members::VoteMembers,
};

use super::{
    finalization::{FinalizationHook, OutboundMessage},
    messages::{CouncilMessage, CouncilPayload},
    persistence::{ProposalStore, ProposalStoreError},
    pool::OperationPool,
    process::{
        PhaseTimeouts, VoteProcess, VoteProcessCallbacks, VoteProcessConfig, VoteProcessHandle,
    },
    proposal::VoteProposal,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum number of messages about the next height held until that height starts.
const MAX_BUFFERED_MESSAGES: usize = 4096;

/// Inputs of the council thread.
pub enum CouncilCommand {
    /// A council message received from the peer with the given key.
    Message(VerifyingKey, CouncilMessage),
    /// An operation received from a peer.
    Operation(Operation),
    /// An operation submitted by the library user. Gossiped to peers once pooled.
    Submit(Operation),
    /// The vote process finalized `block`.
    Finalized {
        block: Block,
        signatures: BlockSignatures,
    },
    /// Storage learned of a newer finalized block by other means.
    NewBlock,
    /// Storage was rebuilt underneath the engine.
    StorageRebuilt,
}

#[derive(Debug)]
pub enum CouncilError {
    LedgerGet(LedgerGetError),
    ProposalStore(ProposalStoreError),
    /// Storage holds no block for the chain, not even its genesis block.
    MissingGenesis(ChainAddress),
    /// The chain is not registered, or none of its keys may vote.
    NoMembers(ChainAddress),
    /// The configured issuer index does not belong to the configured signing key.
    NotAMember(IssuerIndex),
}

impl From<LedgerGetError> for CouncilError {
    fn from(value: LedgerGetError) -> Self {
        CouncilError::LedgerGet(value)
    }
}

impl From<ProposalStoreError> for CouncilError {
    fn from(value: ProposalStoreError) -> Self {
        CouncilError::ProposalStore(value)
    }
}

impl Display for CouncilError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CouncilError::LedgerGet(err) => write!(f, "{}", err),
            CouncilError::ProposalStore(err) => write!(f, "{}", err),
            CouncilError::MissingGenesis(chain) => {
                write!(f, "storage has no finalized block for chain {}", chain)
            }
            CouncilError::NoMembers(chain) => write!(f, "chain {} has no voting members", chain),
            CouncilError::NotAMember(issuer) => {
                write!(f, "issuer {} is not a member with the configured key", issuer)
            }
        }
    }
}

/// Parameters of the council thread that stay fixed while it runs.
pub(crate) struct CouncilParameters {
    pub(crate) signing_key: SigningKey,
    pub(crate) issuer: IssuerIndex,
    pub(crate) chain: ChainAddress,
    pub(crate) timeouts: PhaseTimeouts,
    pub(crate) keep_heights: u64,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The members of `chain`, read from its registration in `storage`.
pub(crate) fn load_members<S: ChainStorage>(
    storage: &S,
    chain: ChainAddress,
) -> Result<VoteMembers, CouncilError> {
    let chain_info = storage
        .chain_info(chain.id)?
        .ok_or(CouncilError::NoMembers(chain))?;
    let members = VoteMembers::from_chain_info(chain, &chain_info);
    if members.is_empty() {
        return Err(CouncilError::NoMembers(chain));
    }
    Ok(members)
}

/// What a vote process calls back into. Holds shared handles to the council's engine and pool, so
/// it never waits on the council thread.
pub(crate) struct CouncilCallbacks<E: LedgerEngine, N: Network> {
    chain: ChainAddress,
    issuer: IssuerIndex,
    signing_key: SigningKey,
    engine: Arc<Mutex<E>>,
    pool: Arc<Mutex<OperationPool>>,
    network: N,
    to_council: Sender<CouncilCommand>,
    proposal_store: Option<Arc<ProposalStore>>,
    event_publisher: Option<Sender<Event>>,
}

impl<E: LedgerEngine, N: Network + 'static> VoteProcessCallbacks for CouncilCallbacks<E, N> {
    fn get_proposal(&mut self, previous: &Block, revision: Revision) -> Option<Block> {
        let operations = lock(&self.pool).snapshot();

        let mut rejected: Vec<(UniqueIdentifier, OperationResult)> = Vec::new();
        let block = {
            let mut engine = lock(&self.engine);
            engine.reset();
            for operation in &operations {
                let result = engine.consume(operation);
                if !result.is_ok() && !result.is_retryable() {
                    rejected.push((operation.unique_id(), result));
                }
            }
            engine.build(previous, self.issuer, revision)
        };

        if !rejected.is_empty() {
            let mut pool = lock(&self.pool);
            for (unique_id, _) in &rejected {
                pool.remove(unique_id);
            }
        }
        for (operation, result) in rejected {
            Event::publish(
                &self.event_publisher,
                Event::RejectOperation(RejectOperationEvent {
                    timestamp: SystemTime::now(),
                    operation,
                    result,
                }),
            );
        }
        block
    }

    fn check_proposal(&mut self, previous: &Block, block: &Block) -> InvalidOperations {
        lock(&self.engine).check_block(previous, block)
    }

    fn broadcast(&mut self, payload: CouncilPayload) {
        let message = CouncilMessage::new(&self.signing_key, self.chain, self.issuer, payload);
        self.network
            .broadcast(Message::Council(message), &HashSet::new());
    }

    fn on_finalized(&mut self, proposal: &VoteProposal) {
        if let Some(block) = proposal.block() {
            let _ = self.to_council.send(CouncilCommand::Finalized {
                block: block.clone(),
                signatures: proposal.signatures(),
            });
        }
    }

    fn on_proposal_changed(&mut self, proposal: &VoteProposal) {
        if let Some(proposal_store) = &self.proposal_store {
            if let Err(err) = proposal_store.save(&proposal.to_record()) {
                log::warn!("failed to save proposal: {}", err);
            }
        }
    }
}

pub(crate) struct CouncilThread<S, E, N, H>
where
    S: ChainStorage,
    E: LedgerEngine,
    N: Network + 'static,
    H: FinalizationHook,
{
    parameters: CouncilParameters,
    storage: S,
    engine: Arc<Mutex<E>>,
    pool: Arc<Mutex<OperationPool>>,
    network: N,
    parent_network: Option<N>,
    hook: H,
    proposal_store: Option<Arc<ProposalStore>>,
    commands: Receiver<CouncilCommand>,
    to_council: Sender<CouncilCommand>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    previous: Block,
    members: Arc<VoteMembers>,
    process: Option<VoteProcessHandle>,
    buffered: BTreeMap<BlockHeight, Vec<(IssuerIndex, CouncilPayload)>>,
    buffered_count: usize,
}

impl<S, E, N, H> CouncilThread<S, E, N, H>
where
    S: ChainStorage,
    E: LedgerEngine,
    N: Network + 'static,
    H: FinalizationHook,
{
    /// Anchor a council on the last finalized block in `storage`.
    ///
    /// Fails if storage has no block for the chain, if the chain has no members, or if the configured
    /// issuer index is not the configured key's.
    pub(crate) fn new(
        parameters: CouncilParameters,
        storage: S,
        engine: Arc<Mutex<E>>,
        pool: Arc<Mutex<OperationPool>>,
        network: N,
        parent_network: Option<N>,
        hook: H,
        proposal_store: Option<Arc<ProposalStore>>,
        commands: (Sender<CouncilCommand>, Receiver<CouncilCommand>),
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, CouncilError> {
        let chain = parameters.chain;
        let previous = storage
            .last_finalized_block(chain)
            .ok_or(CouncilError::MissingGenesis(chain))?;
        let members = load_members(&storage, chain)?;
        if members.get(&parameters.issuer) != Some(&parameters.signing_key.verifying_key()) {
            return Err(CouncilError::NotAMember(parameters.issuer));
        }
        let (to_council, commands) = commands;

        Ok(CouncilThread {
            parameters,
            storage,
            engine,
            pool,
            network,
            parent_network,
            hook,
            proposal_store,
            commands,
            to_council,
            shutdown_signal,
            event_publisher,
            previous,
            members: Arc::new(members),
            process: None,
            buffered: BTreeMap::new(),
            buffered_count: 0,
        })
    }

    pub(crate) fn start(self) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    fn run(mut self) {
        self.start_process();
        loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) => break,
                Err(TryRecvError::Empty) => (),
                Err(TryRecvError::Disconnected) => {
                    panic!("council thread disconnected from main thread")
                }
            }

            match self.commands.recv_timeout(POLL_INTERVAL) {
                Ok(command) => self.on_command(command),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => (),
            }
        }
        self.stop_process();
    }

    fn current_height(&self) -> BlockHeight {
        self.previous.height + 1
    }

    fn on_command(&mut self, command: CouncilCommand) {
        match command {
            CouncilCommand::Message(origin, message) => self.on_council_message(origin, message),
            CouncilCommand::Operation(operation) => self.on_operation(operation, false),
            CouncilCommand::Submit(operation) => self.on_operation(operation, true),
            CouncilCommand::Finalized { block, signatures } => self.on_finalized(block, signatures),
            CouncilCommand::NewBlock => self.reanchor(),
            CouncilCommand::StorageRebuilt => lock(&self.engine).clear_cache(),
        }
    }

    fn on_council_message(&mut self, origin: VerifyingKey, message: CouncilMessage) {
        if message.chain != self.parameters.chain {
            log::debug!("dropping council message for chain {}", message.chain);
            return;
        }
        let verifying_key = match self.members.get(&message.issuer) {
            Some(verifying_key) => verifying_key,
            None => return,
        };
        if !message.is_correct(verifying_key) {
            log::debug!(
                "dropping council message with a bad signature from {:?}",
                origin.as_bytes()
            );
            return;
        }

        let height = message.height();
        let current_height = self.current_height();
        if height == current_height {
            if let Some(process) = &self.process {
                process.deliver(message.issuer, message.payload);
            }
        } else if height == current_height + 1 {
            if self.buffered_count >= MAX_BUFFERED_MESSAGES {
                return;
            }
            self.buffered
                .entry(height)
                .or_default()
                .push((message.issuer, message.payload));
            self.buffered_count += 1;
        }
    }

    fn on_operation(&mut self, operation: Operation, gossip: bool) {
        if operation.chain() != self.parameters.chain {
            log::debug!(
                "dropping operation {} for chain {}",
                operation.unique_id(),
                operation.chain()
            );
            return;
        }

        let rejection = match self.storage.history_contains(&operation) {
            HistoryCheck::Ok => None,
            HistoryCheck::AlreadyProcessed => Some(OperationResult::AlreadyProcessed),
            HistoryCheck::AlreadyJoined => Some(OperationResult::AlreadyJoined),
        };
        if let Some(result) = rejection {
            Event::publish(
                &self.event_publisher,
                Event::RejectOperation(RejectOperationEvent {
                    timestamp: SystemTime::now(),
                    operation: operation.unique_id(),
                    result,
                }),
            );
            return;
        }

        let pooled = lock(&self.pool).insert(operation.clone());
        if pooled && gossip {
            self.network
                .broadcast(Message::Operation(operation), &HashSet::new());
        }
    }

    fn on_finalized(&mut self, block: Block, signatures: BlockSignatures) {
        if !block.extends(&self.previous) {
            log::debug!("ignoring stale finalized block at height {}", block.height);
            return;
        }
        // The block may have been reported by a process that was since replaced.
        if let Some(process) = self.process.take() {
            process.stop();
        }

        let updates = lock(&self.engine).ledger_updates(&block);
        let result = self.storage.store(&block, &signatures, &updates);
        Event::publish(
            &self.event_publisher,
            Event::StoreBlock(StoreBlockEvent {
                timestamp: SystemTime::now(),
                height: block.height,
                block: block.hash,
                result,
            }),
        );
        if result != StoreResult::Ok {
            log::warn!(
                "storage refused block {} of chain {}: {:?}",
                block.height,
                block.chain,
                result
            );
            self.reanchor();
            return;
        }

        let finalized: Vec<UniqueIdentifier> =
            block.operations().map(|operation| operation.unique_id()).collect();
        lock(&self.pool).remove_all(&finalized);
        lock(&self.engine).clear_cache();

        for message in self.hook.on_finalized(&block, &signatures) {
            match message {
                OutboundMessage::Broadcast(message) => {
                    self.network.broadcast(message, &HashSet::new())
                }
                OutboundMessage::Send(peer, message) => self.network.send(peer, message),
                OutboundMessage::Parent(message) => match &mut self.parent_network {
                    Some(parent_network) => parent_network.broadcast(message, &HashSet::new()),
                    None => log::warn!(
                        "chain {} has no parent network, dropping message for block {}",
                        block.chain,
                        block.height
                    ),
                },
            }
        }

        Event::publish(
            &self.event_publisher,
            Event::Finalize(FinalizeEvent {
                timestamp: SystemTime::now(),
                chain: block.chain,
                height: block.height,
                revision: block.revision,
                issuer: block.issuer,
                block: block.hash,
                operation_count: block.operation_count(),
            }),
        );

        self.previous = block;
        self.prune_proposals();
        self.refresh_members();
        self.start_process();
    }

    /// Cancel the current process and restart from whatever storage holds now.
    fn reanchor(&mut self) {
        self.stop_process();
        {
            let mut engine = lock(&self.engine);
            engine.reset();
            engine.clear_cache();
        }
        match self.storage.last_finalized_block(self.parameters.chain) {
            Some(block) => self.previous = block,
            None => log::warn!(
                "storage lost the blocks of chain {}",
                self.parameters.chain
            ),
        }
        self.refresh_members();
        self.start_process();
    }

    fn refresh_members(&mut self) {
        match load_members(&self.storage, self.parameters.chain) {
            Ok(members) => self.members = Arc::new(members),
            Err(err) => log::warn!("keeping previous members: {}", err),
        }
    }

    fn prune_proposals(&mut self) {
        if let Some(proposal_store) = &self.proposal_store {
            let keep_from = self
                .current_height()
                .int()
                .saturating_sub(self.parameters.keep_heights);
            if let Err(err) = proposal_store.prune(BlockHeight::new(keep_from)) {
                log::warn!("failed to prune proposals: {}", err);
            }
        }
    }

    fn stop_process(&mut self) {
        if let Some(process) = self.process.take() {
            process.stop();
        }
    }

    fn start_process(&mut self) {
        let height = self.current_height();
        self.buffered = self.buffered.split_off(&height);
        let buffered = self.buffered.remove(&height).unwrap_or_default();
        self.buffered_count = self.buffered.values().map(Vec::len).sum();

        let my_key = self.parameters.signing_key.verifying_key();
        if self.members.get(&self.parameters.issuer) != Some(&my_key) {
            log::warn!(
                "issuer {} is no longer a member of chain {}, not voting at height {}",
                self.parameters.issuer,
                self.parameters.chain,
                height
            );
            return;
        }

        let restored = match &self.proposal_store {
            Some(proposal_store) => match proposal_store.load(height) {
                Ok(records) => records
                    .into_iter()
                    .map(|record| VoteProposal::from_record(self.members.clone(), record))
                    .collect(),
                Err(err) => {
                    log::warn!("failed to restore proposals at height {}: {}", height, err);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let callbacks = CouncilCallbacks {
            chain: self.parameters.chain,
            issuer: self.parameters.issuer,
            signing_key: self.parameters.signing_key.clone(),
            engine: self.engine.clone(),
            pool: self.pool.clone(),
            network: self.network.clone(),
            to_council: self.to_council.clone(),
            proposal_store: self.proposal_store.clone(),
            event_publisher: self.event_publisher.clone(),
        };
        let config = VoteProcessConfig {
            signing_key: self.parameters.signing_key.clone(),
            issuer: self.parameters.issuer,
            members: self.members.clone(),
            previous: self.previous.clone(),
            timeouts: self.parameters.timeouts,
        };
        let process = VoteProcess::start(config, callbacks, restored, self.event_publisher.clone());
        for (sender, payload) in buffered {
            process.deliver(sender, payload);
        }
        self.process = Some(process);
    }
}
