/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events from the council and vote process threads and runs the registered
//! handlers on them.

use crate::events::*;
use crate::logging::Logger;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::TryRecvError;
use std::thread;
use std::thread::JoinHandle;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Handlers registered for each kind of event, including the default loggers if logging is enabled.
pub(crate) struct EventHandlers {
    pub(crate) start_process_handlers: Vec<HandlerPtr<StartProcessEvent>>,
    pub(crate) cancel_process_handlers: Vec<HandlerPtr<CancelProcessEvent>>,
    pub(crate) enter_revision_handlers: Vec<HandlerPtr<EnterRevisionEvent>>,
    pub(crate) propose_handlers: Vec<HandlerPtr<ProposeEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) sign_handlers: Vec<HandlerPtr<SignEvent>>,
    pub(crate) receive_proposal_handlers: Vec<HandlerPtr<ReceiveProposalEvent>>,
    pub(crate) finalize_handlers: Vec<HandlerPtr<FinalizeEvent>>,
    pub(crate) store_block_handlers: Vec<HandlerPtr<StoreBlockEvent>>,
    pub(crate) reject_operation_handlers: Vec<HandlerPtr<RejectOperationEvent>>,
}

fn handlers<E: Logger>(log_events: bool, user_handler: Option<HandlerPtr<E>>) -> Vec<HandlerPtr<E>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(E::get_logger());
    }
    if let Some(handler) = user_handler {
        handlers.push(handler);
    }
    handlers
}

impl EventHandlers {
    pub(crate) fn new(
        log_events: bool,
        start_process_handler: Option<HandlerPtr<StartProcessEvent>>,
        cancel_process_handler: Option<HandlerPtr<CancelProcessEvent>>,
        enter_revision_handler: Option<HandlerPtr<EnterRevisionEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        vote_handler: Option<HandlerPtr<VoteEvent>>,
        sign_handler: Option<HandlerPtr<SignEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        finalize_handler: Option<HandlerPtr<FinalizeEvent>>,
        store_block_handler: Option<HandlerPtr<StoreBlockEvent>>,
        reject_operation_handler: Option<HandlerPtr<RejectOperationEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_process_handlers: handlers(log_events, start_process_handler),
            cancel_process_handlers: handlers(log_events, cancel_process_handler),
            enter_revision_handlers: handlers(log_events, enter_revision_handler),
            propose_handlers: handlers(log_events, propose_handler),
            vote_handlers: handlers(log_events, vote_handler),
            sign_handlers: handlers(log_events, sign_handler),
            receive_proposal_handlers: handlers(log_events, receive_proposal_handler),
            finalize_handlers: handlers(log_events, finalize_handler),
            store_block_handlers: handlers(log_events, store_block_handler),
            reject_operation_handlers: handlers(log_events, reject_operation_handler),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.start_process_handlers.is_empty()
            && self.cancel_process_handlers.is_empty()
            && self.enter_revision_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.sign_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.finalize_handlers.is_empty()
            && self.store_block_handlers.is_empty()
            && self.reject_operation_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartProcess(start_process_event) => self
                .start_process_handlers
                .iter()
                .for_each(|handler| handler(&start_process_event)),

            Event::CancelProcess(cancel_process_event) => self
                .cancel_process_handlers
                .iter()
                .for_each(|handler| handler(&cancel_process_event)),

            Event::EnterRevision(enter_revision_event) => self
                .enter_revision_handlers
                .iter()
                .for_each(|handler| handler(&enter_revision_event)),

            Event::Propose(propose_event) => self
                .propose_handlers
                .iter()
                .for_each(|handler| handler(&propose_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::Sign(sign_event) => self
                .sign_handlers
                .iter()
                .for_each(|handler| handler(&sign_event)),

            Event::ReceiveProposal(receive_proposal_event) => self
                .receive_proposal_handlers
                .iter()
                .for_each(|handler| handler(&receive_proposal_event)),

            Event::Finalize(finalize_event) => self
                .finalize_handlers
                .iter()
                .for_each(|handler| handler(&finalize_event)),

            Event::StoreBlock(store_block_event) => self
                .store_block_handlers
                .iter()
                .for_each(|handler| handler(&store_block_event)),

            Event::RejectOperation(reject_operation_event) => self
                .reject_operation_handlers
                .iter()
                .for_each(|handler| handler(&reject_operation_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            // Publishers are gone once the council shuts down. Wait for the shutdown signal.
            Err(TryRecvError::Disconnected) => thread::yield_now(),
        }
    })
}
