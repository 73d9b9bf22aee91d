use crate::fsm::{Event, State};
use thiserror::Error;

/// Errors that can occur while driving initial sync.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("no handler for event {event} in state {state} (start={start})")]
    UnhandledTransition {
        start: u64,
        state: State,
        event: Event,
    },
    #[error("handler already registered for event {event} in state {state}")]
    DuplicateHandler { state: State, event: Event },
    #[error("stale response {id} for machine {start}")]
    StaleResponse { start: u64, id: u64 },
    #[error("no peer can serve machine {0}")]
    NoPeers(u64),
    #[error("machine {0} already exists")]
    AlreadyExists(u64),
    #[error("machine {0} is not found")]
    NotFound(u64),
    #[error("no machines exist")]
    NoMachines,
    #[error("machine {start} is {state}, expected {expected}")]
    InvalidState {
        start: u64,
        state: State,
        expected: State,
    },
    #[error("machine {0} covers an empty range")]
    EmptyRange(u64),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
    #[error("mailbox closed")]
    Closed,
}
