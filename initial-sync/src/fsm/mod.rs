//! Per-range state machines and the manager that orders them.
//!
//! # States
//!
//! ```txt
//!            tick                 dataReceived (valid)
//!   New ------------> Scheduled ----------------------> DataParsed ---(hand-off)---> Sent
//!                      |    ^
//!   timeout / invalid  |    | tick
//!                      v    |
//!                     Skipped
//! ```
//!
//! Every transition goes through a [Transitions] table keyed by `(State, Event)`. A missing
//! entry is reported as [crate::Error::UnhandledTransition] and leaves the machine untouched.
//!
//! Handlers never wait on the network. Requests they issue are queued in the [Scheduler] and
//! sent by the caller once the round of events is complete.

mod batch;
pub use batch::Batch;
mod manager;
pub use manager::Manager;
mod scheduler;
pub use scheduler::Scheduler;
mod state;
pub use state::{Event, State};
mod transitions;
pub use transitions::{Handler, Input, Transitions};
