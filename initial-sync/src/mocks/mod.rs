//! In-memory collaborators for tests and simulations.

mod block;
pub use block::{Block, Digest};
mod chain;
pub use chain::Chain;
mod coordinator;
pub use coordinator::Coordinator;
mod network;
pub use network::{Behavior, Network};
