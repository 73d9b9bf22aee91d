//! Catch up to the network head by fetching ordered block ranges from untrusted peers.
//!
//! # Overview
//!
//! Initial sync splits the span between the local chain head and the highest head advertised
//! by peers into contiguous ranges (batches). Each batch is driven by its own finite state
//! machine ([fsm::Batch]) through the states `New`, `Scheduled`, `DataParsed`, `Skipped` and
//! `Sent`. The [fsm::Manager] owns all batches, keyed (and ordered) by their first block number.
//!
//! The [engine::Engine] owns the manager and:
//! - extends a bounded window of batches past the current head
//! - ticks every batch periodically, which schedules requests and detects timeouts
//! - feeds peer responses (received through its [engine::Mailbox]) to the addressed batch
//! - hands the lowest batch to the [Chain] once it has been parsed, in strictly ascending order
//!
//! # Collaborators
//!
//! The crate owns no networking, storage, or encoding. It consumes:
//! - [Requester]: sends a range request to a peer (fire-and-forget)
//! - [Coordinator]: lists connected peers and their advertised heads
//! - [Chain]: inserts contiguous blocks, stashes future blocks, and records bad blocks
//!
//! Single blocks received over gossip bypass the state machines and are routed to the chain by
//! [gossip::handle].

use std::{fmt::Debug, future::Future, hash::Hash};
use thiserror::Error;

pub mod engine;
mod error;
pub use error::Error;
pub mod fsm;
pub mod gossip;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

/// Identity of a peer.
pub trait Peer: Clone + Debug + Eq + Hash + Ord + Send + Sync + 'static {}

impl<T: Clone + Debug + Eq + Hash + Ord + Send + Sync + 'static> Peer for T {}

/// A block that can be synced.
pub trait Block: Clone + Debug + Send + Sync + 'static {
    /// Unique identifier of a block.
    type Digest: Clone + Debug + Eq + Hash + Send + Sync + 'static;

    /// Height of the block.
    fn number(&self) -> u64;

    /// Digest of the block.
    fn digest(&self) -> Self::Digest;

    /// Digest of the block's parent.
    fn parent(&self) -> Self::Digest;
}

/// A range (or single block) refused by the [Chain].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("block {number} rejected: {reason}")]
pub struct Rejection<D> {
    /// Height of the offending block.
    pub number: u64,

    /// Digest of the offending block.
    pub digest: D,

    /// Why the block was refused.
    pub reason: String,
}

/// Long-term block storage.
pub trait Chain: Clone + Send + 'static {
    /// Type of block stored.
    type Block: Block;

    /// Returns the height of the current chain head.
    fn head(&self) -> impl Future<Output = u64> + Send;

    /// Insert blocks that extend the current head.
    ///
    /// Blocks are provided in ascending order, starting at `head + 1`.
    fn insert(
        &mut self,
        blocks: Vec<Self::Block>,
    ) -> impl Future<Output = Result<(), Rejection<<Self::Block as Block>::Digest>>> + Send;

    /// Stash a block that is higher than `head + 1` until the gap is closed.
    fn register_future(
        &mut self,
        block: Self::Block,
    ) -> impl Future<Output = Result<(), Rejection<<Self::Block as Block>::Digest>>> + Send;

    /// Record a block that failed validation.
    fn mark_bad(
        &mut self,
        digest: <Self::Block as Block>::Digest,
    ) -> impl Future<Output = ()> + Send;
}

/// Manages the list of peers that can be used to fetch ranges.
pub trait Coordinator: Clone + Send + Sync + 'static {
    /// Type used to uniquely identify peers.
    type PublicKey: Peer;

    /// Returns the currently connected peers and the head each of them advertises.
    fn peers(&self) -> Vec<(Self::PublicKey, u64)>;
}

/// A request for `count` blocks starting at `start`, addressed to `peer`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request<P> {
    /// Unique identifier of the request, echoed in the [Response].
    pub id: u64,

    /// First block requested.
    pub start: u64,

    /// Number of blocks requested.
    pub count: u64,

    /// Peer the request is sent to.
    pub peer: P,
}

/// A peer's answer to a [Request].
///
/// An empty `blocks` is an explicit "no data" answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response<P, B> {
    /// Identifier of the answered request.
    pub id: u64,

    /// First block of the answered request.
    pub start: u64,

    /// Peer that answered.
    pub peer: P,

    /// Blocks served by the peer.
    pub blocks: Vec<B>,
}

/// Sends range requests to peers.
///
/// Responses are delivered asynchronously via [engine::Mailbox::deliver].
pub trait Requester: Clone + Send + 'static {
    /// Type used to uniquely identify peers.
    type PublicKey: Peer;

    /// Send a request. Must not wait for the response.
    fn request(&mut self, request: Request<Self::PublicKey>) -> impl Future<Output = ()> + Send;
}
