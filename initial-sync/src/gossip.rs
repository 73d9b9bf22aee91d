//! Route single blocks received over gossip to the chain.
//!
//! Gossiped blocks never enter the range state machines. A block more than one height above the
//! head is stashed with [Chain::register_future] until sync closes the gap. Any other block is
//! inserted directly.

use crate::{Block, Chain, Rejection};
use tracing::{debug, warn};

/// Where a gossiped block ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The block was inserted into the chain.
    Inserted,

    /// The block was stashed until the chain reaches its parent.
    Future,
}

/// Handles a block received over gossip.
///
/// If the chain refuses the block, it is reported with [Chain::mark_bad] before the rejection is
/// returned.
pub async fn handle<C: Chain>(
    chain: &mut C,
    block: C::Block,
) -> Result<Outcome, Rejection<<C::Block as Block>::Digest>> {
    let head = chain.head().await;
    let number = block.number();
    let result = if number > head.saturating_add(1) {
        chain
            .register_future(block)
            .await
            .map(|_| Outcome::Future)
    } else {
        chain.insert(vec![block]).await.map(|_| Outcome::Inserted)
    };
    match result {
        Ok(outcome) => {
            debug!(number, head, ?outcome, "handled gossiped block");
            Ok(outcome)
        }
        Err(rejection) => {
            warn!(number, head, %rejection, "gossiped block rejected");
            chain.mark_bad(rejection.digest.clone()).await;
            Err(rejection)
        }
    }
}
