use super::Block;
use crate::{engine::Mailbox, Request, Response};
use commonware_runtime::{Clock, Metrics, Spawner};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

/// How a simulated peer answers requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// Serves the canonical range.
    Honest,
    /// Never answers.
    Silent,
    /// Answers with no blocks.
    Empty,
    /// Serves one block less than requested.
    Truncated,
    /// Serves a well-formed range of a competing fork.
    Forked,
}

/// A transport that answers requests on behalf of simulated peers after a fixed latency.
///
/// Peers without a configured behavior are honest.
#[derive(Clone)]
pub struct Network<E: Clock + Spawner + Metrics> {
    context: E,
    mailbox: Mailbox<u64, Block>,
    latency: Duration,
    behaviors: Arc<Mutex<HashMap<u64, Behavior>>>,
    requests: Arc<Mutex<Vec<Request<u64>>>>,
}

impl<E: Clock + Spawner + Metrics> Network<E> {
    /// Creates a network delivering answers to `mailbox` after `latency`.
    pub fn new(context: E, mailbox: Mailbox<u64, Block>, latency: Duration) -> Self {
        Self {
            context,
            mailbox,
            latency,
            behaviors: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Changes how `peer` answers subsequent requests.
    pub fn set_behavior(&self, peer: u64, behavior: Behavior) {
        self.behaviors.lock().unwrap().insert(peer, behavior);
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Request<u64>> {
        self.requests.lock().unwrap().clone()
    }
}

impl<E: Clock + Spawner + Metrics> crate::Requester for Network<E> {
    type PublicKey = u64;

    async fn request(&mut self, request: Request<u64>) {
        self.requests.lock().unwrap().push(request.clone());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&request.peer)
            .copied()
            .unwrap_or(Behavior::Honest);
        let blocks = match behavior {
            Behavior::Honest => Block::range(request.start, request.count),
            Behavior::Silent => return,
            Behavior::Empty => Vec::new(),
            Behavior::Truncated => Block::range(request.start, request.count - 1),
            Behavior::Forked => Block::forked_range(request.start, request.count),
        };
        let response = Response {
            id: request.id,
            start: request.start,
            peer: request.peer,
            blocks,
        };

        // Answer in the background so the caller never waits on the peer
        let latency = self.latency;
        let mut mailbox = self.mailbox.clone();
        self.context
            .with_label("peer")
            .spawn(move |context| async move {
                context.sleep(latency).await;
                mailbox.deliver(response).await;
            });
    }
}
