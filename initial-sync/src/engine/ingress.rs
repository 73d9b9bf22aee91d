use crate::Response;
use futures::{
    channel::{mpsc, oneshot},
    SinkExt,
};
use tracing::debug;

/// Snapshot of sync progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Height of the chain head.
    pub head: u64,

    /// Highest head advertised by a peer.
    pub target: u64,

    /// Number of ranges in flight.
    pub machines: usize,
}

/// Message types that can be sent to the `Mailbox`
pub enum Message<P, B> {
    /// A peer answered a request.
    Deliver { response: Response<P, B> },

    /// Request the current progress.
    Progress { responder: oneshot::Sender<Progress> },
}

/// Ingress mailbox for [`Engine`](super::Engine).
#[derive(Clone)]
pub struct Mailbox<P, B> {
    sender: mpsc::Sender<Message<P, B>>,
}

impl<P, B> Mailbox<P, B> {
    pub(super) fn new(sender: mpsc::Sender<Message<P, B>>) -> Self {
        Self { sender }
    }

    /// Deliver a peer's response.
    ///
    /// Responses arriving after the engine stopped are dropped.
    pub async fn deliver(&mut self, response: Response<P, B>) {
        if self
            .sender
            .send(Message::Deliver { response })
            .await
            .is_err()
        {
            debug!("engine stopped, dropping response");
        }
    }

    /// Returns the current progress, or `None` if the engine stopped.
    pub async fn progress(&mut self) -> Option<Progress> {
        let (responder, receiver) = oneshot::channel();
        self.sender
            .send(Message::Progress { responder })
            .await
            .ok()?;
        receiver.await.ok()
    }
}
