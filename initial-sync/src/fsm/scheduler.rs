use crate::{Peer, Request};
use std::{
    collections::HashSet,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Environment handed to transition handlers.
///
/// Holds the time of the current round of events, the peers that may be asked for data, and the
/// requests issued by handlers during the round (sent by the caller once the round is over).
pub struct Scheduler<P: Peer> {
    now: SystemTime,
    timeout: Duration,
    peers: Vec<(P, u64)>,
    next_id: u64,
    outbox: Vec<Request<P>>,
}

impl<P: Peer> Scheduler<P> {
    /// Creates a scheduler that considers a request failed after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            now: UNIX_EPOCH,
            timeout,
            peers: Vec::new(),
            next_id: 0,
            outbox: Vec::new(),
        }
    }

    /// Starts a new round at `now` with the given peers (and their advertised heads).
    pub fn refresh(&mut self, now: SystemTime, peers: Vec<(P, u64)>) {
        self.now = now;
        self.peers = peers;
    }

    /// Updates the time of the round without touching the peer set.
    pub fn set_now(&mut self, now: SystemTime) {
        self.now = now;
    }

    /// Time of the current round.
    pub fn now(&self) -> SystemTime {
        self.now
    }

    /// How long a peer has to answer a request.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Peers available in the current round.
    pub fn peers(&self) -> &[(P, u64)] {
        &self.peers
    }

    /// Picks a peer whose advertised head covers `[start, start + count)`.
    ///
    /// Peers in `failed` are only used when no other peer qualifies. Among the remaining
    /// candidates, the peer with the fewest requests issued this round wins (ties are broken by
    /// peer order, which the caller may shuffle).
    pub fn select(&self, start: u64, count: u64, failed: &HashSet<P>) -> Option<P> {
        let end = start.saturating_add(count.saturating_sub(1));
        let eligible: Vec<&P> = self
            .peers
            .iter()
            .filter(|(_, head)| *head >= end)
            .map(|(peer, _)| peer)
            .collect();
        let fresh: Vec<&P> = eligible
            .iter()
            .copied()
            .filter(|peer| !failed.contains(*peer))
            .collect();
        let candidates = if fresh.is_empty() { eligible } else { fresh };
        candidates
            .into_iter()
            .min_by_key(|peer| self.outbox.iter().filter(|r| &r.peer == *peer).count())
            .cloned()
    }

    /// Queues a request and returns its identifier.
    pub fn schedule(&mut self, peer: P, start: u64, count: u64) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.outbox.push(Request {
            id,
            start,
            count,
            peer,
        });
        id
    }

    /// Requests queued since the last drain.
    pub fn pending(&self) -> &[Request<P>] {
        &self.outbox
    }

    /// Removes and returns all queued requests.
    pub fn drain(&mut self) -> Vec<Request<P>> {
        std::mem::take(&mut self.outbox)
    }
}
