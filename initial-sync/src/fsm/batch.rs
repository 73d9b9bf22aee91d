use super::{Input, Scheduler, State, Transitions};
use crate::{Block, Error, Peer};
use std::{collections::HashSet, fmt, time::SystemTime};

/// A contiguous range of blocks and the state machine driving its retrieval.
pub struct Batch<P: Peer, B: Block> {
    start: u64,
    count: u64,
    state: State,
    peer: Option<P>,
    request: Option<u64>,
    blocks: Vec<B>,
    updated: SystemTime,
    failed: HashSet<P>,
    attempts: u32,
}

impl<P: Peer, B: Block> Batch<P, B> {
    pub(crate) fn new(start: u64, count: u64, now: SystemTime) -> Self {
        Self {
            start,
            count,
            state: State::New,
            peer: None,
            request: None,
            blocks: Vec::new(),
            updated: now,
            failed: HashSet::new(),
            attempts: 0,
        }
    }

    /// First block of the range.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Number of blocks in the range.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Last block of the range (inclusive).
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.count - 1)
    }

    /// Current state of the machine.
    pub fn state(&self) -> State {
        self.state
    }

    /// Peer the range was last requested from.
    pub fn peer(&self) -> Option<&P> {
        self.peer.as_ref()
    }

    /// Identifier of the outstanding request, if any.
    pub fn request(&self) -> Option<u64> {
        self.request
    }

    /// Blocks held once the range is parsed.
    pub fn blocks(&self) -> &[B] {
        &self.blocks
    }

    /// Time of the last state change.
    pub fn updated(&self) -> SystemTime {
        self.updated
    }

    /// Peers that timed out or served invalid data for this range.
    pub fn failed(&self) -> &HashSet<P> {
        &self.failed
    }

    /// Number of requests issued for this range.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Applies an event to the machine.
    ///
    /// The handler registered for the current state and the event carried by `input` is invoked
    /// and, if it succeeds, its resulting state is committed. On error the state is unchanged.
    pub fn trigger(
        &mut self,
        transitions: &Transitions<P, B>,
        scheduler: &mut Scheduler<P>,
        input: Input<P, B>,
    ) -> Result<State, Error> {
        let event = input.event();
        let handler = transitions
            .get(self.state, event)
            .ok_or(Error::UnhandledTransition {
                start: self.start,
                state: self.state,
                event,
            })?;
        let next = handler(self, scheduler, input)?;
        self.set_state(next, scheduler.now());
        Ok(next)
    }

    /// Commits a new state. The update time only moves when the state changes.
    pub(crate) fn set_state(&mut self, state: State, now: SystemTime) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.updated = now;
    }

    /// Records a request sent to `peer`.
    pub(crate) fn assign(&mut self, peer: P, request: u64) {
        self.peer = Some(peer);
        self.request = Some(request);
        self.attempts = self.attempts.saturating_add(1);
    }

    /// Marks the assigned peer as failed and forgets the outstanding request.
    pub(crate) fn fail(&mut self) {
        if let Some(peer) = &self.peer {
            self.failed.insert(peer.clone());
        }
        self.request = None;
    }

    /// Treats `peers` as failed, so they are only asked when no other peer can serve the range.
    pub(crate) fn exclude(&mut self, peers: impl IntoIterator<Item = P>) {
        self.failed.extend(peers);
    }

    /// Stores validated blocks and forgets the outstanding request.
    pub(crate) fn fill(&mut self, blocks: Vec<B>) {
        self.blocks = blocks;
        self.request = None;
    }

    /// Moves the blocks out of the machine.
    pub(crate) fn take_blocks(&mut self) -> Vec<B> {
        std::mem::take(&mut self.blocks)
    }

    /// Drops the blocks (and their allocation).
    pub(crate) fn release(&mut self) {
        self.blocks = Vec::new();
    }
}

impl<P: Peer, B: Block> fmt::Display for Batch<P, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}:{}}}", self.start, self.state)
    }
}

impl<P: Peer, B: Block> fmt::Debug for Batch<P, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("start", &self.start)
            .field("count", &self.count)
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("request", &self.request)
            .field("blocks", &self.blocks.len())
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mocks::Block as MockBlock, fsm::Event, Response};
    use std::time::{Duration, UNIX_EPOCH};

    type TestBatch = Batch<u64, MockBlock>;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_display() {
        let batch = TestBatch::new(100, 3, at(0));
        assert_eq!(batch.to_string(), "{100:new}");
        assert_eq!(batch.end(), 102);
    }

    #[test]
    fn test_set_state_only_refreshes_on_change() {
        let mut batch = TestBatch::new(1, 1, at(0));
        batch.set_state(State::New, at(5));
        assert_eq!(batch.updated(), at(0));
        batch.set_state(State::Scheduled, at(7));
        assert_eq!(batch.state(), State::Scheduled);
        assert_eq!(batch.updated(), at(7));
    }

    #[test]
    fn test_unhandled_transition_leaves_state() {
        let transitions = Transitions::new();
        let mut scheduler = Scheduler::new(Duration::from_secs(1));
        scheduler.set_now(at(3));
        let mut batch = TestBatch::new(10, 2, at(0));

        let err = batch
            .trigger(&transitions, &mut scheduler, Input::Tick)
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnhandledTransition {
                start: 10,
                state: State::New,
                event: Event::Tick,
            }
        );
        assert_eq!(batch.state(), State::New);
        assert_eq!(batch.updated(), at(0));
    }

    #[test]
    fn test_handler_error_leaves_state() {
        let transitions = Transitions::standard();
        let mut scheduler = Scheduler::new(Duration::from_secs(1));
        let mut batch = TestBatch::new(10, 2, at(0));

        // No peers known yet
        let err = batch
            .trigger(&transitions, &mut scheduler, Input::Tick)
            .unwrap_err();
        assert_eq!(err, Error::NoPeers(10));
        assert_eq!(batch.state(), State::New);

        // A response for a machine that was never scheduled is unhandled
        let response = Response {
            id: 0,
            start: 10,
            peer: 1u64,
            blocks: MockBlock::range(10, 2),
        };
        let err = batch
            .trigger(&transitions, &mut scheduler, Input::Data(response))
            .unwrap_err();
        assert!(matches!(err, Error::UnhandledTransition { .. }));
        assert!(batch.blocks().is_empty());
    }

    #[test]
    fn test_take_blocks_transfers_ownership() {
        let mut batch = TestBatch::new(5, 2, at(0));
        batch.fill(MockBlock::range(5, 2));
        assert_eq!(batch.blocks().len(), 2);

        let blocks = batch.take_blocks();
        assert_eq!(blocks.len(), 2);
        assert!(batch.blocks().is_empty());
    }
}
