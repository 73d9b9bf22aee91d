use super::{Batch, Event, Scheduler, State};
use crate::{Block, Error, Peer, Response};
use std::{collections::HashMap, fmt, time::Duration};
use tracing::{debug, trace};

/// Payload of an event. The variant determines the [Event] it is dispatched as.
#[derive(Clone, Debug)]
pub enum Input<P, B> {
    /// Periodic housekeeping.
    Tick,
    /// A peer answered a request.
    Data(Response<P, B>),
}

impl<P, B> Input<P, B> {
    /// Event this input is dispatched as.
    pub fn event(&self) -> Event {
        match self {
            Input::Tick => Event::Tick,
            Input::Data(_) => Event::DataReceived,
        }
    }
}

/// Handles an event for a machine and returns the state to commit.
pub type Handler<P, B> =
    fn(&mut Batch<P, B>, &mut Scheduler<P>, Input<P, B>) -> Result<State, Error>;

/// Registry of handlers keyed by `(State, Event)`.
pub struct Transitions<P: Peer, B: Block> {
    handlers: HashMap<(State, Event), Handler<P, B>>,
}

impl<P: Peer, B: Block> Transitions<P, B> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Creates the table used by initial sync.
    pub fn standard() -> Self {
        let mut transitions = Self::new();
        let entries: [(State, Event, Handler<P, B>); 6] = [
            (State::New, Event::Tick, on_tick_schedule),
            (State::Skipped, Event::Tick, on_tick_schedule),
            (State::Scheduled, Event::Tick, on_tick_scheduled),
            (State::DataParsed, Event::Tick, on_tick_ignore),
            (State::Sent, Event::Tick, on_tick_ignore),
            (State::Scheduled, Event::DataReceived, on_data_received),
        ];
        for (state, event, handler) in entries {
            transitions
                .register(state, event, handler)
                .expect("standard transitions are unique");
        }
        transitions
    }

    /// Registers a handler for `event` in `state`.
    ///
    /// Fails if a handler is already registered for the pair.
    pub fn register(
        &mut self,
        state: State,
        event: Event,
        handler: Handler<P, B>,
    ) -> Result<(), Error> {
        if self.handlers.contains_key(&(state, event)) {
            return Err(Error::DuplicateHandler { state, event });
        }
        self.handlers.insert((state, event), handler);
        Ok(())
    }

    /// Returns the handler for `event` in `state`, if any.
    pub fn get(&self, state: State, event: Event) -> Option<Handler<P, B>> {
        self.handlers.get(&(state, event)).copied()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<P: Peer, B: Block> Default for Transitions<P, B> {
    fn default() -> Self {
        Self::standard()
    }
}

impl<P: Peer, B: Block> fmt::Debug for Transitions<P, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.handlers.keys().collect();
        pairs.sort();
        f.debug_list().entries(pairs).finish()
    }
}

/// Requests the range from an eligible peer (`New` and `Skipped`).
fn on_tick_schedule<P: Peer, B: Block>(
    batch: &mut Batch<P, B>,
    scheduler: &mut Scheduler<P>,
    _: Input<P, B>,
) -> Result<State, Error> {
    let Some(peer) = scheduler.select(batch.start(), batch.count(), batch.failed()) else {
        return Err(Error::NoPeers(batch.start()));
    };
    let id = scheduler.schedule(peer.clone(), batch.start(), batch.count());
    trace!(start = batch.start(), ?peer, id, "scheduled");
    batch.assign(peer, id);
    Ok(State::Scheduled)
}

/// Skips the range if the assigned peer did not answer in time.
fn on_tick_scheduled<P: Peer, B: Block>(
    batch: &mut Batch<P, B>,
    scheduler: &mut Scheduler<P>,
    _: Input<P, B>,
) -> Result<State, Error> {
    let elapsed = scheduler
        .now()
        .duration_since(batch.updated())
        .unwrap_or(Duration::ZERO);
    if elapsed <= scheduler.timeout() {
        return Ok(State::Scheduled);
    }
    debug!(start = batch.start(), peer = ?batch.peer(), ?elapsed, "request timed out");
    batch.fail();
    Ok(State::Skipped)
}

fn on_tick_ignore<P: Peer, B: Block>(
    batch: &mut Batch<P, B>,
    _: &mut Scheduler<P>,
    _: Input<P, B>,
) -> Result<State, Error> {
    Ok(batch.state())
}

/// Accepts the blocks if they are exactly the requested range.
fn on_data_received<P: Peer, B: Block>(
    batch: &mut Batch<P, B>,
    _: &mut Scheduler<P>,
    input: Input<P, B>,
) -> Result<State, Error> {
    let Input::Data(response) = input else {
        return Err(Error::UnhandledTransition {
            start: batch.start(),
            state: batch.state(),
            event: Event::Tick,
        });
    };

    // Responses must answer the outstanding request
    if batch.request() != Some(response.id) || batch.peer() != Some(&response.peer) {
        return Err(Error::StaleResponse {
            start: batch.start(),
            id: response.id,
        });
    }

    if let Err(reason) = validate(batch.start(), batch.count(), &response.blocks) {
        debug!(start = batch.start(), peer = ?response.peer, reason, "invalid response");
        batch.fail();
        return Ok(State::Skipped);
    }
    batch.fill(response.blocks);
    Ok(State::DataParsed)
}

/// Checks that `blocks` are `count` linked blocks starting at `start`.
fn validate<B: Block>(start: u64, count: u64, blocks: &[B]) -> Result<(), &'static str> {
    if blocks.is_empty() {
        return Err("empty");
    }
    if blocks.len() as u64 != count {
        return Err("wrong length");
    }
    for (i, block) in blocks.iter().enumerate() {
        if block.number() != start + i as u64 {
            return Err("not contiguous");
        }
        if i > 0 && block.parent() != blocks[i - 1].digest() {
            return Err("broken parent link");
        }
    }
    Ok(())
}
