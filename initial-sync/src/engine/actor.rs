use super::{
    ingress::{Mailbox, Message, Progress},
    metrics, Config,
};
use crate::{
    fsm::{Input, Manager, Scheduler, State, Transitions},
    Block, Chain, Coordinator, Error, Requester, Response,
};
use commonware_macros::select;
use commonware_runtime::{Clock, Handle, Metrics, Spawner};
use futures::{channel::mpsc, StreamExt};
use rand::{seq::SliceRandom, Rng};
use std::{
    collections::HashSet,
    time::{Duration, SystemTime},
};
use tracing::{debug, info, trace, warn};

/// Drives the state machines of initial sync.
///
/// It is responsible for:
/// - Keeping a window of ranges in flight past the chain head
/// - Ticking every range (scheduling requests and detecting timeouts)
/// - Feeding peer responses to the range they answer
/// - Handing parsed ranges to the chain in ascending order
///
/// The engine is the only owner of the [Manager], so every mutation of the set of ranges is
/// serialized through its loop.
pub struct Engine<E: Clock + Spawner + Metrics + Rng, C: Chain, D: Coordinator> {
    ////////////////////////////////////////
    // Interfaces
    ////////////////////////////////////////
    context: E,
    chain: C,
    coordinator: D,

    ////////////////////////////////////////
    // Configuration
    ////////////////////////////////////////
    batch_size: u64,
    lookahead: usize,
    tick_interval: Duration,

    ////////////////////////////////////////
    // State
    ////////////////////////////////////////
    manager: Manager<D::PublicKey, C::Block>,
    scheduler: Scheduler<D::PublicKey>,

    /// Height of the chain head, refreshed on every tick and hand-off.
    head: u64,

    /// Highest head advertised by a peer at the last tick.
    target: u64,

    /// Peers that served a range the chain refused.
    rejected: HashSet<D::PublicKey>,

    ////////////////////////////////////////
    // Messaging
    ////////////////////////////////////////
    mailbox: mpsc::Receiver<Message<D::PublicKey, C::Block>>,

    ////////////////////////////////////////
    // Metrics
    ////////////////////////////////////////
    metrics: metrics::Metrics,
}

impl<E: Clock + Spawner + Metrics + Rng, C: Chain, D: Coordinator> Engine<E, C, D> {
    /// Creates a new engine with the given context and configuration.
    /// Returns the engine and a mailbox for delivering responses to the engine.
    #[allow(clippy::type_complexity)]
    pub fn new(
        context: E,
        cfg: Config<C, D>,
    ) -> Result<(Self, Mailbox<D::PublicKey, C::Block>), Error> {
        cfg.validate()?;
        let (sender, receiver) = mpsc::channel(cfg.mailbox_size);
        let metrics = metrics::Metrics::init(context.clone());

        let engine = Self {
            context,
            chain: cfg.chain,
            coordinator: cfg.coordinator,
            batch_size: cfg.batch_size,
            lookahead: cfg.lookahead,
            tick_interval: cfg.tick_interval,
            manager: Manager::new(Transitions::standard()),
            scheduler: Scheduler::new(cfg.request_timeout),
            head: 0,
            target: 0,
            rejected: HashSet::new(),
            mailbox: receiver,
            metrics,
        };
        Ok((engine, Mailbox::new(sender)))
    }

    /// Starts the engine, sending requests through `requester`.
    ///
    /// The returned handle resolves to the chain head once it reaches the highest head
    /// advertised by peers.
    pub fn start<R: Requester<PublicKey = D::PublicKey>>(
        self,
        requester: R,
    ) -> Handle<Result<u64, Error>> {
        self.context.clone().spawn(|_| self.run(requester))
    }

    /// Inner run loop called by `start`.
    async fn run<R: Requester<PublicKey = D::PublicKey>>(
        mut self,
        mut requester: R,
    ) -> Result<u64, Error> {
        let mut next_tick = self.context.current();
        loop {
            select! {
                _ = self.context.sleep_until(next_tick) => {
                    next_tick = self.context.current() + self.tick_interval;
                    if self.tick(&mut requester).await? {
                        return Ok(self.head);
                    }
                },
                message = self.mailbox.next() => {
                    let Some(message) = message else {
                        debug!("mailbox closed");
                        return Err(Error::Closed);
                    };
                    match message {
                        Message::Deliver { response } => {
                            self.handle_response(response);
                        }
                        Message::Progress { responder } => {
                            let _ = responder.send(Progress {
                                head: self.head,
                                target: self.target,
                                machines: self.manager.len(),
                            });
                        }
                    }
                },
            }

            // Hand off whatever became ready
            self.handoff().await?;
            self.metrics.machines.set(self.manager.len() as i64);
        }
    }

    ////////////////////////////////////////
    // Ticking
    ////////////////////////////////////////

    /// Advances every range. Returns `true` once the chain caught up with its peers.
    async fn tick<R: Requester<PublicKey = D::PublicKey>>(
        &mut self,
        requester: &mut R,
    ) -> Result<bool, Error> {
        let now = self.context.current();
        self.head = self.chain.head().await;
        let mut peers = self.coordinator.peers();
        peers.shuffle(&mut self.context);
        self.target = peers
            .iter()
            .map(|(_, head)| *head)
            .max()
            .unwrap_or(self.head)
            .max(self.head);
        self.metrics.head.set(self.head as i64);
        self.metrics.target.set(self.target as i64);

        if !peers.is_empty() && self.manager.is_empty() && self.head >= self.target {
            info!(head = self.head, "synced");
            return Ok(true);
        }

        self.prune()?;
        self.extend(now)?;

        // Tick every range, lowest first
        self.scheduler.refresh(now, peers);
        let starts: Vec<u64> = self.manager.starts().collect();
        for start in starts {
            let previous = self.manager.find(start).map(|batch| batch.state());
            match self.manager.trigger(start, &mut self.scheduler, Input::Tick) {
                Ok(State::Skipped) if previous == Some(State::Scheduled) => {
                    warn!(start, "request timed out");
                    self.metrics.timeouts.inc();
                }
                Ok(_) => {}
                Err(err) => debug!(start, ?err, "tick not applied"),
            }
        }
        if self.manager.all_in_state(State::Skipped) {
            warn!(machines = self.manager.len(), "every range in flight was skipped");
            self.metrics.stalls.inc();
        }

        // Send the requests issued this round
        for request in self.scheduler.drain() {
            debug!(
                id = request.id,
                start = request.start,
                count = request.count,
                peer = ?request.peer,
                "requesting range"
            );
            self.metrics.requests.inc();
            requester.request(request).await;
        }
        Ok(false)
    }

    /// Removes ranges the chain already holds, and idle ranges that no peer advertises anymore.
    fn prune(&mut self) -> Result<(), Error> {
        let head = self.head;
        let target = self.target;
        let stale: Vec<u64> = self
            .manager
            .iter()
            .filter(|batch| batch.end() <= head)
            .map(|batch| batch.start())
            .collect();
        for start in stale {
            self.manager.remove(start)?;
            debug!(start, head, "pruned range below head");
        }

        // Idle ranges past the target are re-created at their new size by `extend`
        let unreachable: Vec<u64> = self
            .manager
            .iter()
            .filter(|batch| matches!(batch.state(), State::New | State::Skipped))
            .filter(|batch| batch.end() > target)
            .map(|batch| batch.start())
            .collect();
        for start in unreachable {
            self.manager.remove(start)?;
            self.metrics.ranges_trimmed.inc();
            debug!(start, target, "trimmed range past target");
        }
        Ok(())
    }

    /// Adds ranges covering every gap between the head and the target, lowest first, until the
    /// window is full.
    fn extend(&mut self, now: SystemTime) -> Result<(), Error> {
        let existing: Vec<(u64, u64)> = self
            .manager
            .iter()
            .map(|batch| (batch.start(), batch.end()))
            .collect();
        let mut existing = existing.into_iter().peekable();
        let mut cursor = self.head.saturating_add(1);
        while self.manager.len() < self.lookahead && cursor <= self.target {
            // Step over ranges already covering the cursor
            if let Some(&(start, end)) = existing.peek() {
                if start <= cursor {
                    existing.next();
                    match end.checked_add(1) {
                        Some(next) => cursor = cursor.max(next),
                        None => break,
                    }
                    continue;
                }
            }

            let limit = existing
                .peek()
                .map(|(start, _)| start - 1)
                .unwrap_or(self.target)
                .min(self.target);
            let count = self.batch_size.min(limit - cursor + 1);
            self.manager.add(cursor, count, now)?;
            self.manager.exclude(cursor, self.rejected.iter().cloned())?;
            trace!(start = cursor, count, "added range");
            match cursor.checked_add(count) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(())
    }

    ////////////////////////////////////////
    // Handling
    ////////////////////////////////////////

    /// Feeds a response to the range it answers.
    fn handle_response(&mut self, response: Response<D::PublicKey, C::Block>) {
        let start = response.start;
        let id = response.id;
        let peer = response.peer.clone();
        self.scheduler.set_now(self.context.current());
        match self
            .manager
            .trigger(start, &mut self.scheduler, Input::Data(response))
        {
            Ok(State::DataParsed) => {
                debug!(start, id, ?peer, "range parsed");
                self.metrics.responses_valid.inc();
            }
            Ok(state) => {
                warn!(start, id, ?peer, %state, "invalid response");
                self.metrics.responses_invalid.inc();
            }
            Err(err) => {
                debug!(start, id, ?peer, ?err, "discarded response");
                self.metrics.responses_stale.inc();
            }
        }
    }

    /// Inserts parsed ranges into the chain, lowest first.
    ///
    /// Stops at the first range that is not parsed yet or that does not continue the head.
    async fn handoff(&mut self) -> Result<(), Error> {
        self.head = self.chain.head().await;
        loop {
            let Some(lowest) = self.manager.lowest_start() else {
                return Ok(());
            };
            if lowest > self.head.saturating_add(1) {
                // The next tick fills the gap
                return Ok(());
            }
            let Some((start, blocks)) = self.manager.take_ready() else {
                return Ok(());
            };

            // Drop blocks the chain received through another path
            let head = self.head;
            let blocks: Vec<C::Block> = blocks.into_iter().filter(|b| b.number() > head).collect();
            let now = self.context.current();
            if blocks.is_empty() {
                self.manager.complete(start, now)?;
                self.manager.remove(start)?;
                continue;
            }

            let count = blocks.len() as u64;
            match self.chain.insert(blocks).await {
                Ok(()) => {
                    self.manager.complete(start, now)?;
                    self.manager.remove(start)?;
                    self.head = self.chain.head().await;
                    self.metrics.blocks_inserted.inc_by(count);
                    self.metrics.head.set(self.head as i64);
                    debug!(start, count, head = self.head, "range inserted");
                }
                Err(rejection) => {
                    let peer = self.manager.remove(start)?.peer().cloned();
                    warn!(start, ?peer, %rejection, "range rejected");
                    self.metrics.ranges_rejected.inc();
                    self.chain.mark_bad(rejection.digest).await;

                    // Only this range is fetched again, avoiding the peer that served it
                    if let Some(peer) = peer {
                        self.rejected.insert(peer);
                    }
                }
            }
        }
    }
}
