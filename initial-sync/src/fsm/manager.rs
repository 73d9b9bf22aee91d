use super::{Batch, Input, Scheduler, State, Transitions};
use crate::{Block, Error, Peer};
use std::{collections::BTreeMap, fmt, time::SystemTime};

/// Collection of state machines keyed by the first block of their range.
///
/// Machines are stored in an ordered map, so the sorted index of starts is the key order itself
/// and is updated in the same step as every insertion or removal.
pub struct Manager<P: Peer, B: Block> {
    machines: BTreeMap<u64, Batch<P, B>>,
    transitions: Transitions<P, B>,
}

impl<P: Peer, B: Block> Manager<P, B> {
    /// Creates an empty manager dispatching events through `transitions`.
    pub fn new(transitions: Transitions<P, B>) -> Self {
        Self {
            machines: BTreeMap::new(),
            transitions,
        }
    }

    /// Adds a `New` machine for `count` blocks starting at `start`.
    ///
    /// Fails if a machine with the same start already exists.
    pub fn add(&mut self, start: u64, count: u64, now: SystemTime) -> Result<&Batch<P, B>, Error> {
        if count == 0 {
            return Err(Error::EmptyRange(start));
        }
        if self.machines.contains_key(&start) {
            return Err(Error::AlreadyExists(start));
        }
        let batch = self
            .machines
            .entry(start)
            .or_insert_with(|| Batch::new(start, count, now));
        Ok(&*batch)
    }

    /// Removes the machine for `start`, releasing its blocks.
    ///
    /// The removed machine is returned (without blocks) for inspection.
    pub fn remove(&mut self, start: u64) -> Result<Batch<P, B>, Error> {
        let mut batch = self.machines.remove(&start).ok_or(Error::NotFound(start))?;
        batch.release();
        Ok(batch)
    }

    /// Removes all machines in ascending order, stopping at the first failure.
    pub fn remove_all(&mut self) -> Result<(), Error> {
        let starts: Vec<u64> = self.starts().collect();
        for start in starts {
            self.remove(start)?;
        }
        Ok(())
    }

    /// Returns the machine for `start`, if any.
    pub fn find(&self, start: u64) -> Option<&Batch<P, B>> {
        self.machines.get(&start)
    }

    /// Start of the machine with the greatest start.
    pub fn highest_start(&self) -> Result<u64, Error> {
        self.machines
            .last_key_value()
            .map(|(start, _)| *start)
            .ok_or(Error::NoMachines)
    }

    /// Start of the machine with the smallest start.
    pub fn lowest_start(&self) -> Option<u64> {
        self.machines.first_key_value().map(|(start, _)| *start)
    }

    /// Returns true if there is at least one machine and all of them are in `state`.
    pub fn all_in_state(&self, state: State) -> bool {
        !self.machines.is_empty() && self.machines.values().all(|m| m.state() == state)
    }

    /// Returns true if `start` is the smallest start managed.
    pub fn is_first(&self, start: u64) -> bool {
        self.lowest_start() == Some(start)
    }

    /// Returns true if `start` is the greatest start managed.
    pub fn is_last(&self, start: u64) -> bool {
        self.highest_start().ok() == Some(start)
    }

    /// Applies an event to the machine for `start`.
    pub fn trigger(
        &mut self,
        start: u64,
        scheduler: &mut Scheduler<P>,
        input: Input<P, B>,
    ) -> Result<State, Error> {
        let batch = self.machines.get_mut(&start).ok_or(Error::NotFound(start))?;
        batch.trigger(&self.transitions, scheduler, input)
    }

    /// Treats `peers` as failed for the machine at `start`.
    pub fn exclude(
        &mut self,
        start: u64,
        peers: impl IntoIterator<Item = P>,
    ) -> Result<(), Error> {
        let batch = self.machines.get_mut(&start).ok_or(Error::NotFound(start))?;
        batch.exclude(peers);
        Ok(())
    }

    /// Moves the blocks out of the first machine if it has parsed its range.
    ///
    /// Machines after the first never qualify, even if parsed: ranges leave in ascending order.
    pub fn take_ready(&mut self) -> Option<(u64, Vec<B>)> {
        let (start, batch) = self.machines.first_key_value()?;
        if batch.state() != State::DataParsed {
            return None;
        }
        let start = *start;
        let batch = self.machines.get_mut(&start)?;
        Some((start, batch.take_blocks()))
    }

    /// Marks a parsed machine as handed to the chain.
    pub fn complete(&mut self, start: u64, now: SystemTime) -> Result<(), Error> {
        let batch = self.machines.get_mut(&start).ok_or(Error::NotFound(start))?;
        if batch.state() != State::DataParsed {
            return Err(Error::InvalidState {
                start,
                state: batch.state(),
                expected: State::DataParsed,
            });
        }
        batch.set_state(State::Sent, now);
        Ok(())
    }

    /// Starts of all machines, in ascending order.
    pub fn starts(&self) -> impl Iterator<Item = u64> + '_ {
        self.machines.keys().copied()
    }

    /// All machines, in ascending order of start.
    pub fn iter(&self) -> impl Iterator<Item = &Batch<P, B>> {
        self.machines.values()
    }

    /// Number of machines.
    pub fn len(&self) -> usize {
        self.machines.len()
    }

    /// Returns true if there are no machines.
    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }
}

impl<P: Peer, B: Block> Default for Manager<P, B> {
    fn default() -> Self {
        Self::new(Transitions::standard())
    }
}

impl<P: Peer, B: Block> fmt::Display for Manager<P, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (start, batch)) in self.machines.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{start}:{}", batch.state())?;
        }
        f.write_str("}")
    }
}
