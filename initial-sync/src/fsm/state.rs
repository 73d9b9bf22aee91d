use std::fmt;

/// State of a single range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum State {
    /// Created, not yet requested from any peer.
    New,
    /// Requested from a peer, waiting for the response.
    Scheduled,
    /// A valid response was received and the blocks are held.
    DataParsed,
    /// The peer failed (timeout, empty or malformed response). Will be re-scheduled.
    Skipped,
    /// The blocks were handed to the chain.
    Sent,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::New => "new",
            State::Scheduled => "scheduled",
            State::DataParsed => "dataParsed",
            State::Skipped => "skipped",
            State::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// Event applied to a range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Event {
    /// Periodic housekeeping.
    Tick,
    /// The assigned peer answered.
    DataReceived,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::Tick => "tick",
            Event::DataReceived => "dataReceived",
        };
        f.write_str(name)
    }
}
