use crate::{Chain, Coordinator, Error};
use std::time::Duration;

/// Default maximum size of the mailbox backlog.
pub const DEFAULT_MAILBOX_SIZE: usize = 1024;

/// Default number of blocks requested at once.
pub const DEFAULT_BATCH_SIZE: u64 = 64;

/// Default number of ranges in flight.
pub const DEFAULT_LOOKAHEAD: usize = 8;

/// Default interval between ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Default time a peer has to answer a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the [`Engine`](super::Engine).
pub struct Config<C: Chain, D: Coordinator> {
    /// Chain blocks are inserted into.
    pub chain: C,

    /// Provides the peers ranges can be requested from.
    pub coordinator: D,

    /// The maximum size of the mailbox backlog.
    pub mailbox_size: usize,

    /// Number of blocks requested from a peer at once.
    pub batch_size: u64,

    /// Maximum number of ranges in flight (the sync window).
    pub lookahead: usize,

    /// Interval between ticks (scheduling and timeout detection).
    pub tick_interval: Duration,

    /// Time after which an unanswered request is considered failed.
    pub request_timeout: Duration,
}

impl<C: Chain, D: Coordinator> Config<C, D> {
    /// Creates a configuration with default tunables.
    pub fn new(chain: C, coordinator: D) -> Self {
        Self {
            chain,
            coordinator,
            mailbox_size: DEFAULT_MAILBOX_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            lookahead: DEFAULT_LOOKAHEAD,
            tick_interval: DEFAULT_TICK_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Checks that every tunable is usable.
    pub fn validate(&self) -> Result<(), Error> {
        if self.mailbox_size == 0 {
            return Err(Error::InvalidConfig("mailbox_size must be positive"));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive"));
        }
        if self.lookahead == 0 {
            return Err(Error::InvalidConfig("lookahead must be positive"));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::InvalidConfig("tick_interval must be positive"));
        }
        if self.request_timeout < self.tick_interval {
            return Err(Error::InvalidConfig(
                "request_timeout must not be shorter than tick_interval",
            ));
        }
        Ok(())
    }
}
