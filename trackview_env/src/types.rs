//! Common types for the TrackView environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Arrival stamp attached to every message a feed hands out.
///
/// The sequence number counts arrivals on one connection; it restarts
/// at zero whenever the feed reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeedStamp {
    /// Arrival order on the current connection
    pub sequence: u64,

    /// Context time at which the message was handed to the consumer
    pub arrived_at: Duration,
}

impl FeedStamp {
    /// Creates a new stamp.
    pub fn new(sequence: u64, arrived_at: Duration) -> Self {
        Self { sequence, arrived_at }
    }

    /// Arrival time in seconds.
    pub fn arrived_secs(&self) -> f64 {
        self.arrived_at.as_secs_f64()
    }
}

impl std::fmt::Display for FeedStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}@{:.3}s", self.sequence, self.arrived_secs())
    }
}

/// A message as delivered by a feed, together with its arrival stamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery<M> {
    /// The decoded message
    pub message: M,

    /// When and in which order it arrived
    pub stamp: FeedStamp,
}

impl<M> Delivery<M> {
    /// Creates a new delivery.
    pub fn new(message: M, stamp: FeedStamp) -> Self {
        Self { message, stamp }
    }

    /// Discards the stamp.
    pub fn into_message(self) -> M {
        self.message
    }
}
