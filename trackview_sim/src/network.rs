//! Simulated status link with fault injection.
//!
//! Sits between the oracle (server side) and a `ChannelFeed` (client side).
//! Every message gets a delivery time; status batches may additionally be
//! delayed by jitter, held back (reordered), duplicated or lost. Control
//! messages are never lost and nothing crosses them in either direction,
//! like frames on a single socket.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, trace};
use trackview_core::FeedEvent;
use trackview_env::{ChannelFeed, EnvError, FeedController};

/// Fault profile of a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkFaults {
    /// Base one-way latency in seconds
    pub latency_s: f64,
    /// Maximum extra random delay in seconds
    pub jitter_s: f64,
    /// Probability that a status batch is delivered twice
    pub duplicate_rate: f64,
    /// Probability that a status batch is held back behind later ones
    pub reorder_rate: f64,
    /// Probability that a status batch is lost
    pub loss_rate: f64,
}

impl Default for LinkFaults {
    fn default() -> Self {
        Self {
            latency_s: 0.05,
            jitter_s: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            loss_rate: 0.0,
        }
    }
}

/// Delivery counters of a link.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
    pub duplicated: u64,
    pub reordered: u64,
    /// In-flight messages discarded by a disconnect
    pub cut: u64,
}

#[derive(Debug)]
struct InFlight {
    deliver_at: f64,
    sequence: u64,
    event: FeedEvent,
}

/// A deterministic, faulty link feeding a `ChannelFeed`.
pub struct SimLink {
    faults: Mutex<LinkFaults>,
    rng: ChaCha8Rng,
    feed: Arc<ChannelFeed<FeedEvent>>,
    in_flight: Vec<InFlight>,
    next_sequence: u64,
    /// Nothing sent later may arrive before this time
    barrier: f64,
    stats: LinkStats,
}

impl SimLink {
    pub fn new(feed: Arc<ChannelFeed<FeedEvent>>, faults: LinkFaults, rng: ChaCha8Rng) -> Self {
        Self {
            faults: Mutex::new(faults),
            rng,
            feed,
            in_flight: Vec::new(),
            next_sequence: 0,
            barrier: 0.0,
            stats: LinkStats::default(),
        }
    }

    pub fn feed(&self) -> &Arc<ChannelFeed<FeedEvent>> {
        &self.feed
    }

    pub fn faults(&self) -> LinkFaults {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn enqueue(&mut self, deliver_at: f64, event: FeedEvent) {
        self.in_flight.push(InFlight {
            deliver_at,
            sequence: self.next_sequence,
            event,
        });
        self.next_sequence += 1;
    }

    fn jitter(&mut self, jitter_s: f64) -> f64 {
        if jitter_s <= 0.0 {
            return 0.0;
        }
        match Normal::new(0.0, jitter_s / 2.0) {
            Ok(normal) => normal.sample(&mut self.rng).abs().min(jitter_s),
            Err(_) => 0.0,
        }
    }

    /// Puts `event` on the wire at server time `now`.
    pub fn send(&mut self, event: FeedEvent, now: f64) {
        self.stats.sent += 1;
        let faults = self.faults();
        let base = (now + faults.latency_s).max(self.barrier);

        if !matches!(event, FeedEvent::Status(_)) {
            let settled = self.in_flight.iter().map(|m| m.deliver_at).fold(base, f64::max);
            self.barrier = settled;
            self.enqueue(settled, event);
            return;
        }

        if self.rng.gen_bool(faults.loss_rate.clamp(0.0, 1.0)) {
            trace!(now, "link lost status batch");
            self.stats.lost += 1;
            return;
        }

        let mut deliver_at = base + self.jitter(faults.jitter_s);
        if self.rng.gen_bool(faults.reorder_rate.clamp(0.0, 1.0)) {
            deliver_at += self.rng.gen_range(0.05..0.25);
            self.stats.reordered += 1;
        }

        if self.rng.gen_bool(faults.duplicate_rate.clamp(0.0, 1.0)) {
            let echo = deliver_at + self.rng.gen_range(0.0..0.05);
            self.enqueue(echo, event.clone());
            self.stats.duplicated += 1;
        }
        self.enqueue(deliver_at, event);
    }

    /// Hands every message due by `now` to the feed, in delivery order.
    pub fn deliver_due(&mut self, now: f64) -> Result<usize, EnvError> {
        self.in_flight.sort_by(|a, b| {
            a.deliver_at
                .total_cmp(&b.deliver_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        let due = self.in_flight.partition_point(|m| m.deliver_at <= now);
        if due == 0 {
            return Ok(0);
        }

        let sender = self.feed.sender().ok_or(EnvError::FeedClosed)?;
        for message in self.in_flight.drain(..due) {
            sender
                .try_send(message.event)
                .map_err(|e| EnvError::feed(e.to_string()))?;
            self.stats.delivered += 1;
        }
        Ok(due)
    }

    /// Drops the connection: everything in flight is lost.
    pub fn disconnect(&mut self, now: f64) {
        let cut = self.in_flight.len() as u64;
        debug!(now, cut, "link disconnected");
        self.stats.cut += cut;
        self.in_flight.clear();
        self.barrier = now;
    }
}

impl FeedController for SimLink {
    fn set_latency(&self, latency_ms: u64) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).latency_s = latency_ms as f64 / 1000.0;
    }

    fn set_jitter(&self, jitter_ms: u64) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).jitter_s = jitter_ms as f64 / 1000.0;
    }

    fn set_duplicate_rate(&self, rate: f64) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).duplicate_rate = rate.clamp(0.0, 1.0);
    }

    fn set_loss(&self, rate: f64) {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner).loss_rate = rate.clamp(0.0, 1.0);
    }
}
