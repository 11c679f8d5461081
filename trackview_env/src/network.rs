//! Feed transport abstraction for TrackView clients.

use async_trait::async_trait;
use crate::error::EnvError;
use crate::types::Delivery;

/// Abstraction for the inbound message feed of a TrackView client.
///
/// The feed carries already-decoded messages; connection handling,
/// framing and decoding live behind it.
///
/// # Implementations
///
/// - **Production**: `ChannelFeed`, fed by whatever socket task owns the connection
/// - **Simulation**: `ChannelFeed` fed by a faulty in-memory link
///
/// # Message Flow
///
/// ```text
/// Server                     Feed                       Client
///   |                           |                          |
///   |-- status batch ---------->|                          |
///   |                           |-- [latency/jitter] ----->|
///   |                           |                          |-- recv() -> batch
/// ```
#[async_trait]
pub trait FeedTransport<M>: Send + Sync + 'static
where
    M: Send + 'static,
{
    /// Sends a message towards the client end of the feed.
    ///
    /// # Returns
    /// * `Ok(())` - Message queued for delivery
    /// * `Err(EnvError::FeedClosed)` - The receiving end is gone
    async fn send(&self, message: M) -> Result<(), EnvError>;

    /// Receives the next message.
    ///
    /// # Returns
    /// * `Some(delivery)` - A message arrived
    /// * `None` - The feed was closed (shutdown)
    ///
    /// # Blocking
    /// This method waits until a message arrives or the feed closes.
    async fn recv(&self) -> Option<Delivery<M>>;

    /// Number of messages handed out on the current connection.
    fn delivered(&self) -> u64;
}

/// Fault injection for simulated feeds.
pub trait FeedController: Send + Sync {
    /// Sets the base latency in milliseconds.
    fn set_latency(&self, latency_ms: u64);

    /// Sets the maximum extra random delay in milliseconds.
    fn set_jitter(&self, jitter_ms: u64);

    /// Sets the probability (0.0 - 1.0) that a message is delivered twice.
    fn set_duplicate_rate(&self, rate: f64);

    /// Sets the probability (0.0 - 1.0) that a message is lost.
    fn set_loss(&self, rate: f64);
}
