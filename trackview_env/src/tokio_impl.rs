//! Production implementations backed by Tokio.

use crate::error::EnvError;
use crate::network::FeedTransport;
use crate::types::{Delivery, FeedStamp};
use crate::TrackViewContext;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc;

/// Production context backed by Tokio and the system clock.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,
}

impl TokioContext {
    /// Creates a new TokioContext.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TrackViewContext for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        tracing::trace!(task = name, "spawning task");
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

/// In-process feed backed by a bounded tokio channel.
///
/// Whatever task owns the real connection pushes decoded messages with
/// [`ChannelFeed::sender`] (or [`FeedTransport::send`]); the client
/// pulls them with [`FeedTransport::recv`]. The feed closes once
/// [`ChannelFeed::close`] has been called and every handed-out sender
/// is dropped.
pub struct ChannelFeed<M> {
    /// Producer handle, cloned out to connection tasks; `None` once closed
    tx: std::sync::Mutex<Option<mpsc::Sender<M>>>,

    /// Receiver for incoming messages (behind tokio mutex for async)
    rx: tokio::sync::Mutex<mpsc::Receiver<M>>,

    /// Messages handed out since creation or the last `restart_sequence`
    sequence: AtomicU64,

    /// Reference point for arrival stamps
    start: Instant,
}

impl<M: Send + 'static> ChannelFeed<M> {
    /// Creates a feed buffering at most `capacity` undelivered messages.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx: std::sync::Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
            sequence: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Returns a producer handle for a connection task, `None` once closed.
    pub fn sender(&self) -> Option<mpsc::Sender<M>> {
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Drops the feed's own producer handle.
    ///
    /// Messages already queued are still delivered; `recv` returns `None`
    /// after the last one once all other senders are gone too.
    pub fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    /// Restarts arrival numbering, called when the connection is re-established.
    pub fn restart_sequence(&self) {
        self.sequence.store(0, Ordering::Relaxed);
    }

    /// Non-blocking receive, for callers draining the feed once per frame.
    pub fn try_recv(&self) -> Result<Option<Delivery<M>>, EnvError> {
        let mut rx = match self.rx.try_lock() {
            Ok(rx) => rx,
            Err(_) => return Ok(None),
        };
        match rx.try_recv() {
            Ok(message) => Ok(Some(self.stamp(message))),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(EnvError::FeedClosed),
        }
    }

    fn stamp(&self, message: M) -> Delivery<M> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Delivery::new(message, FeedStamp::new(sequence, self.start.elapsed()))
    }
}

#[async_trait]
impl<M: Send + 'static> FeedTransport<M> for ChannelFeed<M> {
    async fn send(&self, message: M) -> Result<(), EnvError> {
        let tx = self.sender().ok_or(EnvError::FeedClosed)?;
        tx.send(message).await.map_err(|_| EnvError::FeedClosed)
    }

    async fn recv(&self) -> Option<Delivery<M>> {
        let mut rx = self.rx.lock().await;
        let message = rx.recv().await?;
        drop(rx);
        Some(self.stamp(message))
    }

    fn delivered(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[test]
    fn test_tokio_context_seed() {
        let ctx = TokioContext::new();
        assert_eq!(ctx.seed(), 0);
    }

    #[tokio::test]
    async fn test_channel_feed_preserves_order_and_stamps() {
        let feed: ChannelFeed<u32> = ChannelFeed::new(8);
        feed.send(1).await.unwrap();
        feed.send(2).await.unwrap();

        let first = feed.recv().await.unwrap();
        let second = feed.recv().await.unwrap();

        assert_eq!(first.message, 1);
        assert_eq!(second.message, 2);
        assert_eq!(first.stamp.sequence, 0);
        assert_eq!(second.stamp.sequence, 1);
        assert_eq!(feed.delivered(), 2);
    }

    #[tokio::test]
    async fn test_channel_feed_restart_sequence() {
        let feed: ChannelFeed<&'static str> = ChannelFeed::new(4);
        feed.send("a").await.unwrap();
        feed.recv().await.unwrap();

        feed.restart_sequence();
        feed.send("b").await.unwrap();
        let delivery = feed.recv().await.unwrap();
        assert_eq!(delivery.stamp.sequence, 0);
    }

    #[tokio::test]
    async fn test_channel_feed_close_drains_then_ends() {
        let feed: ChannelFeed<u8> = ChannelFeed::new(4);
        feed.send(1).await.unwrap();
        feed.close();

        assert!(feed.send(2).await.is_err());
        assert_eq!(feed.recv().await.map(Delivery::into_message), Some(1));
        assert!(feed.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_feed_try_recv_empty() {
        let feed: ChannelFeed<u8> = ChannelFeed::new(2);
        assert!(feed.try_recv().unwrap().is_none());

        feed.sender().unwrap().send(7).await.unwrap();
        let delivery = feed.try_recv().unwrap().unwrap();
        assert_eq!(delivery.into_message(), 7);
    }
}
