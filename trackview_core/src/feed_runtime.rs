//! Feed Runtime - Drives the timeline from a live message feed.
//!
//! This module is the integration layer between the pure engines
//! (space, state, time) and the environment abstraction (TrackViewContext,
//! FeedTransport).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        StreamClient                           │
//! │                                                               │
//! │   FeedTransport ──recv()──▶ handle_event ──▶ SharedTimeline   │
//! │     SCENE   → install TrackGraph                    ▲         │
//! │     STATUS  → ingest (merge + append)               │         │
//! │     CONNECT → reset                                 │ query   │
//! │     PAUSE   → pause flag                            │         │
//! │                                              DisplayClock     │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trackview_core::feed_runtime::{StreamClient, ClientConfig, DisplayClock};
//! use trackview_env::{ChannelFeed, TokioContext};
//!
//! let client = StreamClient::new(TokioContext::shared(), feed, ClientConfig::default());
//! let timeline = client.timeline();
//! tokio::spawn(async move { client.run().await });
//!
//! let mut clock = DisplayClock::new(0.0);
//! let frame = clock.advance(1.0 / 60.0, &timeline)?;
//! ```

use crate::trackview_space::{SceneDescription, TrackGraph};
use crate::trackview_state::{Snapshot, UpdateBatch};
use crate::trackview_time::{IngestOutcome, SharedTimeline, TimelineConfig, TimelineError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace};
use trackview_env::{Delivery, EnvError, FeedTransport, TrackViewContext};

/// A decoded message from the status server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedEvent {
    /// The connection was (re-)established
    Connected,
    /// Static scene: track network, devices, docks
    Scene(SceneDescription),
    /// Sparse state update
    Status(UpdateBatch),
    /// Server-side simulation paused or resumed
    Paused(bool),
    /// The connection dropped; history is kept until the next `Connected`
    Disconnected,
}

impl FeedEvent {
    /// Decodes one wire message.
    pub fn from_json(text: &str) -> Result<Self, EnvError> {
        serde_json::from_str(text).map_err(EnvError::decode)
    }
}

/// Configuration for a stream client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client's logical name (for logging)
    pub name: String,

    /// Frame buffer settings
    pub timeline: TimelineConfig,

    /// Display rate in Hz (default: 60)
    pub display_fps: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: "trackview-client".to_string(),
            timeline: TimelineConfig::default(),
            display_fps: 60,
        }
    }
}

impl ClientConfig {
    /// Seconds between two display frames.
    pub fn frame_interval(&self) -> f64 {
        1.0 / self.display_fps.max(1) as f64
    }
}

/// Stream client: pumps feed events into a shared timeline.
///
/// Generic over the context and feed implementations, so the same client
/// runs against a live socket task (tokio) or a simulated faulty link.
pub struct StreamClient<Ctx, Feed>
where
    Ctx: TrackViewContext,
    Feed: FeedTransport<FeedEvent>,
{
    /// Environment context
    pub context: Arc<Ctx>,

    /// Inbound feed
    pub feed: Arc<Feed>,

    pub config: ClientConfig,

    timeline: SharedTimeline,
    paused: AtomicBool,
    connected: AtomicBool,
    events_handled: AtomicU64,
}

impl<Ctx, Feed> StreamClient<Ctx, Feed>
where
    Ctx: TrackViewContext,
    Feed: FeedTransport<FeedEvent>,
{
    pub fn new(context: Arc<Ctx>, feed: Arc<Feed>, config: ClientConfig) -> Self {
        let timeline = SharedTimeline::new(config.timeline.clone());
        Self {
            context,
            feed,
            config,
            timeline,
            paused: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            events_handled: AtomicU64::new(0),
        }
    }

    /// Handle to the timeline for the display side.
    pub fn timeline(&self) -> SharedTimeline {
        self.timeline.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn events_handled(&self) -> u64 {
        self.events_handled.load(Ordering::Relaxed)
    }

    /// Applies one event to the timeline.
    ///
    /// Returns the ingest outcome for status events.
    pub fn handle_event(&self, event: FeedEvent) -> Option<IngestOutcome> {
        self.events_handled.fetch_add(1, Ordering::Relaxed);

        match event {
            FeedEvent::Connected => {
                info!(client = %self.config.name, "feed connected, clearing history");
                self.connected.store(true, Ordering::Relaxed);
                self.timeline.reset();
                None
            }
            FeedEvent::Scene(scene) => {
                let graph = TrackGraph::from_scene(&scene);
                info!(
                    client = %self.config.name,
                    scene = %graph.name,
                    segments = graph.segment_count(),
                    dropped_segments = graph.dropped_segments().len(),
                    dropped_docks = graph.dropped_docks().len(),
                    "installing scene"
                );
                self.timeline.set_graph(Arc::new(graph));
                None
            }
            FeedEvent::Status(batch) => Some(self.timeline.ingest(&batch)),
            FeedEvent::Paused(paused) => {
                debug!(client = %self.config.name, paused, "pause state changed");
                self.paused.store(paused, Ordering::Relaxed);
                None
            }
            FeedEvent::Disconnected => {
                info!(client = %self.config.name, "feed disconnected");
                self.connected.store(false, Ordering::Relaxed);
                None
            }
        }
    }

    /// Handles a stamped delivery from the feed.
    pub fn handle(&self, delivery: Delivery<FeedEvent>) -> Option<IngestOutcome> {
        trace!(stamp = %delivery.stamp, "feed delivery");
        self.handle_event(delivery.into_message())
    }

    /// Drains the feed until it closes. Returns the number of events handled.
    pub async fn run(&self) -> u64 {
        let start = self.context.now();
        info!(
            client = %self.config.name,
            seed = self.context.seed(),
            wall_clock = ?self.context.system_time(),
            "stream client running"
        );
        let mut count = 0;
        while let Some(delivery) = self.feed.recv().await {
            self.handle(delivery);
            count += 1;
        }
        info!(
            client = %self.config.name,
            events = count,
            elapsed_s = (self.context.now() - start).as_secs_f64(),
            "feed closed"
        );
        count
    }
}

// ============================================================================
// DISPLAY CLOCK
// ============================================================================

/// Display-side time cursor.
///
/// Each frame queries the timeline at `time + dt` (or `time` while paused)
/// and then adopts the returned snapshot's timestamp. The cursor therefore
/// never runs ahead of the newest frame and snaps onto the stream after a
/// reconnect.
#[derive(Debug, Clone, Default)]
pub struct DisplayClock {
    time: f64,
    paused: bool,
    frames: u64,
}

impl DisplayClock {
    pub fn new(start: f64) -> Self {
        Self {
            time: start,
            paused: false,
            frames: 0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Advances by `dt` seconds and samples the timeline.
    pub fn advance(
        &mut self,
        dt: f64,
        timeline: &SharedTimeline,
    ) -> Result<Option<Arc<Snapshot>>, TimelineError> {
        let target = if self.paused { self.time } else { self.time + dt };
        let frame = timeline.query(target)?;
        if let Some(snapshot) = &frame {
            self.time = snapshot.timestamp;
        }
        self.frames += 1;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeId;
    use crate::trackview_space::{TrackNode, TrackSpec};
    use crate::trackview_state::TransportUnit;
    use approx::assert_relative_eq;
    use trackview_env::{ChannelFeed, TokioContext};

    fn scene() -> SceneDescription {
        SceneDescription {
            name: "strip".to_string(),
            nodes: vec![
                TrackNode { id: NodeId(1), position: [0.0, 0.0, 0.0] },
                TrackNode { id: NodeId(2), position: [10.0, 0.0, 0.0] },
            ],
            tracks: vec![TrackSpec::line(1, 1, 2), TrackSpec::line(2, 2, 99)],
            ..Default::default()
        }
    }

    fn status(t: f64, percent: f64) -> FeedEvent {
        FeedEvent::Status(
            UpdateBatch::at(t).with_unit(TransportUnit::new(1).with_position(1, percent)),
        )
    }

    fn client() -> StreamClient<TokioContext, ChannelFeed<FeedEvent>> {
        StreamClient::new(
            TokioContext::shared(),
            Arc::new(ChannelFeed::new(64)),
            ClientConfig::default(),
        )
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.display_fps, 60);
        assert_eq!(config.timeline.max_frames, 4096);
        assert_relative_eq!(config.frame_interval(), 1.0 / 60.0);
    }

    #[test]
    fn test_scene_installs_graph() {
        let client = client();
        client.handle_event(FeedEvent::Scene(scene()));

        let graph = client.timeline().graph().unwrap();
        assert_eq!(graph.segment_count(), 1);
        assert_eq!(graph.dropped_segments().len(), 1);
    }

    #[test]
    fn test_connected_clears_history() {
        let client = client();
        client.handle_event(status(1.0, 0.1));
        client.handle_event(status(2.0, 0.2));
        assert_eq!(client.timeline().len(), 2);

        client.handle_event(FeedEvent::Connected);
        assert!(client.timeline().is_empty());
        assert!(client.is_connected());

        // Stream time may restart lower after a reconnect
        assert_eq!(
            client.handle_event(status(0.5, 0.3)),
            Some(IngestOutcome::Appended)
        );
    }

    #[test]
    fn test_disconnect_keeps_history() {
        let client = client();
        client.handle_event(FeedEvent::Connected);
        client.handle_event(status(1.0, 0.1));
        client.handle_event(FeedEvent::Disconnected);

        assert!(!client.is_connected());
        assert_eq!(client.timeline().len(), 1);
    }

    #[test]
    fn test_pause_flag() {
        let client = client();
        client.handle_event(FeedEvent::Paused(true));
        assert!(client.is_paused());
        client.handle_event(FeedEvent::Paused(false));
        assert!(!client.is_paused());
    }

    #[test]
    fn test_feed_event_json_tagging() {
        let json = r#"{"type": "STATUS", "data": {"time": 1.5, "robots": [{"id": 3, "speed": 2.0}]}}"#;
        let event: FeedEvent = serde_json::from_str(json).unwrap();
        match event {
            FeedEvent::Status(batch) => {
                assert_eq!(batch.timestamp, 1.5);
                assert_eq!(batch.units[0].speed, Some(2.0));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let paused: FeedEvent = serde_json::from_str(r#"{"type": "PAUSED", "data": true}"#).unwrap();
        assert_eq!(paused, FeedEvent::Paused(true));
    }

    #[test]
    fn test_undecodable_message_is_a_decode_error() {
        let err = FeedEvent::from_json(r#"{"type": "TELEPORT"}"#).unwrap_err();
        assert!(matches!(err, EnvError::DecodeError(_)));
        assert!(FeedEvent::from_json("not json").is_err());
    }

    #[tokio::test]
    async fn test_run_drains_until_closed() {
        let client = client();
        let feed = client.feed.clone();

        feed.send(FeedEvent::Connected).await.unwrap();
        feed.send(FeedEvent::Scene(scene())).await.unwrap();
        for i in 0..5 {
            feed.send(status(i as f64, i as f64 * 0.2)).await.unwrap();
        }
        feed.close();

        let handled = client.run().await;
        assert_eq!(handled, 7);
        assert_eq!(client.timeline().len(), 5);
        assert_eq!(client.events_handled(), 7);
    }

    #[test]
    fn test_display_clock_follows_stream() {
        let client = client();
        client.handle_event(FeedEvent::Scene(scene()));
        let timeline = client.timeline();
        let mut clock = DisplayClock::new(0.0);

        // No data yet: clock does not move
        assert!(clock.advance(0.1, &timeline).unwrap().is_none());
        assert_eq!(clock.time(), 0.0);

        // Single frame: snap onto it
        client.handle_event(status(5.0, 0.0));
        let frame = clock.advance(0.1, &timeline).unwrap().unwrap();
        assert_eq!(frame.timestamp, 5.0);
        assert_eq!(clock.time(), 5.0);

        client.handle_event(status(6.0, 1.0));
        let frame = clock.advance(0.25, &timeline).unwrap().unwrap();
        assert_relative_eq!(clock.time(), 5.25);
        assert_relative_eq!(frame.unit(1).unwrap().position.unwrap().percent, 0.25);

        // Past the newest frame: hold at the edge
        clock.advance(10.0, &timeline).unwrap();
        assert_eq!(clock.time(), 6.0);
        assert_eq!(clock.frames(), 4);
    }

    #[test]
    fn test_display_clock_paused() {
        let client = client();
        client.handle_event(FeedEvent::Scene(scene()));
        client.handle_event(status(1.0, 0.0));
        client.handle_event(status(2.0, 1.0));
        let timeline = client.timeline();

        let mut clock = DisplayClock::new(1.5);
        clock.set_paused(true);
        clock.advance(0.3, &timeline).unwrap();
        assert_relative_eq!(clock.time(), 1.5);
    }
}
