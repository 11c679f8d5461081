//! SimWorld - The simulation harness container.
//!
//! Wires the whole stream together on one virtual clock:
//!
//! ```text
//! Oracle ──status batches──▶ SimLink ──▶ ChannelFeed ──▶ StreamClient
//!   ▲                        (faults)                        │
//!   │ ground truth                                   SharedTimeline
//!   └──────────── compare ◀──── DisplayClock ◀── query ──────┘
//! ```

use crate::context::SimContext;
use crate::exporter::UnitSample;
use crate::layout::LoopLayout;
use crate::network::{LinkFaults, SimLink};
use crate::oracle::{Oracle, OracleConfig};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use trackview_core::{
    resolve_units, ClientConfig, DisplayClock, FeedEvent, SceneDescription, SharedTimeline,
    Snapshot, SpaceError, StreamClient, TimelineConfig, TimelineError, TrackGraph,
};
use trackview_env::{ChannelFeed, EnvError};

/// Errors that abort a simulation run.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Feed: {0}")]
    Env(#[from] EnvError),

    #[error("Timeline: {0}")]
    Timeline(#[from] TimelineError),

    #[error("Space: {0}")]
    Space(#[from] SpaceError),
}

/// Configuration for a simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Number of robots on the loop
    pub robots: usize,

    /// Simulated duration in seconds
    pub duration_s: f64,

    /// Display rate in Hz
    pub display_fps: u32,

    /// Status batch rate in Hz
    pub status_hz: u32,

    /// Plant integration rate in Hz
    pub physics_hz: u32,

    /// Mean robot speed in m/s
    pub speed_mps: f64,

    /// Frame buffer cap
    pub max_frames: usize,

    pub layout: LoopLayout,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            robots: 4,
            duration_s: 30.0,
            display_fps: 60,
            status_hz: 10,
            physics_hz: 200,
            speed_mps: 2.0,
            max_frames: 4096,
            layout: LoopLayout::default(),
        }
    }
}

impl SimConfig {
    pub fn physics_dt(&self) -> f64 {
        1.0 / self.physics_hz.max(1) as f64
    }

    pub fn status_interval(&self) -> f64 {
        1.0 / self.status_hz.max(1) as f64
    }

    pub fn frame_interval(&self) -> f64 {
        1.0 / self.display_fps.max(1) as f64
    }
}

/// The SimWorld - container for the entire simulated stream.
pub struct SimWorld {
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Ground truth plant
    pub oracle: Oracle,

    /// Faulty link between oracle and client
    pub link: SimLink,

    pub client: StreamClient<SimContext, ChannelFeed<FeedEvent>>,

    pub clock: DisplayClock,

    scene: SceneDescription,
    connected: bool,
    next_status: f64,
    next_frame: f64,
    frames_rendered: u64,
}

impl SimWorld {
    /// Builds the world; nothing is sent until `connect`.
    pub fn new(config: SimConfig, faults: LinkFaults, mention_every: u32) -> Self {
        let context = SimContext::shared(config.seed);
        let scene = config.layout.scene();
        let graph = Arc::new(TrackGraph::from_scene(&scene));

        let oracle = Oracle::new(
            graph,
            config.layout.route(),
            OracleConfig {
                robots: config.robots,
                speed_mps: config.speed_mps,
                mention_every,
                ..Default::default()
            },
            context.rng_for(1),
        );

        let feed = Arc::new(ChannelFeed::new(1 << 16));
        let link = SimLink::new(feed.clone(), faults, context.rng_for(2));

        let client = StreamClient::new(
            context.clone(),
            feed,
            ClientConfig {
                name: format!("sim-{}", config.seed),
                timeline: TimelineConfig::with_max_frames(config.max_frames),
                display_fps: config.display_fps,
            },
        );

        Self {
            config,
            context,
            oracle,
            link,
            client,
            clock: DisplayClock::new(0.0),
            scene,
            connected: false,
            next_status: 0.0,
            next_frame: 0.0,
            frames_rendered: 0,
        }
    }

    pub fn time(&self) -> f64 {
        self.oracle.time()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn timeline(&self) -> SharedTimeline {
        self.client.timeline()
    }

    /// Opens the connection: the server greets with the scene and then
    /// streams full records again.
    pub fn connect(&mut self) {
        let now = self.time();
        debug!(now, "server accepting connection");
        self.oracle.restart_stream();
        self.link.feed().restart_sequence();
        self.link.send(FeedEvent::Connected, now);
        self.link.send(FeedEvent::Scene(self.scene.clone()), now);
        self.connected = true;
        self.next_status = now;
    }

    /// Drops the connection; in-flight messages are lost.
    pub fn disconnect(&mut self) {
        let now = self.time();
        self.link.disconnect(now);
        self.link.send(FeedEvent::Disconnected, now);
        self.connected = false;
    }

    /// Server-side pause toggle.
    pub fn set_paused(&mut self, paused: bool) {
        let now = self.time();
        self.link.send(FeedEvent::Paused(paused), now);
    }

    /// Advances one plant tick. Returns the display frame if one was due.
    pub fn step(&mut self) -> Result<Option<Arc<Snapshot>>, SimError> {
        let dt = self.config.physics_dt();
        self.oracle.step(dt);
        self.context.advance_to_secs(self.oracle.time());
        let now = self.time();

        if self.connected && now >= self.next_status {
            let batch = self.oracle.status_batch();
            self.link.send(FeedEvent::Status(batch), now);
            self.next_status += self.config.status_interval();
        }

        self.link.deliver_due(now)?;
        while let Some(delivery) = self.link.feed().try_recv()? {
            self.client.handle(delivery);
        }

        if now < self.next_frame {
            return Ok(None);
        }
        self.next_frame += self.config.frame_interval();
        self.frames_rendered += 1;

        let timeline = self.timeline();
        self.clock.set_paused(self.client.is_paused());
        let frame = self.clock.advance(self.config.frame_interval(), &timeline)?;
        self.oracle.forget_before(self.clock.time() - 1.0);
        Ok(frame)
    }

    /// Compares the displayed poses of `snapshot` with ground truth at the
    /// display time. Units unknown to either side are skipped.
    pub fn measure(&self, snapshot: &Snapshot) -> Result<Vec<UnitSample>, SimError> {
        let Some(graph) = self.timeline().graph() else {
            return Ok(Vec::new());
        };
        let shown = resolve_units(&graph, snapshot)?;
        let truth: HashMap<_, _> = self.oracle.truth_at(self.clock.time())?.into_iter().collect();

        Ok(shown
            .iter()
            .filter_map(|(id, pose)| truth.get(id).map(|t| UnitSample::new(*id, pose, t)))
            .collect())
    }
}
