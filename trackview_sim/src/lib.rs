//! TrackView Deterministic Simulation Harness
//!
//! Runs a complete status stream (plant, faulty link, client, display)
//! on a single virtual clock, so a display error can be replayed from
//! its seed.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: Virtual clock advanced in fixed plant ticks
//! - **Network**: Latency, jitter, reordering, duplication, loss, disconnects
//! - **Randomness**: All entropy derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  ┌──────────┐   status   ┌─────────┐   FeedEvent         │
//! │  │  Oracle  │──batches──►│ SimLink │──────────┐          │
//! │  │ (plant)  │            └─────────┘          ▼          │
//! │  └────▲─────┘                         ┌──────────────┐   │
//! │       │ ground truth                  │ StreamClient │   │
//! │       │                               │  + Timeline  │   │
//! │       └──── compare ◄── DisplayClock ◄┴──────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use trackview_sim::{ScenarioRunner, SimConfig};
//! use trackview_sim::scenarios::ScenarioId;
//!
//! let result = ScenarioRunner::new(SimConfig::default()).run(ScenarioId::Jitter);
//! assert!(result.passed);
//! ```

mod context;
mod exporter;
mod layout;
mod network;
mod oracle;
mod runner;
pub mod scenarios;
mod world;

pub use context::SimContext;
pub use exporter::{PoseSample, SimEvent, SimExport, SimFrame, UnitSample};
pub use layout::LoopLayout;
pub use network::{LinkFaults, LinkStats, SimLink};
pub use oracle::{Oracle, OracleConfig};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimError, SimWorld};
