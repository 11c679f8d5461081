//! TrackView Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the TrackView
//! stream client to run in both **Production** (tokio) and
//! **Simulation** (virtual clock) environments.
//!
//! # Core Concept: The Reactor Pattern
//!
//! For deterministic simulation testing, we intercept all I/O:
//! - Time (`now()`, `sleep()`)
//! - Inbound messages (`recv()`)
//!
//! The connection itself (reconnects, framing, decoding) sits behind
//! [`FeedTransport`]; the client only ever sees decoded messages, one at
//! a time, in arrival order.
//!
//! # Example
//!
//! ```ignore
//! use trackview_env::{TrackViewContext, FeedTransport};
//!
//! async fn client_loop<Ctx: TrackViewContext, Feed: FeedTransport<Msg>>(
//!     ctx: &Ctx,
//!     feed: &Feed,
//! ) {
//!     while let Some(delivery) = feed.recv().await {
//!         handle(delivery.message);
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;

pub use context::TrackViewContext;
pub use network::{FeedTransport, FeedController};
pub use types::{Delivery, FeedStamp};
pub use error::EnvError;
pub use tokio_impl::{ChannelFeed, TokioContext};
