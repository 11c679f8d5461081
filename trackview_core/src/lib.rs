//! TrackView Core - Streaming State Reconstruction for Track Networks
//!
//! This library turns a sparse, delta-encoded, possibly out-of-order status
//! stream into a timeline that can be sampled at any display time:
//! 1. **Space**: track graph of lines and arcs, graph position → world pose
//! 2. **State**: sparse partial records folded into immutable snapshots
//! 3. **Time**: monotonic frame buffer with bracketing, interpolation and pruning

pub mod ids;
pub mod trackview_space;
pub mod trackview_state;
pub mod interpolate;
pub mod trackview_time;
pub mod metrics;
pub mod feed_runtime;

// Re-export key types for convenience
pub use ids::{CarrierId, DockId, JobId, NodeId, SegmentId, StationId, UnitId};
pub use trackview_space::{
    ArcSweep, GraphPosition, SceneDescription, SpaceError, TrackGraph, TrackNode, TrackSpec,
    WorldPose,
};
pub use trackview_state::{
    merge, Carrier, Job, JobState, Snapshot, SparseRecord, Station, TransportUnit,
    UnitWorkState, UpdateBatch,
};
pub use interpolate::{interpolate_position, Interpolate};
pub use trackview_time::{
    resolve_units, FrameBuffer, IngestOutcome, SharedTimeline, Timeline, TimelineConfig,
    TimelineError,
};
pub use metrics::StreamMetrics;
pub use feed_runtime::{ClientConfig, DisplayClock, FeedEvent, StreamClient};
