//! Demo track layouts for simulation.
//!
//! The default layout is a rounded rectangle driven counter-clockwise:
//!
//! ```text
//!        6 ──────── seg 5 ──────── 5
//!      ╱ seg 6                seg 4 ╲
//!     7                               4
//!     │ seg 7 (down)        seg 3 (up)│
//!     8                               3
//!      ╲ seg 8                seg 2 ╱
//!        1 ──────── seg 1 ──────── 2
//! ```
//!
//! The right side climbs to `lift` meters and the left side comes back
//! down, so positions carry a z component. The last corner (8 → 1) crosses
//! the ±π angle seam.

use serde::{Deserialize, Serialize};
use trackview_core::trackview_space::{DeviceSpec, DockSpec, TrackPosition};
use trackview_core::{ArcSweep, DockId, NodeId, SceneDescription, SegmentId, StationId, TrackNode, TrackSpec};

/// Parameters of the rounded-rectangle loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopLayout {
    /// Outer width in meters
    pub width: f64,
    /// Outer height in meters
    pub height: f64,
    /// Corner arc radius in meters
    pub corner_radius: f64,
    /// Height of the upper half of the loop
    pub lift: f64,
}

impl Default for LoopLayout {
    fn default() -> Self {
        Self {
            width: 24.0,
            height: 12.0,
            corner_radius: 3.0,
            lift: 1.5,
        }
    }
}

impl LoopLayout {
    /// Segment ids in travel order; the route wraps around.
    pub fn route(&self) -> Vec<SegmentId> {
        (1..=8).map(SegmentId).collect()
    }

    pub fn scene(&self) -> SceneDescription {
        let (w, h, r, z) = (self.width, self.height, self.corner_radius, self.lift);

        let node = |id: u32, x: f64, y: f64, z: f64| TrackNode {
            id: NodeId(id),
            position: [x, y, z],
        };
        let nodes = vec![
            node(1, r, 0.0, 0.0),
            node(2, w - r, 0.0, 0.0),
            node(3, w, r, 0.0),
            node(4, w, h - r, z),
            node(5, w - r, h, z),
            node(6, r, h, z),
            node(7, 0.0, h - r, z),
            node(8, 0.0, r, 0.0),
        ];

        let tracks = vec![
            TrackSpec::line(1, 1, 2),
            TrackSpec::arc(2, 2, 3, [w - r, r, 0.0], r, ArcSweep::Minor),
            TrackSpec::line(3, 3, 4),
            TrackSpec::arc(4, 4, 5, [w - r, h - r, z], r, ArcSweep::Minor),
            TrackSpec::line(5, 5, 6),
            TrackSpec::arc(6, 6, 7, [r, h - r, z], r, ArcSweep::Minor),
            TrackSpec::line(7, 7, 8),
            TrackSpec::arc(8, 8, 1, [r, r, 0.0], r, ArcSweep::Minor),
        ];

        let straights = [
            (1u32, [w / 2.0, -1.5, 0.0], 0.0),
            (3, [w + 1.5, h / 2.0, z / 2.0], 90.0),
            (5, [w / 2.0, h + 1.5, z], 180.0),
            (7, [-1.5, h / 2.0, z / 2.0], 270.0),
        ];

        let devices = straights
            .iter()
            .enumerate()
            .map(|(i, (_, position, rotation))| DeviceSpec {
                id: StationId(i as u32 + 1),
                name: format!("station-{}", i + 1),
                kind: "process".to_string(),
                position: *position,
                rotation_deg: *rotation,
                model: "tool".to_string(),
            })
            .collect();

        let docks = straights
            .iter()
            .enumerate()
            .map(|(i, (segment, _, _))| DockSpec {
                id: DockId(i as u32 + 1),
                kind: "port".to_string(),
                device: StationId(i as u32 + 1),
                position: TrackPosition {
                    track: SegmentId(*segment),
                    percent: 0.5,
                },
            })
            .collect();

        SceneDescription {
            name: "demo-loop".to_string(),
            version: "1".to_string(),
            nodes,
            tracks,
            devices,
            docks,
        }
    }
}
