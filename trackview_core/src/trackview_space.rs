//! The "SPACE" Engine - Track Graph and Position Resolver
//!
//! Turns abstract graph positions `(segment, percent)` into metric world
//! coordinates. The graph is built once from a scene description and is
//! immutable afterwards:
//! - Line segments interpolate linearly between their endpoint nodes
//! - Arc segments sweep around a center, the sweep flag choosing between
//!   the minor and the major arc joining the same two endpoints

use crate::ids::{DockId, NodeId, SegmentId, StationId};
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::{FRAC_PI_2, PI, TAU};
use thiserror::Error;
use tracing::debug;

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised by the space engine.
///
/// Lookup failures are caller contract violations: ids must be validated
/// against the constructed graph before resolution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpaceError {
    #[error("Unknown segment: {0}")]
    UnknownSegment(SegmentId),

    #[error("Unknown dock: {0}")]
    UnknownDock(DockId),

    #[error("Invalid scene description: {0}")]
    InvalidScene(String),
}

impl From<serde_json::Error> for SpaceError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidScene(e.to_string())
    }
}

// ============================================================================
// SCENE DESCRIPTION (Input)
// ============================================================================

/// Which of the two arcs joining an arc segment's endpoints is travelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcSweep {
    /// The shorter arc (angular span at most π)
    #[default]
    Minor,
    /// The longer arc (2π minus the minor span, travelled the other way round)
    Major,
}

/// A junction point of the track network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackNode {
    pub id: NodeId,
    /// World position [x, y, z] in meters
    pub position: [f64; 3],
}

/// Raw segment entry as it appears in the scene description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSpec {
    pub id: SegmentId,

    /// Segment kind, matched case-insensitively: "line" or "arc"
    #[serde(alias = "type")]
    pub kind: String,

    /// Node at percent 0
    pub start: NodeId,

    /// Node at percent 1
    pub end: NodeId,

    /// Declared travel length in meters (derived from geometry when not positive)
    #[serde(default)]
    pub length: f64,

    /// Arc radius in meters (derived from the center when not positive)
    #[serde(default)]
    pub radius: f64,

    /// Arc center [x, y, z]; required for arcs
    #[serde(default)]
    pub center: Option<[f64; 3]>,

    /// Arc sweep selection
    #[serde(default)]
    pub direction: ArcSweep,
}

impl TrackSpec {
    /// Creates a line segment spec.
    pub fn line(id: u32, start: u32, end: u32) -> Self {
        Self {
            id: SegmentId(id),
            kind: "line".to_string(),
            start: NodeId(start),
            end: NodeId(end),
            length: 0.0,
            radius: 0.0,
            center: None,
            direction: ArcSweep::Minor,
        }
    }

    /// Creates an arc segment spec.
    pub fn arc(id: u32, start: u32, end: u32, center: [f64; 3], radius: f64, direction: ArcSweep) -> Self {
        Self {
            id: SegmentId(id),
            kind: "arc".to_string(),
            start: NodeId(start),
            end: NodeId(end),
            length: 0.0,
            radius,
            center: Some(center),
            direction,
        }
    }

    /// Overrides the declared travel length.
    pub fn with_length(mut self, length: f64) -> Self {
        self.length = length;
        self
    }
}

/// A processing station's physical placement (rendering metadata).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSpec {
    pub id: StationId,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type")]
    pub kind: String,
    #[serde(default)]
    pub position: [f64; 3],
    /// Yaw in degrees
    #[serde(default)]
    pub rotation_deg: f64,
    #[serde(default)]
    pub model: String,
}

/// A point on the track, as `(track, percent)`, used by docks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackPosition {
    pub track: SegmentId,
    pub percent: f64,
}

/// A docking spot where units pick from / place onto a station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockSpec {
    pub id: DockId,
    #[serde(default, alias = "type")]
    pub kind: String,
    /// Station served by this dock
    pub device: StationId,
    pub position: TrackPosition,
}

/// Static scene description: nodes, segments, devices and docks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<TrackNode>,
    #[serde(default)]
    pub tracks: Vec<TrackSpec>,
    #[serde(default)]
    pub devices: Vec<DeviceSpec>,
    #[serde(default, alias = "stations")]
    pub docks: Vec<DockSpec>,
}

impl SceneDescription {
    /// Parses a scene description from JSON.
    pub fn from_json(json: &str) -> Result<Self, SpaceError> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// GRAPH POSITION
// ============================================================================

/// Location along a specific segment.
///
/// Percent 0 is the segment's declared start node, 1 its end node.
/// Decoding goes through `GraphPosition::new`, so wire values are clamped too.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "WirePosition")]
pub struct GraphPosition {
    pub segment: SegmentId,
    pub percent: f64,
}

#[derive(Deserialize)]
struct WirePosition {
    segment: SegmentId,
    percent: f64,
}

impl From<WirePosition> for GraphPosition {
    fn from(wire: WirePosition) -> Self {
        Self::new(wire.segment, wire.percent)
    }
}

impl GraphPosition {
    /// Creates a position, clamping `percent` into [0, 1].
    pub fn new(segment: SegmentId, percent: f64) -> Self {
        let percent = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 1.0) };
        Self { segment, percent }
    }
}

/// Resolved world pose.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPose {
    /// World position in meters
    pub position: Point3<f64>,
    /// Planar heading in radians
    pub heading: f64,
}

impl WorldPose {
    pub fn x(&self) -> f64 {
        self.position.x
    }

    pub fn y(&self) -> f64 {
        self.position.y
    }

    pub fn z(&self) -> f64 {
        self.position.z
    }

    /// Euclidean distance to another pose.
    pub fn distance_to(&self, other: &WorldPose) -> f64 {
        nalgebra::distance(&self.position, &other.position)
    }
}

// ============================================================================
// SEGMENTS
// ============================================================================

/// Geometry of a resolved segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentGeometry {
    Line {
        start: Point3<f64>,
        end: Point3<f64>,
    },
    Arc {
        start: Point3<f64>,
        end: Point3<f64>,
        center: Point3<f64>,
        radius: f64,
        /// Planar angle of `start` around `center`
        start_angle: f64,
        /// Signed angular travel from `start_angle` at percent 1
        sweep: f64,
    },
}

/// A segment whose endpoints resolved at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    pub geometry: SegmentGeometry,
    /// Travel length in meters
    pub length: f64,
}

impl Segment {
    /// Resolves a percent along this segment into a world pose.
    pub fn pose_at(&self, percent: f64) -> WorldPose {
        match &self.geometry {
            SegmentGeometry::Line { start, end } => {
                let delta: Vector3<f64> = end - start;
                WorldPose {
                    position: start + delta * percent,
                    heading: delta.y.atan2(delta.x),
                }
            }
            SegmentGeometry::Arc {
                start,
                end,
                center,
                radius,
                start_angle,
                sweep,
            } => {
                let theta = start_angle + sweep * percent;
                WorldPose {
                    position: Point3::new(
                        center.x + radius * theta.cos(),
                        center.y + radius * theta.sin(),
                        start.z + (end.z - start.z) * percent,
                    ),
                    heading: theta + FRAC_PI_2,
                }
            }
        }
    }
}

/// Signed angular travel from `theta_s` to `theta_e` (both in (-π, π]).
///
/// The four branches pick the minor arc: a raw difference beyond π is
/// taken through the ±π wraparound instead. `ArcSweep::Major` then goes
/// the other way round for the remaining `2π - |minor|`.
pub fn arc_sweep(theta_s: f64, theta_e: f64, direction: ArcSweep) -> f64 {
    let minor = if theta_s > theta_e && theta_s - theta_e > PI {
        theta_e + TAU - theta_s
    } else if theta_s > theta_e {
        -(theta_s - theta_e)
    } else if theta_e > theta_s && theta_e - theta_s > PI {
        -(theta_s + TAU - theta_e)
    } else {
        theta_e - theta_s
    };

    match direction {
        ArcSweep::Minor => minor,
        ArcSweep::Major if minor >= 0.0 => minor - TAU,
        ArcSweep::Major => minor + TAU,
    }
}

// ============================================================================
// TRACK GRAPH
// ============================================================================

/// A docking spot whose track resolved at construction time.
#[derive(Debug, Clone, PartialEq)]
pub struct Dock {
    pub id: DockId,
    pub station: StationId,
    pub position: GraphPosition,
}

/// The static track network.
///
/// Segments whose endpoints (or arc center) do not resolve are dropped
/// at construction; callers must tolerate a graph smaller than its input.
#[derive(Debug, Clone, Default)]
pub struct TrackGraph {
    /// Scene name (for logging)
    pub name: String,

    segments: HashMap<SegmentId, Segment>,
    docks: HashMap<DockId, Dock>,
    devices: HashMap<StationId, DeviceSpec>,

    dropped_segments: Vec<SegmentId>,
    dropped_docks: Vec<DockId>,
}

impl TrackGraph {
    /// Builds the graph from a node table and a segment table.
    pub fn build(nodes: &[TrackNode], tracks: &[TrackSpec]) -> Self {
        let points: HashMap<NodeId, Point3<f64>> = nodes
            .iter()
            .map(|n| (n.id, Point3::from(n.position)))
            .collect();

        let mut graph = TrackGraph::default();

        for spec in tracks {
            match resolve_segment(spec, &points) {
                Some(segment) => {
                    graph.segments.insert(segment.id, segment);
                }
                None => {
                    debug!(segment = %spec.id, kind = %spec.kind, "dropping unresolved segment");
                    graph.dropped_segments.push(spec.id);
                }
            }
        }

        graph
    }

    /// Builds the graph, device table and docks from a full scene.
    pub fn from_scene(scene: &SceneDescription) -> Self {
        let mut graph = Self::build(&scene.nodes, &scene.tracks);
        graph.name = scene.name.clone();

        graph.devices = scene.devices.iter().map(|d| (d.id, d.clone())).collect();

        for spec in &scene.docks {
            if graph.segments.contains_key(&spec.position.track) {
                let dock = Dock {
                    id: spec.id,
                    station: spec.device,
                    position: GraphPosition::new(spec.position.track, spec.position.percent),
                };
                graph.docks.insert(dock.id, dock);
            } else {
                debug!(dock = %spec.id, track = %spec.position.track, "dropping dock on unknown track");
                graph.dropped_docks.push(spec.id);
            }
        }

        graph
    }

    /// Resolves a graph position into world coordinates and heading.
    pub fn resolve(&self, position: &GraphPosition) -> Result<WorldPose, SpaceError> {
        let segment = self.segment(position.segment)?;
        Ok(segment.pose_at(position.percent))
    }

    /// Looks up a segment.
    pub fn segment(&self, id: SegmentId) -> Result<&Segment, SpaceError> {
        self.segments.get(&id).ok_or(SpaceError::UnknownSegment(id))
    }

    /// Travel length of a segment in meters.
    pub fn segment_length(&self, id: SegmentId) -> Result<f64, SpaceError> {
        Ok(self.segment(id)?.length)
    }

    /// World pose of a docking spot.
    pub fn dock_pose(&self, id: DockId) -> Result<WorldPose, SpaceError> {
        let dock = self.docks.get(&id).ok_or(SpaceError::UnknownDock(id))?;
        self.resolve(&dock.position)
    }

    /// Docks serving a station.
    pub fn docks_for(&self, station: StationId) -> impl Iterator<Item = &Dock> {
        self.docks.values().filter(move |d| d.station == station)
    }

    /// Docks located on a segment.
    pub fn docks_on(&self, segment: SegmentId) -> impl Iterator<Item = &Dock> {
        self.docks.values().filter(move |d| d.position.segment == segment)
    }

    pub fn dock(&self, id: DockId) -> Option<&Dock> {
        self.docks.get(&id)
    }

    pub fn device(&self, id: StationId) -> Option<&DeviceSpec> {
        self.devices.get(&id)
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segment ids excluded at construction.
    pub fn dropped_segments(&self) -> &[SegmentId] {
        &self.dropped_segments
    }

    /// Dock ids excluded at construction.
    pub fn dropped_docks(&self) -> &[DockId] {
        &self.dropped_docks
    }

    /// Total travel length of the network.
    pub fn total_length(&self) -> f64 {
        self.segments.values().map(|s| s.length).sum()
    }
}

fn resolve_segment(spec: &TrackSpec, points: &HashMap<NodeId, Point3<f64>>) -> Option<Segment> {
    let start = *points.get(&spec.start)?;
    let end = *points.get(&spec.end)?;

    let (geometry, geometric_length) = match spec.kind.to_ascii_lowercase().as_str() {
        "line" => (SegmentGeometry::Line { start, end }, nalgebra::distance(&start, &end)),
        "arc" => {
            let center = Point3::from(spec.center?);
            let radius = if spec.radius > 0.0 {
                spec.radius
            } else {
                (start.x - center.x).hypot(start.y - center.y)
            };
            let start_angle = (start.y - center.y).atan2(start.x - center.x);
            let end_angle = (end.y - center.y).atan2(end.x - center.x);
            let sweep = arc_sweep(start_angle, end_angle, spec.direction);
            let planar = radius * sweep.abs();
            let length = planar.hypot(end.z - start.z);
            (
                SegmentGeometry::Arc {
                    start,
                    end,
                    center,
                    radius,
                    start_angle,
                    sweep,
                },
                length,
            )
        }
        _ => return None,
    };

    let length = if spec.length > 0.0 { spec.length } else { geometric_length };

    Some(Segment {
        id: spec.id,
        geometry,
        length,
    })
}
