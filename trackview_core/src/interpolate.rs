//! Per-field interpolation between two bracketing snapshots.
//!
//! Continuous quantities are blended linearly, positions follow the track
//! graph (including the hop from one segment to the next), and everything
//! discrete is a step function holding the lower bracket's value.

use crate::trackview_space::{GraphPosition, TrackGraph};
use crate::trackview_state::{
    Carrier, Collection, Job, Snapshot, SparseRecord, Station, TransportUnit,
};
use std::collections::BTreeMap;

/// Blends two accumulated records of the same entity.
pub trait Interpolate: SparseRecord {
    /// `proportion` is in `[0, 1]`, 0 meaning `self`.
    fn interpolate(&self, upper: &Self, proportion: f64, graph: &TrackGraph) -> Self;
}

#[inline]
pub fn lerp(a: f64, b: f64, proportion: f64) -> f64 {
    a + (b - a) * proportion
}

/// Lerps only when both brackets know the value; otherwise holds the lower one.
fn lerp_known(lower: Option<f64>, upper: Option<f64>, proportion: f64) -> Option<f64> {
    match (lower, upper) {
        (Some(a), Some(b)) => Some(lerp(a, b, proportion)),
        (lower, _) => lower,
    }
}

/// Moves along the graph from `lower` toward `upper`.
///
/// On one segment the percent is blended directly. Across segments the unit
/// is assumed to run off the end of `lower`'s segment and straight onto the
/// start of `upper`'s: the travelled distance is split at the boundary.
/// When either segment is unknown the lower position is held.
pub fn interpolate_position(
    graph: &TrackGraph,
    lower: &GraphPosition,
    upper: &GraphPosition,
    proportion: f64,
) -> GraphPosition {
    if lower.segment == upper.segment {
        return GraphPosition::new(lower.segment, lerp(lower.percent, upper.percent, proportion));
    }

    let (Ok(lower_len), Ok(upper_len)) = (
        graph.segment_length(lower.segment),
        graph.segment_length(upper.segment),
    ) else {
        return *lower;
    };

    let remaining = lower_len * (1.0 - lower.percent);
    let covered = upper_len * upper.percent;
    let travelled = (remaining + covered) * proportion;

    if travelled < remaining {
        // remaining > 0 here, so lower_len > 0
        GraphPosition::new(lower.segment, lower.percent + travelled / lower_len)
    } else if upper_len > 0.0 {
        GraphPosition::new(upper.segment, (travelled - remaining) / upper_len)
    } else {
        *upper
    }
}

impl Interpolate for TransportUnit {
    fn interpolate(&self, upper: &Self, proportion: f64, graph: &TrackGraph) -> Self {
        let position = match (&self.position, &upper.position) {
            (Some(a), Some(b)) => Some(interpolate_position(graph, a, b, proportion)),
            (lower, _) => *lower,
        };

        TransportUnit {
            position,
            speed: lerp_known(self.speed, upper.speed, proportion),
            loading_remaining: lerp_known(
                self.loading_remaining,
                upper.loading_remaining,
                proportion,
            ),
            distance_to_goal: lerp_known(self.distance_to_goal, upper.distance_to_goal, proportion),
            time_to_goal: lerp_known(self.time_to_goal, upper.time_to_goal, proportion),
            ..self.clone()
        }
    }
}

impl Interpolate for Station {
    fn interpolate(&self, upper: &Self, proportion: f64, _graph: &TrackGraph) -> Self {
        Station {
            cycle_remaining: lerp_known(self.cycle_remaining, upper.cycle_remaining, proportion),
            ..self.clone()
        }
    }
}

impl Interpolate for Carrier {
    fn interpolate(&self, _upper: &Self, _proportion: f64, _graph: &TrackGraph) -> Self {
        self.clone()
    }
}

impl Interpolate for Job {
    fn interpolate(&self, _upper: &Self, _proportion: f64, _graph: &TrackGraph) -> Self {
        self.clone()
    }
}

/// Pairs records by id. An id present in only one bracket keeps that
/// bracket's record.
fn interpolate_collection<R: Interpolate>(
    lower: &Collection<R>,
    upper: &Collection<R>,
    proportion: f64,
    graph: &TrackGraph,
) -> Collection<R> {
    let mut blended: BTreeMap<R::Id, R> = BTreeMap::new();

    for record in lower.iter() {
        let value = match upper.get(&record.id()) {
            Some(other) => record.interpolate(other, proportion, graph),
            None => record.clone(),
        };
        blended.insert(record.id(), value);
    }
    for record in upper.iter() {
        blended.entry(record.id()).or_insert_with(|| record.clone());
    }

    blended.into_values().collect()
}

impl Snapshot {
    /// Synthesizes the state at `time` from the brackets `self` and `upper`.
    ///
    /// The result carries the query time as its timestamp.
    pub fn interpolate(
        &self,
        upper: &Snapshot,
        time: f64,
        proportion: f64,
        graph: &TrackGraph,
    ) -> Snapshot {
        let proportion = proportion.clamp(0.0, 1.0);
        Snapshot {
            timestamp: time,
            units: interpolate_collection(&self.units, &upper.units, proportion, graph),
            stations: interpolate_collection(&self.stations, &upper.stations, proportion, graph),
            carriers: interpolate_collection(&self.carriers, &upper.carriers, proportion, graph),
            jobs: interpolate_collection(&self.jobs, &upper.jobs, proportion, graph),
        }
    }
}
