//! The "TIME" Engine - Frame Buffer & Temporal Query
//!
//! Turns an irregular stream of update batches into a timeline that can be
//! sampled at any display time:
//! - Batches are accumulated into full snapshots and appended in strictly
//!   increasing timestamp order (duplicates and late arrivals are dropped)
//! - Queries locate the bracketing frames and interpolate between them
//! - Frames older than the lower bracket are pruned as the display advances
//!
//! Producer (ingest) and consumer (query) are decoupled: the display clock
//! never has to match arrival times.

use crate::ids::UnitId;
use crate::metrics::{QueryPath, StreamMetrics};
use crate::trackview_space::{SpaceError, TrackGraph, WorldPose};
use crate::trackview_state::{merge, Snapshot, UpdateBatch};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Errors raised by the timeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimelineError {
    #[error("Invalid query time: {0}")]
    InvalidQueryTime(f64),

    #[error(transparent)]
    Space(#[from] SpaceError),
}

/// Timeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Maximum frames retained when the consumer stops querying (minimum 2)
    pub max_frames: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self { max_frames: 4096 }
    }
}

impl TimelineConfig {
    pub fn with_max_frames(max_frames: usize) -> Self {
        Self {
            max_frames: max_frames.max(2),
        }
    }

    fn frame_cap(&self) -> usize {
        self.max_frames.max(2)
    }
}

/// What `ingest` did with a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IngestOutcome {
    /// Merged and appended as the newest frame
    Appended,
    /// Timestamp did not advance past the newest frame
    Stale { newest: f64 },
    /// Timestamp was negative or not finite
    Rejected,
}

// ============================================================================
// FRAME BUFFER
// ============================================================================

/// Ordered sequence of snapshots, strictly increasing by timestamp.
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    frames: VecDeque<Arc<Snapshot>>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `snapshot` if it is newer than the newest frame.
    ///
    /// Returns false (and leaves the buffer unchanged) otherwise.
    pub fn append(&mut self, snapshot: Arc<Snapshot>) -> bool {
        if let Some(newest) = self.frames.back() {
            if snapshot.timestamp <= newest.timestamp {
                return false;
            }
        }
        self.frames.push_back(snapshot);
        true
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Drops every frame strictly older than `time`. Returns how many.
    pub fn prune_before(&mut self, time: f64) -> usize {
        let count = self.frames.partition_point(|f| f.timestamp < time);
        self.frames.drain(..count);
        count
    }

    /// Drops the oldest frames until at most `cap` remain. Returns how many.
    pub fn evict_to(&mut self, cap: usize) -> usize {
        let excess = self.frames.len().saturating_sub(cap);
        self.frames.drain(..excess);
        excess
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn newest(&self) -> Option<&Arc<Snapshot>> {
        self.frames.back()
    }

    pub fn oldest(&self) -> Option<&Arc<Snapshot>> {
        self.frames.front()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Snapshot>> {
        self.frames.get(index)
    }

    /// Index of the first frame with `timestamp >= time` (len if none).
    pub fn first_at_or_after(&self, time: f64) -> usize {
        self.frames.partition_point(|f| f.timestamp < time)
    }

    pub fn timestamps(&self) -> impl Iterator<Item = f64> + '_ {
        self.frames.iter().map(|f| f.timestamp)
    }
}

// ============================================================================
// TIMELINE
// ============================================================================

/// Accumulator, frame buffer and query engine behind one explicit object.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    config: TimelineConfig,
    buffer: FrameBuffer,
    graph: Option<Arc<TrackGraph>>,
    stats: StreamMetrics,
}

impl Timeline {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_graph(mut self, graph: Arc<TrackGraph>) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Installs the track graph used for position interpolation.
    pub fn set_graph(&mut self, graph: Arc<TrackGraph>) {
        self.graph = Some(graph);
    }

    pub fn graph(&self) -> Option<&Arc<TrackGraph>> {
        self.graph.as_ref()
    }

    /// Accumulates `batch` on the newest frame and appends the result.
    pub fn ingest(&mut self, batch: &UpdateBatch) -> IngestOutcome {
        if !batch.timestamp.is_finite() || batch.timestamp < 0.0 {
            warn!(timestamp = batch.timestamp, "rejecting batch with invalid timestamp");
            self.stats.batches_rejected += 1;
            return IngestOutcome::Rejected;
        }

        if let Some(newest) = self.buffer.newest() {
            if batch.timestamp <= newest.timestamp {
                debug!(
                    timestamp = batch.timestamp,
                    newest = newest.timestamp,
                    "dropping stale batch"
                );
                self.stats.batches_stale += 1;
                return IngestOutcome::Stale {
                    newest: newest.timestamp,
                };
            }
        }

        let snapshot = merge(self.buffer.newest().map(|s| s.as_ref()), batch);
        trace!(
            timestamp = batch.timestamp,
            records = batch.record_count(),
            entities = snapshot.entity_count(),
            "batch appended"
        );
        let appended = self.buffer.append(Arc::new(snapshot));
        debug_assert!(appended, "stale check and buffer order disagree");
        self.stats.batches_appended += 1;

        let evicted = self.buffer.evict_to(self.config.frame_cap());
        if evicted > 0 {
            trace!(evicted, "frame buffer at capacity");
            self.stats.frames_evicted += evicted as u64;
        }

        IngestOutcome::Appended
    }

    /// Samples the timeline at `time`.
    ///
    /// `Ok(None)` means no data yet. Queries outside the buffered range hold
    /// the nearest edge frame; queries between frames interpolate and prune
    /// everything older than the lower bracket.
    pub fn query(&mut self, time: f64) -> Result<Option<Arc<Snapshot>>, TimelineError> {
        if !time.is_finite() {
            self.stats.record_query(QueryPath::Invalid);
            return Err(TimelineError::InvalidQueryTime(time));
        }

        let (path, snapshot) = self.lookup(time);
        self.stats.record_query(path);
        Ok(snapshot)
    }

    fn lookup(&mut self, time: f64) -> (QueryPath, Option<Arc<Snapshot>>) {
        match self.buffer.len() {
            0 => return (QueryPath::Empty, None),
            1 => return (QueryPath::Single, self.buffer.newest().cloned()),
            _ => {}
        }

        let upper_index = self.buffer.first_at_or_after(time);
        let Some(upper) = self.buffer.get(upper_index).cloned() else {
            return (QueryPath::EdgeHold, self.buffer.newest().cloned());
        };
        if upper.timestamp == time {
            return (QueryPath::Exact, Some(upper));
        }
        if upper_index == 0 {
            return (QueryPath::EdgeHold, Some(upper));
        }

        let Some(lower) = self.buffer.get(upper_index - 1).cloned() else {
            return (QueryPath::EdgeHold, Some(upper));
        };

        let pruned = self.buffer.prune_before(lower.timestamp);
        if pruned > 0 {
            trace!(pruned, before = lower.timestamp, "pruned consumed frames");
            self.stats.frames_pruned += pruned as u64;
        }

        let span = upper.timestamp - lower.timestamp;
        debug_assert!(span > 0.0, "bracketing frames share a timestamp");
        if span <= 0.0 {
            return (QueryPath::EdgeHold, Some(lower));
        }

        let Some(graph) = self.graph.as_ref() else {
            return (QueryPath::EdgeHold, Some(lower));
        };

        let proportion = (time - lower.timestamp) / span;
        let blended = lower.interpolate(&upper, time, proportion, graph);
        (QueryPath::Interpolated, Some(Arc::new(blended)))
    }

    /// Drops all buffered history (reconnect).
    pub fn reset(&mut self) {
        debug!(frames = self.buffer.len(), "timeline reset");
        self.buffer.clear();
        self.stats.resets += 1;
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.buffer.newest().cloned()
    }

    pub fn oldest_time(&self) -> Option<f64> {
        self.buffer.oldest().map(|s| s.timestamp)
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn stats(&self) -> &StreamMetrics {
        &self.stats
    }
}

/// Resolves every positioned unit of `snapshot` into world coordinates.
///
/// Units without a position are skipped. A position on a segment the graph
/// does not know is an error.
pub fn resolve_units(
    graph: &TrackGraph,
    snapshot: &Snapshot,
) -> Result<Vec<(UnitId, WorldPose)>, TimelineError> {
    snapshot
        .units
        .iter()
        .filter_map(|unit| unit.position.map(|p| (unit.id, p)))
        .map(|(id, position)| -> Result<_, TimelineError> {
            Ok((id, graph.resolve(&position)?))
        })
        .collect()
}

// ============================================================================
// SHARED TIMELINE
// ============================================================================

/// A `Timeline` shared between a producer task and a display task.
///
/// Ingest, the pruning inside query, and reset all run under one lock.
#[derive(Debug, Clone, Default)]
pub struct SharedTimeline {
    inner: Arc<Mutex<Timeline>>,
}

impl SharedTimeline {
    pub fn new(config: TimelineConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Timeline::new(config))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Timeline> {
        // A panic elsewhere cannot leave the buffer out of order: every
        // mutation is a single append, drain or clear.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn ingest(&self, batch: &UpdateBatch) -> IngestOutcome {
        self.lock().ingest(batch)
    }

    pub fn query(&self, time: f64) -> Result<Option<Arc<Snapshot>>, TimelineError> {
        self.lock().query(time)
    }

    pub fn reset(&self) {
        self.lock().reset()
    }

    pub fn set_graph(&self, graph: Arc<TrackGraph>) {
        self.lock().set_graph(graph)
    }

    pub fn graph(&self) -> Option<Arc<TrackGraph>> {
        self.lock().graph().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.lock().latest()
    }

    pub fn stats(&self) -> StreamMetrics {
        self.lock().stats().clone()
    }

    /// Runs `f` with the timeline locked.
    pub fn with<R>(&self, f: impl FnOnce(&mut Timeline) -> R) -> R {
        f(&mut self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CarrierId, NodeId, SegmentId};
    use crate::trackview_space::{GraphPosition, TrackNode, TrackSpec};
    use crate::trackview_state::{Carrier, Station, TransportUnit};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn line_graph() -> Arc<TrackGraph> {
        let nodes = vec![
            TrackNode { id: NodeId(1), position: [0.0, 0.0, 0.0] },
            TrackNode { id: NodeId(2), position: [10.0, 0.0, 0.0] },
            TrackNode { id: NodeId(3), position: [20.0, 0.0, 0.0] },
        ];
        let tracks = vec![TrackSpec::line(1, 1, 2), TrackSpec::line(2, 2, 3)];
        Arc::new(TrackGraph::build(&nodes, &tracks))
    }

    fn unit_at(t: f64, segment: u32, percent: f64, speed: f64) -> UpdateBatch {
        UpdateBatch::at(t).with_unit(
            TransportUnit::new(1)
                .with_position(segment, percent)
                .with_speed(speed),
        )
    }

    fn timeline() -> Timeline {
        Timeline::new(TimelineConfig::default()).with_graph(line_graph())
    }

    #[test]
    fn test_empty_buffer_returns_none() {
        let mut tl = timeline();
        assert_eq!(tl.query(0.0).unwrap(), None);
        assert_eq!(tl.query(-50.0).unwrap(), None);
        assert_eq!(tl.stats().queries_empty, 2);
    }

    #[test]
    fn test_single_frame_fallback() {
        let mut tl = timeline();
        tl.ingest(&unit_at(5.0, 1, 0.5, 1.0));

        for t in [-100.0, 0.0, 5.0, 1e6] {
            let snap = tl.query(t).unwrap().unwrap();
            assert_eq!(snap.timestamp, 5.0);
        }
        assert_eq!(tl.stats().queries_single, 4);
    }

    #[test]
    fn test_stale_and_duplicate_batches_dropped() {
        let mut tl = timeline();
        assert_eq!(tl.ingest(&unit_at(2.0, 1, 0.1, 1.0)), IngestOutcome::Appended);
        assert_eq!(
            tl.ingest(&unit_at(2.0, 1, 0.9, 1.0)),
            IngestOutcome::Stale { newest: 2.0 }
        );
        assert_eq!(
            tl.ingest(&unit_at(1.0, 1, 0.9, 1.0)),
            IngestOutcome::Stale { newest: 2.0 }
        );

        assert_eq!(tl.len(), 1);
        let snap = tl.latest().unwrap();
        assert_eq!(snap.unit(1).unwrap().position.unwrap().percent, 0.1);
        assert_eq!(tl.stats().batches_stale, 2);
    }

    #[test]
    fn test_invalid_timestamps_rejected() {
        let mut tl = timeline();
        assert_eq!(tl.ingest(&UpdateBatch::at(f64::NAN)), IngestOutcome::Rejected);
        assert_eq!(tl.ingest(&UpdateBatch::at(-1.0)), IngestOutcome::Rejected);
        assert_eq!(tl.ingest(&UpdateBatch::at(f64::INFINITY)), IngestOutcome::Rejected);
        assert!(tl.is_empty());
        assert_eq!(tl.stats().batches_rejected, 3);
    }

    #[test]
    fn test_invalid_query_time() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.0, 0.0));
        assert_eq!(
            tl.query(f64::INFINITY).map(|_| ()),
            Err(TimelineError::InvalidQueryTime(f64::INFINITY))
        );
        assert!(tl.query(f64::NAN).is_err());
    }

    #[test]
    fn test_exact_hit_returns_stored_frame() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.2, 1.0));
        tl.ingest(&unit_at(2.0, 1, 0.4, 3.0));
        tl.ingest(&unit_at(3.0, 1, 0.6, 5.0));

        let stored = tl.buffer().get(1).cloned().unwrap();
        let hit = tl.query(2.0).unwrap().unwrap();
        assert!(Arc::ptr_eq(&stored, &hit));
        assert_eq!(tl.len(), 3);
    }

    #[test]
    fn test_interpolates_between_brackets() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.2, 1.0));
        tl.ingest(&unit_at(2.0, 1, 0.6, 3.0));

        let snap = tl.query(1.25).unwrap().unwrap();
        let unit = snap.unit(1).unwrap();
        assert_eq!(snap.timestamp, 1.25);
        assert_relative_eq!(unit.position.unwrap().percent, 0.3, epsilon = 1e-12);
        assert_relative_eq!(unit.speed.unwrap(), 1.5, epsilon = 1e-12);
    }

    #[test]
    fn test_interpolates_across_segments() {
        let mut tl = timeline();
        tl.ingest(&unit_at(0.0, 1, 0.9, 1.0));
        tl.ingest(&unit_at(1.0, 2, 0.2, 1.0));

        let snap = tl.query(0.5).unwrap().unwrap();
        let position = snap.unit(1).unwrap().position.unwrap();
        assert_eq!(position.segment, SegmentId(2));
        assert_relative_eq!(position.percent, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_query_prunes_older_than_lower_bracket() {
        let mut tl = timeline();
        for i in 0..5 {
            tl.ingest(&unit_at(i as f64, 1, i as f64 * 0.1, 1.0));
        }

        tl.query(3.5).unwrap();
        let remaining: Vec<f64> = tl.buffer().timestamps().collect();
        assert_eq!(remaining, vec![3.0, 4.0]);
        assert_eq!(tl.stats().frames_pruned, 3);
    }

    #[test]
    fn test_beyond_newest_holds_edge() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.2, 1.0));
        tl.ingest(&unit_at(2.0, 1, 0.4, 1.0));

        let snap = tl.query(10.0).unwrap().unwrap();
        assert_eq!(snap.timestamp, 2.0);
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn test_before_oldest_holds_edge() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.2, 1.0));
        tl.ingest(&unit_at(2.0, 1, 0.4, 1.0));

        let snap = tl.query(0.5).unwrap().unwrap();
        assert_eq!(snap.timestamp, 1.0);
        assert_eq!(tl.stats().queries_edge_hold, 1);
    }

    #[test]
    fn test_no_graph_holds_lower_bracket() {
        let mut tl = Timeline::new(TimelineConfig::default());
        tl.ingest(&unit_at(1.0, 1, 0.2, 1.0));
        tl.ingest(&unit_at(2.0, 1, 0.4, 1.0));

        let snap = tl.query(1.5).unwrap().unwrap();
        assert_eq!(snap.timestamp, 1.0);
    }

    #[test]
    fn test_reset_then_bootstrap() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.2, 4.0));
        tl.ingest(&unit_at(2.0, 1, 0.4, 4.0));
        tl.reset();
        assert!(tl.is_empty());

        // After a reset the accumulator starts from nothing: speed is unknown
        tl.ingest(&UpdateBatch::at(0.5).with_unit(TransportUnit::new(1).with_position(1, 0.1)));
        let snap = tl.latest().unwrap();
        assert_eq!(snap.unit(1).unwrap().speed, None);
        assert_eq!(tl.stats().resets, 1);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut tl = Timeline::new(TimelineConfig::with_max_frames(3));
        for i in 0..10 {
            tl.ingest(&UpdateBatch::at(i as f64).with_station(Station::new(1)));
        }
        assert_eq!(tl.len(), 3);
        assert_eq!(tl.oldest_time(), Some(7.0));
        assert_eq!(tl.stats().frames_evicted, 7);
    }

    #[test]
    fn test_capacity_never_below_two() {
        let mut tl = Timeline::new(TimelineConfig { max_frames: 0 });
        tl.ingest(&UpdateBatch::at(1.0));
        tl.ingest(&UpdateBatch::at(2.0));
        tl.ingest(&UpdateBatch::at(3.0));
        assert_eq!(tl.len(), 2);
    }

    #[test]
    fn test_earlier_result_not_mutated_by_later_ingest() {
        let mut tl = timeline();
        tl.ingest(&unit_at(1.0, 1, 0.2, 1.0));
        let held = tl.latest().unwrap();
        tl.ingest(&unit_at(2.0, 1, 0.9, 7.0));

        assert_eq!(held.unit(1).unwrap().speed, Some(1.0));
    }

    #[test]
    fn test_resolve_units() {
        let mut tl = timeline();
        tl.ingest(
            &unit_at(1.0, 1, 0.5, 1.0).with_unit(TransportUnit::new(2).with_speed(1.0)),
        );
        let snap = tl.latest().unwrap();
        let graph = line_graph();

        let poses = resolve_units(&graph, &snap).unwrap();
        assert_eq!(poses.len(), 1);
        assert_relative_eq!(poses[0].1.x(), 5.0);
    }

    #[test]
    fn test_resolve_units_unknown_segment() {
        let snap = merge(None, &unit_at(1.0, 42, 0.5, 1.0));
        let err = resolve_units(&line_graph(), &snap).unwrap_err();
        assert_eq!(err, TimelineError::Space(SpaceError::UnknownSegment(SegmentId(42))));
    }

    #[test]
    fn test_shared_timeline_across_threads() {
        let shared = SharedTimeline::new(TimelineConfig::default());
        shared.set_graph(line_graph());

        let producer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..100 {
                    shared.ingest(&unit_at(i as f64 * 0.1, 1, (i as f64) / 100.0, 1.0));
                }
            })
        };
        for i in 0..100 {
            let _ = shared.query(i as f64 * 0.05).unwrap();
        }
        producer.join().unwrap();

        let times: Vec<f64> = shared.with(|tl| tl.buffer().timestamps().collect());
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(shared.stats().batches_appended, 100);
    }

    // Every batch of generation `g` carries carrier 1 on line `g`.
    fn generation_of(snapshot: &Snapshot) -> Option<u32> {
        snapshot.carriers.get(&CarrierId(1)).and_then(|c| c.line)
    }

    fn assert_single_generation(tl: &Timeline) -> Option<u32> {
        let stamps: Vec<f64> = tl.buffer().timestamps().collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "out of order: {stamps:?}");
        let generations: Vec<Option<u32>> = (0..tl.len())
            .filter_map(|i| tl.buffer().get(i))
            .map(|s| generation_of(s))
            .collect();
        assert!(generations.windows(2).all(|w| w[0] == w[1]), "mixed: {generations:?}");
        generations.first().copied().flatten()
    }

    #[test]
    fn test_reset_during_queries_never_mixes_generations() {
        let shared = SharedTimeline::new(TimelineConfig::default());
        shared.set_graph(line_graph());

        let producer = {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for generation in 1..=20u32 {
                    shared.reset();
                    shared.with(|tl| assert!(tl.is_empty()));
                    // Timestamps restart below those of the previous generation
                    for i in 0..30 {
                        let t = i as f64 * 0.1;
                        let batch = unit_at(t, 1, i as f64 / 30.0, 1.0)
                            .with_carrier(Carrier::new(1).with_stage(generation, 0));
                        assert_eq!(shared.ingest(&batch), IngestOutcome::Appended);
                        shared.with(|tl| {
                            assert_eq!(assert_single_generation(tl), Some(generation));
                        });
                    }
                }
            })
        };

        for i in 0..2000 {
            let t = (i % 40) as f64 * 0.075;
            shared.with(|tl| {
                let result = tl.query(t).unwrap();
                let current = assert_single_generation(tl);
                let Some(snapshot) = result else {
                    assert!(tl.is_empty());
                    return;
                };
                assert_eq!(generation_of(&snapshot), current);
                let stamps: Vec<f64> = tl.buffer().timestamps().collect();
                assert!(snapshot.timestamp == t || stamps.contains(&snapshot.timestamp));
            });
        }
        producer.join().unwrap();

        assert_eq!(shared.stats().resets, 20);
        assert_eq!(shared.with(|tl| assert_single_generation(tl)), Some(20));
    }

    proptest! {
        #[test]
        fn buffer_timestamps_strictly_increase(
            times in proptest::collection::vec(0.0f64..100.0, 0..40),
            queries in proptest::collection::vec(0.0f64..100.0, 0..10),
        ) {
            let mut tl = timeline();
            for t in &times {
                tl.ingest(&UpdateBatch::at(*t));
            }
            for q in &queries {
                tl.query(*q).unwrap();
            }
            let stamps: Vec<f64> = tl.buffer().timestamps().collect();
            prop_assert!(stamps.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn exact_hits_are_unmodified(
            percents in proptest::collection::vec(0.0f64..=1.0, 2..12),
            pick in 0usize..12,
        ) {
            let mut tl = timeline();
            for (i, p) in percents.iter().enumerate() {
                tl.ingest(&unit_at(i as f64, 1, *p, *p * 3.0));
            }
            let index = pick % percents.len();
            let hit = tl.query(index as f64).unwrap().unwrap();
            let unit = hit.unit(1).unwrap();
            prop_assert_eq!(hit.timestamp, index as f64);
            prop_assert_eq!(unit.position, Some(GraphPosition::new(SegmentId(1), percents[index])));
            prop_assert_eq!(unit.speed, Some(percents[index] * 3.0));
        }
    }
}
