//! The "STATE" Engine - Sparse Delta Accumulator
//!
//! The status stream only carries the fields that changed since the last
//! update of an entity. This module folds those partial records into full
//! snapshots:
//! - Records are keyed by id inside copy-on-write collections
//! - A merge never mutates the previous snapshot, so frames already handed
//!   out to readers stay valid
//! - Absence means "unchanged"; there is no deletion in the stream

use crate::ids::{CarrierId, JobId, SegmentId, StationId, UnitId};
use crate::trackview_space::GraphPosition;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

// ============================================================================
// DISCRETE STATES
// ============================================================================

/// Work state of a transport unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitWorkState {
    #[default]
    Idle,
    TaskAssigned,
    WaitPick,
    CarrierPicked,
    WaitPlace,
}

/// Lifecycle state of a transport job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    NotAssigned,
    Assigned,
    Accepted,
    Finished,
}

// ============================================================================
// SPARSE RECORDS
// ============================================================================

/// A record whose non-id fields may each be absent.
///
/// The same type serves as the partial record of an update and as the
/// accumulated record of a snapshot.
pub trait SparseRecord: Clone + Debug + PartialEq + Send + Sync + 'static {
    type Id: Copy + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn id(&self) -> Self::Id;

    /// Overwrites every field present in `delta`; absent fields keep their value.
    fn overlay(&mut self, delta: &Self);
}

fn overlay_field<T: Clone>(slot: &mut Option<T>, delta: &Option<T>) {
    if let Some(value) = delta {
        *slot = Some(value.clone());
    }
}

/// A mobile transport unit (robot) travelling the track graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportUnit {
    pub id: UnitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GraphPosition>,
    /// m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_position: Option<GraphPosition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_edges: Option<Vec<SegmentId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<UnitWorkState>,
    /// Carried carrier id, -1 when empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<i64>,
    /// Assigned job id, -1 when idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job: Option<i64>,
    /// Seconds left in the current load/unload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_remaining: Option<f64>,
    /// Total seconds of a load/unload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loading_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_to_goal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_goal: Option<f64>,
}

impl TransportUnit {
    /// A record carrying only the id.
    pub fn new(id: u32) -> Self {
        Self {
            id: UnitId(id),
            position: None,
            speed: None,
            predicted_position: None,
            path_edges: None,
            state: None,
            carrier: None,
            job: None,
            loading_remaining: None,
            loading_total: None,
            distance_to_goal: None,
            time_to_goal: None,
        }
    }

    pub fn with_position(mut self, segment: u32, percent: f64) -> Self {
        self.position = Some(GraphPosition::new(SegmentId(segment), percent));
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_state(mut self, state: UnitWorkState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_carrier(mut self, carrier: i64) -> Self {
        self.carrier = Some(carrier);
        self
    }

    pub fn with_job(mut self, job: i64) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_loading(mut self, remaining: f64, total: f64) -> Self {
        self.loading_remaining = Some(remaining);
        self.loading_total = Some(total);
        self
    }

    pub fn with_goal(mut self, distance: f64, time: f64) -> Self {
        self.distance_to_goal = Some(distance);
        self.time_to_goal = Some(time);
        self
    }
}

impl SparseRecord for TransportUnit {
    type Id = UnitId;

    fn id(&self) -> UnitId {
        self.id
    }

    fn overlay(&mut self, delta: &Self) {
        overlay_field(&mut self.position, &delta.position);
        overlay_field(&mut self.speed, &delta.speed);
        overlay_field(&mut self.predicted_position, &delta.predicted_position);
        overlay_field(&mut self.path_edges, &delta.path_edges);
        overlay_field(&mut self.state, &delta.state);
        overlay_field(&mut self.carrier, &delta.carrier);
        overlay_field(&mut self.job, &delta.job);
        overlay_field(&mut self.loading_remaining, &delta.loading_remaining);
        overlay_field(&mut self.loading_total, &delta.loading_total);
        overlay_field(&mut self.distance_to_goal, &delta.distance_to_goal);
        overlay_field(&mut self.time_to_goal, &delta.time_to_goal);
    }
}

/// A processing station (device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    /// Carriers buffered at the station
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier_cache: Option<Vec<CarrierId>>,
    /// Carrier being processed, -1 when idle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<i64>,
    /// Seconds left in the current processing cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycle_remaining: Option<f64>,
}

impl Station {
    pub fn new(id: u32) -> Self {
        Self {
            id: StationId(id),
            carrier_cache: None,
            carrier: None,
            cycle_remaining: None,
        }
    }

    pub fn with_cycle_remaining(mut self, seconds: f64) -> Self {
        self.cycle_remaining = Some(seconds);
        self
    }

    pub fn with_carrier(mut self, carrier: i64) -> Self {
        self.carrier = Some(carrier);
        self
    }
}

impl SparseRecord for Station {
    type Id = StationId;

    fn id(&self) -> StationId {
        self.id
    }

    fn overlay(&mut self, delta: &Self) {
        overlay_field(&mut self.carrier_cache, &delta.carrier_cache);
        overlay_field(&mut self.carrier, &delta.carrier);
        overlay_field(&mut self.cycle_remaining, &delta.cycle_remaining);
    }
}

/// A cargo carrier moving through the process line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carrier {
    pub id: CarrierId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<u32>,
}

impl Carrier {
    pub fn new(id: u32) -> Self {
        Self {
            id: CarrierId(id),
            count: None,
            processed: None,
            line: None,
            stage: None,
        }
    }

    pub fn with_progress(mut self, processed: u32, count: u32) -> Self {
        self.processed = Some(processed);
        self.count = Some(count);
        self
    }

    pub fn with_stage(mut self, line: u32, stage: u32) -> Self {
        self.line = Some(line);
        self.stage = Some(stage);
        self
    }
}

impl SparseRecord for Carrier {
    type Id = CarrierId;

    fn id(&self) -> CarrierId {
        self.id
    }

    fn overlay(&mut self, delta: &Self) {
        overlay_field(&mut self.count, &delta.count);
        overlay_field(&mut self.processed, &delta.processed);
        overlay_field(&mut self.line, &delta.line);
        overlay_field(&mut self.stage, &delta.stage);
    }
}

/// A transport job: move a carrier from one station to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pickup_station: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_station: Option<u32>,
}

impl Job {
    pub fn new(id: u32) -> Self {
        Self {
            id: JobId(id),
            state: None,
            pickup_station: None,
            place_station: None,
        }
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_route(mut self, pickup: u32, place: u32) -> Self {
        self.pickup_station = Some(pickup);
        self.place_station = Some(place);
        self
    }
}

impl SparseRecord for Job {
    type Id = JobId;

    fn id(&self) -> JobId {
        self.id
    }

    fn overlay(&mut self, delta: &Self) {
        overlay_field(&mut self.state, &delta.state);
        overlay_field(&mut self.pickup_station, &delta.pickup_station);
        overlay_field(&mut self.place_station, &delta.place_station);
    }
}

// ============================================================================
// COLLECTIONS
// ============================================================================

/// Id-keyed, copy-on-write map of accumulated records.
///
/// Cloning is cheap (shared `Arc`); a merge copies the map only when the
/// batch actually touches this collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection<R: SparseRecord> {
    entries: Arc<BTreeMap<R::Id, R>>,
}

impl<R: SparseRecord> Default for Collection<R> {
    fn default() -> Self {
        Self {
            entries: Arc::new(BTreeMap::new()),
        }
    }
}

impl<R: SparseRecord> Collection<R> {
    pub fn get(&self, id: &R::Id) -> Option<&R> {
        self.entries.get(id)
    }

    /// Records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &R> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when both collections share the same underlying map.
    pub fn shares_storage_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Returns a new collection with `deltas` folded in; `self` is untouched.
    ///
    /// Known ids are overlaid field-wise. Unknown ids are inserted as-is;
    /// fields missing from that first record stay unknown until a later
    /// delta carries them.
    pub fn merged(&self, deltas: &[R]) -> Self {
        if deltas.is_empty() {
            return self.clone();
        }

        let mut entries = Arc::clone(&self.entries);
        let map = Arc::make_mut(&mut entries);
        for delta in deltas {
            match map.get_mut(&delta.id()) {
                Some(existing) => existing.overlay(delta),
                None => {
                    map.insert(delta.id(), delta.clone());
                }
            }
        }

        Self { entries }
    }
}

impl<R: SparseRecord> FromIterator<R> for Collection<R> {
    fn from_iter<I: IntoIterator<Item = R>>(iter: I) -> Self {
        let records: Vec<R> = iter.into_iter().collect();
        Collection::default().merged(&records)
    }
}

impl<R: SparseRecord + Serialize> Serialize for Collection<R> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.values())
    }
}

impl<'de, R: SparseRecord + Deserialize<'de>> Deserialize<'de> for Collection<R> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let records = Vec::<R>::deserialize(deserializer)?;
        Ok(records.into_iter().collect())
    }
}

// ============================================================================
// UPDATE BATCH (Input) AND SNAPSHOT (Output)
// ============================================================================

/// One decoded status message: a timestamp plus partial records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Stream time in seconds
    #[serde(alias = "time")]
    pub timestamp: f64,
    #[serde(default, alias = "transportUnits", alias = "robots")]
    pub units: Vec<TransportUnit>,
    #[serde(default, alias = "devices")]
    pub stations: Vec<Station>,
    #[serde(default, alias = "foups")]
    pub carriers: Vec<Carrier>,
    #[serde(default, alias = "tasks")]
    pub jobs: Vec<Job>,
}

impl UpdateBatch {
    /// An empty batch at `timestamp`.
    pub fn at(timestamp: f64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub fn with_unit(mut self, unit: TransportUnit) -> Self {
        self.units.push(unit);
        self
    }

    pub fn with_station(mut self, station: Station) -> Self {
        self.stations.push(station);
        self
    }

    pub fn with_carrier(mut self, carrier: Carrier) -> Self {
        self.carriers.push(carrier);
        self
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.jobs.push(job);
        self
    }

    /// Number of partial records across all collections.
    pub fn record_count(&self) -> usize {
        self.units.len() + self.stations.len() + self.carriers.len() + self.jobs.len()
    }
}

/// Fully merged state of every tracked entity at one timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: f64,
    pub units: Collection<TransportUnit>,
    pub stations: Collection<Station>,
    pub carriers: Collection<Carrier>,
    pub jobs: Collection<Job>,
}

impl Snapshot {
    /// A snapshot with no entities.
    pub fn empty(timestamp: f64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Folds `batch` into a copy of this snapshot.
    pub fn merged(&self, batch: &UpdateBatch) -> Snapshot {
        Snapshot {
            timestamp: batch.timestamp,
            units: self.units.merged(&batch.units),
            stations: self.stations.merged(&batch.stations),
            carriers: self.carriers.merged(&batch.carriers),
            jobs: self.jobs.merged(&batch.jobs),
        }
    }

    pub fn unit(&self, id: u32) -> Option<&TransportUnit> {
        self.units.get(&UnitId(id))
    }

    pub fn station(&self, id: u32) -> Option<&Station> {
        self.stations.get(&StationId(id))
    }

    pub fn entity_count(&self) -> usize {
        self.units.len() + self.stations.len() + self.carriers.len() + self.jobs.len()
    }
}

/// Accumulates `batch` on top of `previous` (or on nothing).
///
/// Pure: `previous` is never mutated, the result's timestamp is the batch's.
pub fn merge(previous: Option<&Snapshot>, batch: &UpdateBatch) -> Snapshot {
    match previous {
        Some(previous) => previous.merged(batch),
        None => Snapshot::empty(batch.timestamp).merged(batch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_mention_inserts_partial_record() {
        let batch = UpdateBatch::at(1.0).with_unit(TransportUnit::new(1).with_speed(2.0));
        let snapshot = merge(None, &batch);

        let unit = snapshot.unit(1).unwrap();
        assert_eq!(unit.speed, Some(2.0));
        assert_eq!(unit.position, None);
        assert_eq!(snapshot.timestamp, 1.0);
    }

    #[test]
    fn test_overlay_keeps_absent_fields() {
        let first = merge(
            None,
            &UpdateBatch::at(1.0).with_unit(
                TransportUnit::new(1)
                    .with_position(3, 0.25)
                    .with_speed(1.5)
                    .with_state(UnitWorkState::TaskAssigned),
            ),
        );
        let second = merge(
            Some(&first),
            &UpdateBatch::at(2.0).with_unit(TransportUnit::new(1).with_position(3, 0.5)),
        );

        let unit = second.unit(1).unwrap();
        assert_eq!(unit.position, Some(GraphPosition::new(SegmentId(3), 0.5)));
        assert_eq!(unit.speed, Some(1.5));
        assert_eq!(unit.state, Some(UnitWorkState::TaskAssigned));
    }

    #[test]
    fn test_merge_does_not_mutate_previous() {
        let first = merge(
            None,
            &UpdateBatch::at(1.0).with_station(Station::new(4).with_cycle_remaining(10.0)),
        );
        let before = first.clone();
        let _second = merge(
            Some(&first),
            &UpdateBatch::at(2.0).with_station(Station::new(4).with_cycle_remaining(5.0)),
        );

        assert_eq!(first, before);
        assert_eq!(first.station(4).unwrap().cycle_remaining, Some(10.0));
    }

    #[test]
    fn test_untouched_collections_share_storage() {
        let first = merge(
            None,
            &UpdateBatch::at(1.0)
                .with_unit(TransportUnit::new(1))
                .with_job(Job::new(8).with_state(JobState::Assigned)),
        );
        let second = merge(
            Some(&first),
            &UpdateBatch::at(2.0).with_unit(TransportUnit::new(1).with_speed(1.0)),
        );

        assert!(second.jobs.shares_storage_with(&first.jobs));
        assert!(!second.units.shares_storage_with(&first.units));
    }

    #[test]
    fn test_unknown_ids_are_accepted() {
        let snapshot = merge(
            None,
            &UpdateBatch::at(0.5).with_carrier(Carrier::new(999).with_stage(2, 3)),
        );
        assert_eq!(snapshot.carriers.len(), 1);
    }

    #[test]
    fn test_batch_json_aliases() {
        let json = r#"{
            "time": 3.5,
            "robots": [{"id": 1, "position": {"segment": 2, "percent": 0.5}, "speed": 1.0}],
            "devices": [{"id": 7, "cycle_remaining": 4.0}],
            "tasks": [{"id": 9, "state": "accepted"}]
        }"#;
        let batch: UpdateBatch = serde_json::from_str(json).unwrap();

        assert_eq!(batch.timestamp, 3.5);
        assert_eq!(batch.units[0].speed, Some(1.0));
        assert_eq!(batch.stations[0].cycle_remaining, Some(4.0));
        assert_eq!(batch.jobs[0].state, Some(JobState::Accepted));
        assert!(batch.carriers.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_collections_as_lists() {
        let snapshot = merge(None, &UpdateBatch::at(1.0).with_unit(TransportUnit::new(2)));
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["units"][0]["id"], 2);

        let back: Snapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    fn arb_unit() -> impl Strategy<Value = TransportUnit> {
        (
            0u32..4,
            proptest::option::of((0u32..3, 0.0f64..=1.0)),
            proptest::option::of(0.0f64..5.0),
            proptest::option::of(-1i64..6),
        )
            .prop_map(|(id, position, speed, carrier)| {
                let mut unit = TransportUnit::new(id);
                unit.position = position.map(|(s, p)| GraphPosition::new(SegmentId(s), p));
                unit.speed = speed;
                unit.carrier = carrier;
                unit
            })
    }

    fn arb_carrier() -> impl Strategy<Value = Carrier> {
        (
            0u32..3,
            proptest::option::of(0u32..25),
            proptest::option::of(0u32..4),
            proptest::option::of(0u32..8),
        )
            .prop_map(|(id, processed, line, stage)| Carrier {
                processed,
                line,
                stage,
                ..Carrier::new(id)
            })
    }

    fn arb_job() -> impl Strategy<Value = Job> {
        let state = prop_oneof![
            Just(JobState::NotAssigned),
            Just(JobState::Assigned),
            Just(JobState::Accepted),
            Just(JobState::Finished),
        ];
        (0u32..3, proptest::option::of(state), proptest::option::of(0u32..5))
            .prop_map(|(id, state, place)| Job {
                state,
                place_station: place,
                ..Job::new(id)
            })
    }

    fn arb_batch(timestamp: f64) -> impl Strategy<Value = UpdateBatch> {
        (
            proptest::collection::vec(arb_unit(), 0..6),
            proptest::collection::vec(
                (0u32..3, proptest::option::of(0.0f64..30.0))
                    .prop_map(|(id, cycle)| Station {
                        cycle_remaining: cycle,
                        ..Station::new(id)
                    }),
                0..4,
            ),
            proptest::collection::vec(arb_carrier(), 0..4),
            proptest::collection::vec(arb_job(), 0..4),
        )
            .prop_map(move |(units, stations, carriers, jobs)| UpdateBatch {
                timestamp,
                units,
                stations,
                carriers,
                jobs,
            })
    }

    proptest! {
        #[test]
        fn merging_same_batch_twice_is_idempotent(
            seed in arb_batch(1.0),
            batch in arb_batch(2.0),
        ) {
            let base = merge(None, &seed);
            let once = merge(Some(&base), &batch);
            let twice = merge(Some(&once), &batch);
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn fields_persist_until_overwritten(
            speed in 0.0f64..5.0,
            later in proptest::collection::vec(arb_batch(0.0), 0..8),
        ) {
            let mut snapshot = merge(
                None,
                &UpdateBatch::at(0.0).with_unit(TransportUnit::new(100).with_speed(speed)),
            );
            for (i, mut batch) in later.into_iter().enumerate() {
                batch.timestamp = (i + 1) as f64;
                snapshot = merge(Some(&snapshot), &batch);
                // id 100 is never generated by `arb_unit`
                prop_assert_eq!(snapshot.unit(100).and_then(|u| u.speed), Some(speed));
            }
        }

        #[test]
        fn carrier_and_job_fields_persist(
            stage in 0u32..8,
            later in proptest::collection::vec(arb_batch(0.0), 0..8),
        ) {
            let mut snapshot = merge(
                None,
                &UpdateBatch::at(0.0)
                    .with_carrier(Carrier::new(100).with_stage(1, stage))
                    .with_job(Job::new(100).with_state(JobState::Accepted).with_route(2, 3)),
            );
            for (i, mut batch) in later.into_iter().enumerate() {
                batch.timestamp = (i + 1) as f64;
                // Partial records for id 100 only ever touch `processed`
                batch.carriers.push(Carrier {
                    processed: Some(i as u32),
                    ..Carrier::new(100)
                });
                batch.jobs.push(Job::new(100));
                snapshot = merge(Some(&snapshot), &batch);

                let carrier = snapshot.carriers.get(&CarrierId(100)).unwrap();
                prop_assert_eq!(carrier.stage, Some(stage));
                prop_assert_eq!(carrier.line, Some(1));
                prop_assert_eq!(carrier.processed, Some(i as u32));
                let job = snapshot.jobs.get(&JobId(100)).unwrap();
                prop_assert_eq!(job.state, Some(JobState::Accepted));
                prop_assert_eq!(job.pickup_station, Some(2));
                prop_assert_eq!(job.place_station, Some(3));
            }
        }
    }
}
