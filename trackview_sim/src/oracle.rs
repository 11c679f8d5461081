//! Ground truth oracle for simulation.
//!
//! The Oracle is the simulated plant behind the status server:
//! - Robots drive the loop at constant speed, dwelling at docks to pick
//!   and place carriers
//! - Stations run fixed processing cycles
//! - Status batches are sparse: the first mention of an entity carries every
//!   field, later ones only the fields that changed since that entity was
//!   last mentioned
//! - True world poses can be asked for at any past time

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::warn;
use trackview_core::{
    Carrier, CarrierId, DockId, GraphPosition, Job, JobId, JobState, SegmentId, SpaceError,
    Station, StationId, TrackGraph, TransportUnit, UnitId, UnitWorkState, UpdateBatch,
    WorldPose,
};

/// Oracle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Number of robots on the loop
    pub robots: usize,
    /// Mean robot speed in m/s (each robot gets ±20%)
    pub speed_mps: f64,
    /// Seconds spent lowering or lifting a carrier
    pub dwell_s: f64,
    /// Station processing cycle in seconds
    pub station_cycle_s: f64,
    /// A robot is mentioned in every n-th batch only (1 = whenever it changes)
    pub mention_every: u32,
    /// Wafers per carrier
    pub carrier_capacity: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            robots: 4,
            speed_mps: 2.0,
            dwell_s: 1.5,
            station_cycle_s: 12.0,
            mention_every: 1,
            carrier_capacity: 25,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Moving,
    Dwelling { remaining: f64, total: f64 },
}

/// True state of one robot.
#[derive(Debug, Clone)]
struct RobotTruth {
    id: UnitId,
    route_index: usize,
    percent: f64,
    speed: f64,
    phase: Phase,
    state: UnitWorkState,
    target: DockId,
    job: JobId,
    carrier: Option<CarrierId>,
}

impl RobotTruth {
    fn position(&self, route: &[SegmentId]) -> GraphPosition {
        GraphPosition::new(route[self.route_index], self.percent)
    }

    /// Drives `distance` meters along the route, stopping at `target`.
    ///
    /// Returns true when the robot stopped on the target.
    fn travel(
        &mut self,
        graph: &TrackGraph,
        route: &[SegmentId],
        mut distance: f64,
        target: GraphPosition,
    ) -> bool {
        for _ in 0..=route.len() * 2 {
            let segment = route[self.route_index];
            let length = graph.segment_length(segment).unwrap_or(0.0);
            let stop = (target.segment == segment && target.percent >= self.percent)
                .then_some(target.percent);
            let end = stop.unwrap_or(1.0);
            let available = (end - self.percent) * length;

            if distance < available {
                self.percent += distance / length;
                return false;
            }

            distance -= available;
            self.percent = end;
            if stop.is_some() {
                return true;
            }
            self.route_index = (self.route_index + 1) % route.len();
            self.percent = 0.0;
            if distance <= 0.0 {
                return false;
            }
        }
        false
    }
}

/// Along-route distance from `position` to `target`.
fn route_distance(
    graph: &TrackGraph,
    route: &[SegmentId],
    route_index: usize,
    percent: f64,
    target: GraphPosition,
) -> f64 {
    let length = |id: SegmentId| graph.segment_length(id).unwrap_or(0.0);
    let here = route[route_index];
    if here == target.segment && target.percent >= percent {
        return (target.percent - percent) * length(here);
    }

    let mut total = (1.0 - percent) * length(here);
    for step in 1..=route.len() {
        let segment = route[(route_index + step) % route.len()];
        if segment == target.segment {
            return total + target.percent * length(segment);
        }
        total += length(segment);
    }
    total
}

fn path_to(route: &[SegmentId], route_index: usize, target: SegmentId) -> Vec<SegmentId> {
    let mut path = Vec::new();
    for step in 0..route.len() {
        let segment = route[(route_index + step) % route.len()];
        path.push(segment);
        if segment == target {
            break;
        }
    }
    path
}

#[derive(Debug, Clone)]
struct StationTruth {
    id: StationId,
    cycle_offset: f64,
    carrier: Option<CarrierId>,
    cache: VecDeque<CarrierId>,
}

// Copies every field of `current` that differs from `previous` into `out`.
macro_rules! diff_fields {
    ($current:expr, $previous:expr, $out:expr; $($field:ident),+ $(,)?) => {
        $(
            if $current.$field != $previous.$field {
                $out.$field = $current.$field.clone();
            }
        )+
    };
}

fn unit_delta(current: &TransportUnit, previous: Option<&TransportUnit>) -> Option<TransportUnit> {
    let Some(previous) = previous else {
        return Some(current.clone());
    };
    let empty = TransportUnit::new(current.id.0);
    let mut out = empty.clone();
    diff_fields!(current, previous, out;
        position, speed, predicted_position, path_edges, state, carrier, job,
        loading_remaining, loading_total, distance_to_goal, time_to_goal);
    (out != empty).then_some(out)
}

fn station_delta(current: &Station, previous: Option<&Station>) -> Option<Station> {
    let Some(previous) = previous else {
        return Some(current.clone());
    };
    let empty = Station::new(current.id.0);
    let mut out = empty.clone();
    diff_fields!(current, previous, out; carrier_cache, carrier, cycle_remaining);
    (out != empty).then_some(out)
}

fn carrier_delta(current: &Carrier, previous: Option<&Carrier>) -> Option<Carrier> {
    let Some(previous) = previous else {
        return Some(current.clone());
    };
    let empty = Carrier::new(current.id.0);
    let mut out = empty.clone();
    diff_fields!(current, previous, out; count, processed, line, stage);
    (out != empty).then_some(out)
}

fn job_delta(current: &Job, previous: Option<&Job>) -> Option<Job> {
    let Some(previous) = previous else {
        return Some(current.clone());
    };
    let empty = Job::new(current.id.0);
    let mut out = empty.clone();
    diff_fields!(current, previous, out; state, pickup_station, place_station);
    (out != empty).then_some(out)
}

/// The Oracle - maintains ground truth and generates status batches.
pub struct Oracle {
    graph: Arc<TrackGraph>,
    route: Vec<SegmentId>,
    config: OracleConfig,
    rng: ChaCha8Rng,

    robots: Vec<RobotTruth>,
    stations: Vec<StationTruth>,
    carriers: BTreeMap<CarrierId, Carrier>,
    jobs: BTreeMap<JobId, Job>,
    next_job: u32,

    /// Current simulation time (seconds)
    current_time: f64,
    batches_emitted: u64,

    /// (time, robots) after every step, for ground-truth lookups
    history: VecDeque<(f64, Vec<RobotTruth>)>,

    sent_units: BTreeMap<UnitId, TransportUnit>,
    sent_stations: BTreeMap<StationId, Station>,
    sent_carriers: BTreeMap<CarrierId, Carrier>,
    sent_jobs: BTreeMap<JobId, Job>,
}

impl Oracle {
    /// Creates an oracle driving `config.robots` robots along `route`.
    ///
    /// The route must be a closed loop of segments present in `graph`;
    /// robots only get jobs when at least two docks lie on it. An empty
    /// route yields a plant without robots.
    pub fn new(
        graph: Arc<TrackGraph>,
        route: Vec<SegmentId>,
        config: OracleConfig,
        rng: ChaCha8Rng,
    ) -> Self {
        let mut dock_stations: Vec<(DockId, StationId)> = route
            .iter()
            .flat_map(|segment| {
                let mut docks: Vec<(DockId, StationId)> = graph
                    .docks_on(*segment)
                    .map(|d| (d.id, d.station))
                    .collect();
                docks.sort();
                docks
            })
            .collect();
        dock_stations.dedup();

        let stations = dock_stations
            .iter()
            .enumerate()
            .map(|(i, (_, station))| StationTruth {
                id: *station,
                cycle_offset: i as f64 * config.station_cycle_s / dock_stations.len().max(1) as f64,
                carrier: None,
                cache: VecDeque::new(),
            })
            .collect();

        let mut oracle = Self {
            graph,
            route,
            config,
            rng,
            robots: Vec::new(),
            stations,
            carriers: BTreeMap::new(),
            jobs: BTreeMap::new(),
            next_job: 1,
            current_time: 0.0,
            batches_emitted: 0,
            history: VecDeque::new(),
            sent_units: BTreeMap::new(),
            sent_stations: BTreeMap::new(),
            sent_carriers: BTreeMap::new(),
            sent_jobs: BTreeMap::new(),
        };

        if oracle.route.is_empty() && oracle.config.robots > 0 {
            warn!(robots = oracle.config.robots, "empty route, no robots spawned");
        }
        let robots = if oracle.route.is_empty() { 0 } else { oracle.config.robots };
        for i in 0..robots {
            let route_index = (i * oracle.route.len()) / robots;
            let speed = oracle.config.speed_mps * oracle.rng.gen_range(0.8..1.2);
            let mut robot = RobotTruth {
                id: UnitId(i as u32 + 1),
                route_index: route_index % oracle.route.len(),
                percent: 0.1,
                speed,
                phase: Phase::Moving,
                state: UnitWorkState::Idle,
                target: DockId(0),
                job: JobId(0),
                carrier: None,
            };
            oracle.assign_job(&mut robot);
            oracle.robots.push(robot);
        }

        oracle.record_history();
        oracle
    }

    pub fn time(&self) -> f64 {
        self.current_time
    }

    pub fn jobs_finished(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == Some(JobState::Finished))
            .count()
    }

    fn dock_position(&self, dock: DockId) -> GraphPosition {
        self.graph
            .dock(dock)
            .map(|d| d.position)
            .or_else(|| self.route.first().map(|s| GraphPosition::new(*s, 0.0)))
            .unwrap_or(GraphPosition::new(SegmentId(0), 0.0))
    }

    fn dock_station(&self, dock: DockId) -> Option<StationId> {
        self.graph.dock(dock).map(|d| d.station)
    }

    fn route_docks(&self) -> Vec<DockId> {
        let mut docks: Vec<DockId> = self
            .route
            .iter()
            .flat_map(|segment| self.graph.docks_on(*segment).map(|d| d.id))
            .collect();
        docks.sort();
        docks.dedup();
        docks
    }

    /// Creates a new pick/place job for `robot` and sends it to the pickup dock.
    fn assign_job(&mut self, robot: &mut RobotTruth) {
        let docks = self.route_docks();
        if docks.len() < 2 {
            robot.state = UnitWorkState::Idle;
            return;
        }
        let pickup = docks[self.rng.gen_range(0..docks.len())];
        let mut place = docks[self.rng.gen_range(0..docks.len())];
        while place == pickup {
            place = docks[self.rng.gen_range(0..docks.len())];
        }

        let id = self.next_job;
        self.next_job += 1;

        let pickup_station = self.dock_station(pickup).map_or(0, |s| s.0);
        let place_station = self.dock_station(place).map_or(0, |s| s.0);
        self.jobs.insert(
            JobId(id),
            Job::new(id)
                .with_state(JobState::Assigned)
                .with_route(pickup_station, place_station),
        );
        self.carriers.insert(
            CarrierId(id),
            Carrier::new(id)
                .with_progress(0, self.config.carrier_capacity)
                .with_stage(1, 0),
        );

        robot.job = JobId(id);
        robot.target = pickup;
        robot.state = UnitWorkState::TaskAssigned;
        robot.phase = Phase::Moving;
    }

    /// Advances the plant by `dt` seconds.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;

        let mut robots = std::mem::take(&mut self.robots);
        for robot in robots.iter_mut() {
            self.step_robot(robot, dt);
        }
        self.robots = robots;

        self.record_history();
    }

    fn step_robot(&mut self, robot: &mut RobotTruth, dt: f64) {
        match robot.phase {
            Phase::Moving => {
                if robot.state == UnitWorkState::Idle {
                    return;
                }
                let target = self.dock_position(robot.target);
                if robot.travel(&self.graph, &self.route, robot.speed * dt, target) {
                    robot.phase = Phase::Dwelling {
                        remaining: self.config.dwell_s,
                        total: self.config.dwell_s,
                    };
                    robot.state = if robot.carrier.is_none() {
                        UnitWorkState::WaitPick
                    } else {
                        UnitWorkState::WaitPlace
                    };
                }
            }
            Phase::Dwelling { remaining, total } => {
                let remaining = remaining - dt;
                if remaining > 0.0 {
                    robot.phase = Phase::Dwelling { remaining, total };
                } else if robot.carrier.is_none() {
                    self.finish_pick(robot);
                } else {
                    self.finish_place(robot);
                }
            }
        }
    }

    fn finish_pick(&mut self, robot: &mut RobotTruth) {
        let carrier = CarrierId(robot.job.0);
        robot.carrier = Some(carrier);
        robot.state = UnitWorkState::CarrierPicked;
        robot.phase = Phase::Moving;

        let Some(job) = self.jobs.get_mut(&robot.job) else {
            return;
        };
        job.state = Some(JobState::Accepted);
        let place_station = job.place_station;

        robot.target = self
            .route_docks()
            .into_iter()
            .find(|d| self.dock_station(*d).map(|s| s.0) == place_station)
            .unwrap_or(robot.target);
    }

    fn finish_place(&mut self, robot: &mut RobotTruth) {
        if let Some(carrier_id) = robot.carrier.take() {
            if let Some(carrier) = self.carriers.get_mut(&carrier_id) {
                carrier.processed = Some(carrier.processed.unwrap_or(0) + 1);
                carrier.stage = Some(carrier.stage.unwrap_or(0) + 1);
            }
            if let Some(station_id) = self.dock_station(robot.target) {
                if let Some(station) = self.stations.iter_mut().find(|s| s.id == station_id) {
                    station.carrier = Some(carrier_id);
                    station.cache.push_back(carrier_id);
                    if station.cache.len() > 4 {
                        station.cache.pop_front();
                    }
                }
            }
        }
        if let Some(job) = self.jobs.get_mut(&robot.job) {
            job.state = Some(JobState::Finished);
        }
        self.assign_job(robot);
    }

    fn record_history(&mut self) {
        self.history.push_back((self.current_time, self.robots.clone()));
    }

    /// Drops ground-truth history older than `time`, keeping one sample at or before it.
    pub fn forget_before(&mut self, time: f64) {
        while self.history.len() > 1 && self.history.get(1).is_some_and(|(t, _)| *t <= time) {
            self.history.pop_front();
        }
    }

    fn unit_record(&self, robot: &RobotTruth) -> TransportUnit {
        let target = self.dock_position(robot.target);
        let distance = route_distance(&self.graph, &self.route, robot.route_index, robot.percent, target);

        let mut predicted = robot.clone();
        if robot.phase == Phase::Moving {
            predicted.travel(&self.graph, &self.route, robot.speed, target);
        }

        let (speed, remaining, total) = match robot.phase {
            Phase::Moving => (robot.speed, 0.0, self.config.dwell_s),
            Phase::Dwelling { remaining, total } => (0.0, remaining.max(0.0), total),
        };

        TransportUnit {
            position: Some(robot.position(&self.route)),
            speed: Some(speed),
            predicted_position: Some(predicted.position(&self.route)),
            path_edges: Some(path_to(&self.route, robot.route_index, target.segment)),
            state: Some(robot.state),
            carrier: Some(robot.carrier.map_or(-1, |c| c.0 as i64)),
            job: Some(robot.job.0 as i64),
            loading_remaining: Some(remaining),
            loading_total: Some(total),
            distance_to_goal: Some(distance),
            time_to_goal: Some(if robot.speed > 0.0 { distance / robot.speed } else { 0.0 }),
            ..TransportUnit::new(robot.id.0)
        }
    }

    fn station_record(&self, station: &StationTruth) -> Station {
        let cycle = self.config.station_cycle_s.max(f64::EPSILON);
        let elapsed = (self.current_time + station.cycle_offset) % cycle;
        Station {
            carrier_cache: Some(station.cache.iter().copied().collect()),
            carrier: Some(station.carrier.map_or(-1, |c| c.0 as i64)),
            cycle_remaining: Some(cycle - elapsed),
            ..Station::new(station.id.0)
        }
    }

    /// Builds the status batch for the current time.
    pub fn status_batch(&mut self) -> UpdateBatch {
        let batch_no = self.batches_emitted;
        self.batches_emitted += 1;
        let every = u64::from(self.config.mention_every.max(1));

        let mut batch = UpdateBatch::at(self.current_time);

        for robot in &self.robots {
            if (batch_no + u64::from(robot.id.0)) % every != 0 {
                continue;
            }
            let record = self.unit_record(robot);
            if let Some(delta) = unit_delta(&record, self.sent_units.get(&robot.id)) {
                batch.units.push(delta);
                self.sent_units.insert(robot.id, record);
            }
        }

        for station in &self.stations {
            let record = self.station_record(station);
            if let Some(delta) = station_delta(&record, self.sent_stations.get(&station.id)) {
                batch.stations.push(delta);
                self.sent_stations.insert(station.id, record);
            }
        }

        for (id, carrier) in &self.carriers {
            if let Some(delta) = carrier_delta(carrier, self.sent_carriers.get(id)) {
                batch.carriers.push(delta);
                self.sent_carriers.insert(*id, carrier.clone());
            }
        }

        for (id, job) in &self.jobs {
            if let Some(delta) = job_delta(job, self.sent_jobs.get(id)) {
                batch.jobs.push(delta);
                self.sent_jobs.insert(*id, job.clone());
            }
        }

        batch
    }

    /// Forgets what was sent, so the next batch carries full records.
    pub fn restart_stream(&mut self) {
        self.sent_units.clear();
        self.sent_stations.clear();
        self.sent_carriers.clear();
        self.sent_jobs.clear();
    }

    /// True world pose of every robot at `time` (within retained history).
    pub fn truth_at(&self, time: f64) -> Result<Vec<(UnitId, WorldPose)>, SpaceError> {
        let index = self.history.partition_point(|(t, _)| *t <= time);
        let Some((sample_time, robots)) = self.history.get(index.saturating_sub(1)) else {
            return Ok(Vec::new());
        };
        let elapsed = (time - sample_time).max(0.0);

        robots
            .iter()
            .map(|robot| {
                let mut robot = robot.clone();
                if robot.phase == Phase::Moving && robot.state != UnitWorkState::Idle {
                    let target = self.dock_position(robot.target);
                    robot.travel(&self.graph, &self.route, robot.speed * elapsed, target);
                }
                let pose = self.graph.resolve(&robot.position(&self.route))?;
                Ok((robot.id, pose))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LoopLayout;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use trackview_core::merge;

    fn oracle(config: OracleConfig) -> Oracle {
        let layout = LoopLayout::default();
        let graph = Arc::new(TrackGraph::from_scene(&layout.scene()));
        Oracle::new(graph, layout.route(), config, ChaCha8Rng::seed_from_u64(7))
    }

    #[test]
    fn test_first_batch_carries_full_records() {
        let mut oracle = oracle(OracleConfig::default());
        let batch = oracle.status_batch();

        assert_eq!(batch.units.len(), 4);
        for unit in &batch.units {
            assert!(unit.position.is_some());
            assert!(unit.speed.is_some());
            assert!(unit.state.is_some());
            assert!(unit.loading_total.is_some());
        }
        assert_eq!(batch.stations.len(), 4);
        assert_eq!(batch.jobs.len(), 4);
    }

    #[test]
    fn test_later_batches_are_sparse() {
        let mut oracle = oracle(OracleConfig::default());
        oracle.status_batch();
        oracle.step(0.1);
        let batch = oracle.status_batch();

        // Moving robots report position, but their speed has not changed
        assert!(!batch.units.is_empty());
        for unit in &batch.units {
            assert!(unit.position.is_some());
            assert!(unit.speed.is_none());
            assert!(unit.loading_total.is_none());
        }
        assert!(batch.jobs.is_empty());
    }

    #[test]
    fn test_accumulated_batches_match_full_state() {
        let mut oracle = oracle(OracleConfig::default());
        let mut snapshot = merge(None, &oracle.status_batch());
        for _ in 0..200 {
            oracle.step(0.05);
            snapshot = merge(Some(&snapshot), &oracle.status_batch());
        }

        for robot in &oracle.robots {
            let expected = oracle.unit_record(robot);
            assert_eq!(snapshot.units.get(&robot.id), Some(&expected));
        }
    }

    #[test]
    fn test_robots_complete_jobs() {
        let mut oracle = oracle(OracleConfig {
            robots: 2,
            ..Default::default()
        });
        for _ in 0..(120.0 / 0.05) as usize {
            oracle.step(0.05);
        }
        assert!(oracle.jobs_finished() > 0);
    }

    #[test]
    fn test_truth_matches_position_at_sample_times() {
        let mut oracle = oracle(OracleConfig::default());
        for _ in 0..10 {
            oracle.step(0.1);
        }

        let now = oracle.truth_at(oracle.time()).unwrap();
        for ((id, pose), robot) in now.iter().zip(&oracle.robots) {
            assert_eq!(*id, robot.id);
            let expected = oracle.graph.resolve(&robot.position(&oracle.route)).unwrap();
            assert_relative_eq!(pose.distance_to(&expected), 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_mention_every_skips_robots() {
        let mut oracle = oracle(OracleConfig {
            mention_every: 4,
            ..Default::default()
        });
        let first = oracle.status_batch();
        assert_eq!(first.units.len(), 1);
    }

    #[test]
    fn test_restart_stream_resends_everything() {
        let mut oracle = oracle(OracleConfig::default());
        oracle.status_batch();
        oracle.step(0.1);
        oracle.restart_stream();
        let batch = oracle.status_batch();
        assert!(batch.units.iter().all(|u| u.speed.is_some()));
    }

    #[test]
    fn test_empty_route_has_no_robots() {
        let layout = LoopLayout::default();
        let graph = Arc::new(TrackGraph::from_scene(&layout.scene()));
        let mut oracle = Oracle::new(
            graph,
            Vec::new(),
            OracleConfig::default(),
            ChaCha8Rng::seed_from_u64(7),
        );

        oracle.step(0.1);
        let batch = oracle.status_batch();
        assert!(batch.units.is_empty());
        assert!(batch.jobs.is_empty());
        assert!(oracle.truth_at(0.1).unwrap().is_empty());
    }

    #[test]
    fn test_route_distance_wraps() {
        let layout = LoopLayout::default();
        let graph = TrackGraph::from_scene(&layout.scene());
        let route = layout.route();

        let ahead = route_distance(&graph, &route, 0, 0.25, GraphPosition::new(SegmentId(1), 0.75));
        assert_relative_eq!(ahead, 0.5 * graph.segment_length(SegmentId(1)).unwrap(), epsilon = 1e-9);

        let behind = route_distance(&graph, &route, 0, 0.75, GraphPosition::new(SegmentId(1), 0.25));
        assert_relative_eq!(behind, graph.total_length() - ahead, epsilon = 1e-9);
    }
}
