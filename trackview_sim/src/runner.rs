//! Scenario runner - executes stream fault scenarios.

use crate::exporter::{SimEvent, SimExport, SimFrame};
use crate::network::LinkStats;
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimError, SimWorld};

use serde::Serialize;
use trackview_core::StreamMetrics;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total plant ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Display frames rendered
    pub frames_rendered: u64,

    /// Frames for which poses were compared
    pub frames_measured: u64,

    /// Largest displayed-vs-true position error (m)
    pub max_error_m: f64,

    /// Mean displayed-vs-true position error (m)
    pub mean_error_m: f64,

    /// Error budget for this scenario (m)
    pub tolerance_m: f64,

    /// Largest frame buffer size observed
    pub max_buffered: usize,

    /// Times the buffer was found out of order
    pub order_violations: u64,

    /// Disconnect/reconnect cycles
    pub reconnects: u64,

    /// Transport jobs completed by the plant
    pub jobs_finished: usize,

    pub link: LinkStats,

    pub stream: StreamMetrics,
}

/// Runs stream scenarios.
pub struct ScenarioRunner {
    config: SimConfig,

    /// Keep every n-th display frame in the export (0 = no export)
    export_every: u64,
}

/// Seconds the link stays down during a reconnect cycle.
const OUTAGE_S: f64 = 1.0;

impl ScenarioRunner {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            export_every: 0,
        }
    }

    /// Records every n-th display frame for `SimExport`.
    pub fn with_export(mut self, every: u64) -> Self {
        self.export_every = every;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with_export(scenario).0
    }

    /// Runs a scenario; the export is `Some` when enabled with `with_export`.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, Option<SimExport>) {
        info!(
            "Starting scenario: {} (seed={}) - {}",
            scenario.name(),
            self.config.seed,
            scenario.description()
        );

        let mut export =
            (self.export_every > 0).then(|| SimExport::new(scenario.name(), self.config.seed));

        let mut world = SimWorld::new(
            self.config.clone(),
            scenario.faults(),
            scenario.mention_every(),
        );
        let mut metrics = ScenarioMetrics {
            tolerance_m: scenario.tolerance_m(self.config.speed_mps, self.config.status_interval()),
            ..Default::default()
        };

        let outcome = self.drive(scenario, &mut world, &mut metrics, export.as_mut());

        let stream = world.timeline().stats();
        metrics.frames_rendered = world.frames_rendered();
        metrics.jobs_finished = world.oracle.jobs_finished();
        metrics.link = world.link.stats().clone();
        metrics.stream = stream.clone();

        let failure_reason = match outcome {
            Err(e) => Some(format!("run aborted: {e}")),
            Ok(ticks) => self.check(scenario, &metrics).err().map(|reason| {
                debug!(ticks, "assertion failed");
                reason
            }),
        };
        let passed = failure_reason.is_none();
        let total_ticks = (world.time() / self.config.physics_dt()).round() as u64;

        if passed {
            info!(
                "✓ {} complete: max error {:.3}m (budget {:.3}m), {} frames, {} stale, {} resets",
                scenario.name(),
                metrics.max_error_m,
                metrics.tolerance_m,
                metrics.frames_rendered,
                stream.batches_stale,
                stream.resets
            );
        } else {
            warn!("✗ {} failed: {:?}", scenario.name(), failure_reason);
        }

        if let Some(export) = export.as_mut() {
            let max_error = (metrics.frames_measured > 0).then_some(metrics.max_error_m);
            export.finalize(passed, max_error, stream);
        }

        let result = ScenarioResult {
            scenario: scenario.name().to_string(),
            seed: self.config.seed,
            passed,
            total_ticks,
            final_time_secs: world.time(),
            failure_reason,
            metrics,
        };
        (result, export)
    }

    /// Runs the plant for the configured duration. Returns the tick count.
    fn drive(
        &self,
        scenario: ScenarioId,
        world: &mut SimWorld,
        metrics: &mut ScenarioMetrics,
        mut export: Option<&mut SimExport>,
    ) -> Result<u64, SimError> {
        let ticks = (self.config.duration_s / self.config.physics_dt()).ceil() as u64;
        let disconnect_every = scenario.disconnect_every_s();
        let mut next_disconnect = disconnect_every.unwrap_or(f64::INFINITY);
        let mut reconnect_at = f64::INFINITY;
        let mut error_sum = 0.0;
        let mut error_count = 0u64;
        let mut events = Vec::new();

        world.connect();
        events.push(SimEvent::info("connected"));

        for tick in 0..ticks {
            let now = world.time();
            if now >= next_disconnect {
                info!("  ⚡ Dropping connection at t={:.1}s", now);
                world.disconnect();
                events.push(SimEvent::info(format!("disconnected at {now:.2}s")));
                reconnect_at = now + OUTAGE_S;
                next_disconnect = now + disconnect_every.unwrap_or(f64::INFINITY);
            }
            if now >= reconnect_at {
                info!("  ✓ Reconnecting at t={:.1}s", now);
                world.connect();
                events.push(SimEvent::info(format!("reconnected at {now:.2}s")));
                metrics.reconnects += 1;
                reconnect_at = f64::INFINITY;
            }

            let Some(frame) = world.step()? else {
                continue;
            };

            let timeline = world.timeline();
            let (buffered, ordered) = timeline.with(|tl| {
                let stamps: Vec<f64> = tl.buffer().timestamps().collect();
                (stamps.len(), stamps.windows(2).all(|w| w[0] < w[1]))
            });
            metrics.max_buffered = metrics.max_buffered.max(buffered);
            if !ordered {
                metrics.order_violations += 1;
            }

            let samples = world.measure(&frame)?;
            if !samples.is_empty() {
                metrics.frames_measured += 1;
            }
            for sample in &samples {
                metrics.max_error_m = metrics.max_error_m.max(sample.error_m);
                error_sum += sample.error_m;
                error_count += 1;
            }

            if let Some(export) = export.as_deref_mut() {
                if world.frames_rendered() % self.export_every == 0 {
                    export.add_frame(SimFrame {
                        time_sec: world.clock.time(),
                        buffered,
                        units: samples,
                        events: std::mem::take(&mut events),
                    });
                }
            }

            if tick % (self.config.physics_hz as u64).max(1) == 0 {
                debug!(
                    "  t={:.1}s | display={:.2}s | buffered={} | in_flight={}",
                    now,
                    world.clock.time(),
                    buffered,
                    world.link.in_flight()
                );
            }
        }

        if error_count > 0 {
            metrics.mean_error_m = error_sum / error_count as f64;
        }
        Ok(ticks)
    }

    /// Scenario assertions.
    fn check(&self, scenario: ScenarioId, metrics: &ScenarioMetrics) -> Result<(), String> {
        if metrics.frames_measured == 0 {
            return Err("no frame was ever displayed".to_string());
        }
        if metrics.order_violations > 0 {
            return Err(format!(
                "frame buffer out of order {} times",
                metrics.order_violations
            ));
        }
        if metrics.max_error_m > metrics.tolerance_m {
            return Err(format!(
                "max position error {:.3}m exceeds {:.3}m",
                metrics.max_error_m, metrics.tolerance_m
            ));
        }
        if metrics.max_buffered > self.config.max_frames.max(2) {
            return Err(format!("buffer grew to {} frames", metrics.max_buffered));
        }

        match scenario {
            ScenarioId::Jitter | ScenarioId::Duplicates if metrics.stream.batches_stale == 0 => {
                Err("link faults produced no stale batches".to_string())
            }
            ScenarioId::Reconnect if metrics.reconnects == 0 || metrics.stream.resets < 2 => {
                Err("no reconnect cycle happened".to_string())
            }
            _ => Ok(()),
        }
    }
}
