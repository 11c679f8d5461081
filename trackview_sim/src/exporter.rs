//! JSON exporter for offline inspection.
//!
//! Exports sampled display frames next to ground truth, so a run can be
//! plotted or diffed after the fact.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use trackview_core::{StreamMetrics, UnitId, WorldPose};

/// A single sampled display frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Display clock time in seconds
    pub time_sec: f64,

    /// Frames held by the timeline at this point
    pub buffered: usize,

    pub units: Vec<UnitSample>,

    /// Events since the previous frame (reconnects, ...)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SimEvent>,
}

/// Displayed vs true pose of one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSample {
    pub id: UnitId,
    pub shown: PoseSample,
    pub truth: PoseSample,
    /// Distance between the two in meters
    pub error_m: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub heading: f64,
}

impl From<&WorldPose> for PoseSample {
    fn from(pose: &WorldPose) -> Self {
        Self {
            x: pose.x(),
            y: pose.y(),
            z: pose.z(),
            heading: pose.heading,
        }
    }
}

impl UnitSample {
    pub fn new(id: UnitId, shown: &WorldPose, truth: &WorldPose) -> Self {
        Self {
            id,
            shown: shown.into(),
            truth: truth.into(),
            error_m: shown.distance_to(truth),
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
}

impl SimEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    pub scenario: String,
    pub seed: u64,

    /// Display time of the last frame
    pub duration_sec: f64,

    pub frames: Vec<SimFrame>,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_error_m: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamMetrics>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            max_error_m: None,
            stream: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, max_error_m: Option<f64>, stream: StreamMetrics) {
        self.passed = passed;
        self.max_error_m = max_error_m;
        self.stream = Some(stream);
    }

    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    #[test]
    fn test_unit_sample_error() {
        let shown = WorldPose {
            position: Point3::new(0.0, 0.0, 0.0),
            heading: 0.0,
        };
        let truth = WorldPose {
            position: Point3::new(3.0, 4.0, 0.0),
            heading: 0.0,
        };
        let sample = UnitSample::new(UnitId(1), &shown, &truth);
        assert_eq!(sample.error_m, 5.0);
    }

    #[test]
    fn test_export_json_shape() {
        let mut export = SimExport::new("steady", 42);
        export.add_frame(SimFrame {
            time_sec: 1.5,
            buffered: 2,
            units: Vec::new(),
            events: vec![SimEvent::info("connected")],
        });
        export.finalize(true, Some(0.1), StreamMetrics::default());

        let value = serde_json::to_value(&export).unwrap();
        assert_eq!(value["duration_sec"], 1.5);
        assert_eq!(value["frames"][0]["events"][0]["message"], "connected");
        assert_eq!(value["stream"]["resets"], 0);
    }
}
