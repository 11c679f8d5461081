//! Stream fault scenarios.

use crate::network::LinkFaults;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// TV-001: Clean link, every change reported
    Steady,

    /// TV-002: Heavy jitter and reordering
    Jitter,

    /// TV-003: Duplicated and lost batches
    Duplicates,

    /// TV-004: Connection drops and comes back
    Reconnect,

    /// TV-005: Robots reported only every few batches
    Sparse,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Steady,
            ScenarioId::Jitter,
            ScenarioId::Duplicates,
            ScenarioId::Reconnect,
            ScenarioId::Sparse,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "steady",
            ScenarioId::Jitter => "jitter",
            ScenarioId::Duplicates => "duplicates",
            ScenarioId::Reconnect => "reconnect",
            ScenarioId::Sparse => "sparse",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Steady => "Clean 50ms link, 10Hz status, display must track ground truth",
            ScenarioId::Jitter => "0-250ms jitter with 20% reordering, stale batches dropped",
            ScenarioId::Duplicates => "30% duplicated and 10% lost batches",
            ScenarioId::Reconnect => "Link drops every 8s, history cleared on reconnect",
            ScenarioId::Sparse => "Each robot mentioned every 3rd batch only, fields persist",
        }
    }

    /// Link fault profile used by the scenario.
    pub fn faults(&self) -> LinkFaults {
        match self {
            ScenarioId::Steady | ScenarioId::Reconnect | ScenarioId::Sparse => LinkFaults::default(),
            ScenarioId::Jitter => LinkFaults {
                jitter_s: 0.25,
                reorder_rate: 0.2,
                ..Default::default()
            },
            ScenarioId::Duplicates => LinkFaults {
                duplicate_rate: 0.3,
                loss_rate: 0.1,
                ..Default::default()
            },
        }
    }

    /// Robots are mentioned in every n-th status batch.
    pub fn mention_every(&self) -> u32 {
        match self {
            ScenarioId::Sparse => 3,
            _ => 1,
        }
    }

    /// Seconds between forced disconnects, if any.
    pub fn disconnect_every_s(&self) -> Option<f64> {
        match self {
            ScenarioId::Reconnect => Some(8.0),
            _ => None,
        }
    }

    /// Largest acceptable display position error in meters.
    ///
    /// `speed_mps` is the mean robot speed, `status_interval_s` the time
    /// between two status batches.
    pub fn tolerance_m(&self, speed_mps: f64, status_interval_s: f64) -> f64 {
        // Robots may speed up to +20% and start or stop between two batches
        let per_batch = 1.2 * speed_mps * status_interval_s;
        match self {
            ScenarioId::Steady | ScenarioId::Reconnect => per_batch + 0.05,
            // A lost delta is never resent, a stop may go unreported until the next move
            ScenarioId::Duplicates => 2.0 * per_batch + 0.05,
            // Stale batches are dropped, widening the gap between frames
            ScenarioId::Jitter => 4.0 * per_batch + 0.05,
            ScenarioId::Sparse => (self.mention_every() + 1) as f64 * per_batch + 0.05,
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "steady" | "tv-001" => Ok(ScenarioId::Steady),
            "jitter" | "tv-002" => Ok(ScenarioId::Jitter),
            "duplicates" | "dup" | "tv-003" => Ok(ScenarioId::Duplicates),
            "reconnect" | "tv-004" => Ok(ScenarioId::Reconnect),
            "sparse" | "tv-005" => Ok(ScenarioId::Sparse),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
