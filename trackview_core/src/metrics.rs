//! TrackView Stream Metrics
//! ========================
//!
//! Counters describing how the status stream and the display are behaving:
//! - **Ingest**: appended, stale (non-monotonic) and rejected batches
//! - **Memory**: frames pruned behind the display and evicted by the cap
//! - **Queries**: which lookup branch answered each display query
//!
//! Plain counters, cheap to clone and serialize next to a scenario report.

use serde::{Deserialize, Serialize};

/// Which branch of the lookup answered a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPath {
    /// Buffer empty, nothing returned
    Empty,
    /// Exactly one frame held, returned as-is
    Single,
    /// A frame sat exactly at the query time
    Exact,
    /// Query beyond either end of the buffer, edge frame held
    EdgeHold,
    /// Synthesized between two brackets
    Interpolated,
    /// Query time was not finite
    Invalid,
}

/// Counters for one timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetrics {
    /// Batches merged and appended as a new frame
    pub batches_appended: u64,
    /// Batches dropped because their timestamp did not advance
    pub batches_stale: u64,
    /// Batches rejected for an invalid timestamp
    pub batches_rejected: u64,

    /// Frames removed behind the display position
    pub frames_pruned: u64,
    /// Frames removed because the buffer hit its cap
    pub frames_evicted: u64,

    pub resets: u64,

    pub queries_empty: u64,
    pub queries_single: u64,
    pub queries_exact: u64,
    pub queries_edge_hold: u64,
    pub queries_interpolated: u64,
    pub queries_invalid: u64,
}

impl StreamMetrics {
    pub fn record_query(&mut self, path: QueryPath) {
        match path {
            QueryPath::Empty => self.queries_empty += 1,
            QueryPath::Single => self.queries_single += 1,
            QueryPath::Exact => self.queries_exact += 1,
            QueryPath::EdgeHold => self.queries_edge_hold += 1,
            QueryPath::Interpolated => self.queries_interpolated += 1,
            QueryPath::Invalid => self.queries_invalid += 1,
        }
    }

    pub fn total_queries(&self) -> u64 {
        self.queries_empty
            + self.queries_single
            + self.queries_exact
            + self.queries_edge_hold
            + self.queries_interpolated
            + self.queries_invalid
    }

    /// Batches seen by ingest, whatever their outcome.
    pub fn total_batches(&self) -> u64 {
        self.batches_appended + self.batches_stale + self.batches_rejected
    }

    /// Fraction of batches dropped as stale [0, 1].
    pub fn stale_ratio(&self) -> f64 {
        let total = self.total_batches();
        if total == 0 {
            0.0
        } else {
            self.batches_stale as f64 / total as f64
        }
    }

    /// Fraction of queries that needed interpolation [0, 1].
    pub fn interpolation_ratio(&self) -> f64 {
        let total = self.total_queries();
        if total == 0 {
            0.0
        } else {
            self.queries_interpolated as f64 / total as f64
        }
    }
}
