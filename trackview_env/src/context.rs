//! Core environment context trait for TrackView clients.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the TrackView stream
/// client can run in both production (tokio) and simulation (virtual
/// clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time`
/// - **Simulation**: `SimContext` - wraps a virtual clock and a seed
///
/// # Determinism
///
/// For simulation testing, all methods that would normally introduce
/// non-determinism (time, task scheduling) are controlled by the
/// implementation.
#[async_trait]
pub trait TrackViewContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Drives the display clock cadence. In simulation, this is the
    /// virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used to stamp arrivals in logs.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
