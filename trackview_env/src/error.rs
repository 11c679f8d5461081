//! Error types for the TrackView environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Feed send failed (buffer full, receiver dropped, etc.)
    #[error("Feed error: {0}")]
    FeedError(String),

    /// The feed has been closed by the remote end
    #[error("Feed closed")]
    FeedClosed,

    /// Payload could not be decoded into a typed record
    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl EnvError {
    /// Creates a feed error.
    pub fn feed(msg: impl Into<String>) -> Self {
        Self::FeedError(msg.into())
    }

    /// Creates a decode error.
    pub fn decode(msg: impl std::fmt::Display) -> Self {
        Self::DecodeError(msg.to_string())
    }
}
