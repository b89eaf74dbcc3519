//! Probe, collection, and window error types.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for a single probe call.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Failure of a single probe. Contained at the aggregator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("endpoint returned status {0}")]
    Status(u16),

    #[error("invalid response body: {0}")]
    Decode(String),

    #[error("system sampling failed: {0}")]
    System(String),
}

impl ProbeError {
    /// The endpoint answered, just not with success.
    pub fn is_response(&self) -> bool {
        matches!(self, ProbeError::Status(_))
    }
}

/// Failure of a whole collection tick.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("system probe failed: {0}")]
    System(#[source] ProbeError),
}

/// Errors from windowed averaging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("not enough data: have {have} snapshots, need {need}")]
    NotEnoughData { have: usize, need: usize },
}
