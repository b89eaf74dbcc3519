//! Engine error types.

use std::time::Duration;

use thiserror::Error;

use fleetscale_metrics::{CollectError, InstanceId};

/// Result type alias for lifecycle commands.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Failure of a single lifecycle command.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` did not finish within {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// Errors from applying a scaling decision.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The decision would break the instance-count invariant. Nothing was applied.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// No instance could be started or stopped. State is unchanged.
    #[error("lifecycle command for instance {id} failed: {source}")]
    Lifecycle {
        id: InstanceId,
        #[source]
        source: LifecycleError,
    },
}

/// Errors that end a tick early.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("metrics collection failed: {0}")]
    Collect(#[from] CollectError),

    #[error("scaling execution failed: {0}")]
    Execute(#[from] ExecutorError),
}
