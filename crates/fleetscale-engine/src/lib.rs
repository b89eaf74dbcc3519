//! fleetscale-engine — scaling decisions and the loop that applies them.
//!
//! Each tick collects a `Snapshot`, pushes it into the metrics window, runs
//! the threshold policy over the most recent samples, and, when the policy
//! asks for it, starts or stops one instance through the lifecycle
//! collaborator.
//!
//! # Decision rules
//!
//! ```text
//! fewer than 3 samples           → None("insufficient history")
//! inside cooldown                → None("cooldown active")
//! any overload trigger           → ScaleUp(n + 1)   or None("at max instances")
//! every idle condition, n > min  → ScaleDown(n - 1)
//! otherwise                      → None("no scaling needed")
//! ```
//!
//! The instance count only changes through `ScalingExecutor::apply`, which
//! also stamps the cooldown clock. Overload always wins over idle.

pub mod control;
pub mod engine;
pub mod error;
pub mod executor;
pub mod history;
pub mod lifecycle;
pub mod policy;
pub mod state;

pub use control::{ControlLoop, FAILURE_BACKOFF};
pub use engine::{Engine, ScalerStatus, TickReport};
pub use error::{ExecutorError, LifecycleError, LifecycleResult, TickError};
pub use executor::{ScaleOutcome, ScalingExecutor};
pub use history::{ScalingEvent, ScalingHistory};
pub use lifecycle::{Action, ComposeLifecycle, InstanceLifecycle};
pub use policy::{DECISION_SAMPLES, WindowAverages, decide};
pub use state::{Direction, ScalingDecision, ScalingState, reason};
