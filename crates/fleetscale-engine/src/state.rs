//! Scaling state and decisions.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

/// Reasons attached to `ScalingDecision::None`.
pub mod reason {
    pub const INSUFFICIENT_HISTORY: &str = "insufficient history";
    pub const COOLDOWN_ACTIVE: &str = "cooldown active";
    pub const AT_MAX_INSTANCES: &str = "at max instances";
    pub const NO_SCALING_NEEDED: &str = "no scaling needed";
}

/// The engine's authoritative view of the fleet.
///
/// `current_instances` and `last_scale_at` change only through
/// [`ScalingState::commit`], which the executor calls once per applied
/// decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScalingState {
    current_instances: u32,
    last_scale_at: Option<Instant>,
    running: bool,
}

impl ScalingState {
    pub fn new(initial_instances: u32) -> Self {
        Self {
            current_instances: initial_instances,
            last_scale_at: None,
            running: false,
        }
    }

    /// State as it would be right after a scaling action at `at`.
    pub fn scaled_at(current_instances: u32, at: Instant) -> Self {
        Self {
            current_instances,
            last_scale_at: Some(at),
            running: false,
        }
    }

    pub fn current_instances(&self) -> u32 {
        self.current_instances
    }

    pub fn last_scale_at(&self) -> Option<Instant> {
        self.last_scale_at
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Time left before another scaling action is allowed.
    pub fn cooldown_remaining(&self, cooldown: Duration, now: Instant) -> Duration {
        match self.last_scale_at {
            Some(at) => cooldown.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    pub fn in_cooldown(&self, cooldown: Duration, now: Instant) -> bool {
        !self.cooldown_remaining(cooldown, now).is_zero()
    }

    /// Record a completed scaling action.
    pub(crate) fn commit(&mut self, current_instances: u32, now: Instant) {
        self.current_instances = current_instances;
        self.last_scale_at = Some(now);
    }
}

/// Direction of a scaling action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Output of the scaling policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScalingDecision {
    None { reason: String },
    ScaleUp { target: u32, reason: String },
    ScaleDown { target: u32, reason: String },
}

impl ScalingDecision {
    pub fn none(reason: impl Into<String>) -> Self {
        ScalingDecision::None {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            ScalingDecision::None { reason }
            | ScalingDecision::ScaleUp { reason, .. }
            | ScalingDecision::ScaleDown { reason, .. } => reason,
        }
    }

    pub fn target(&self) -> Option<u32> {
        match self {
            ScalingDecision::None { .. } => None,
            ScalingDecision::ScaleUp { target, .. } | ScalingDecision::ScaleDown { target, .. } => {
                Some(*target)
            }
        }
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            ScalingDecision::None { .. } => None,
            ScalingDecision::ScaleUp { .. } => Some(Direction::Up),
            ScalingDecision::ScaleDown { .. } => Some(Direction::Down),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ScalingDecision::None { .. })
    }
}
