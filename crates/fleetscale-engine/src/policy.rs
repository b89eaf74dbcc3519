//! Scaling policy — a pure function from recent metrics to a decision.
//!
//! # Algorithm
//!
//! ```text
//! if window.len < 3:               None("insufficient history")
//! if now - last_scale < cooldown:  None("cooldown active")
//!
//! averages over the last 3 snapshots:
//!     cpu, memory, response_ms, error_rate,
//!     healthy_ratio = avg(healthy_instances) / current
//!
//! if cpu > up_cpu || memory > 80 || response > 2000 || errors > 5 || ratio < 0.8:
//!     current < max ? ScaleUp(current + 1) : None("at max instances")
//! elif cpu < down_cpu && memory < 50 && response < 500 && errors < 1 && ratio >= 1.0
//!      && current > min:
//!     ScaleDown(current - 1)
//! else:
//!     None("no scaling needed")
//! ```
//!
//! Separate up and down thresholds give hysteresis; single-step targets
//! prevent overshoot.

use std::fmt;

use tokio::time::Instant;

use fleetscale_core::Thresholds;
use fleetscale_metrics::{Metric, MetricsWindow, WindowError};

use crate::state::{ScalingDecision, ScalingState, reason};

/// Snapshots averaged for each decision.
pub const DECISION_SAMPLES: usize = 3;

/// Window averages the decision is based on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowAverages {
    pub cpu: f64,
    pub memory: f64,
    pub response_ms: f64,
    pub error_rate: f64,
    pub healthy_ratio: f64,
}

impl WindowAverages {
    /// Average the last [`DECISION_SAMPLES`] snapshots.
    pub fn compute(window: &MetricsWindow, current_instances: u32) -> Result<Self, WindowError> {
        let avg = |metric| window.recent_average(metric, DECISION_SAMPLES);
        let healthy = avg(Metric::HealthyInstances)?;
        let healthy_ratio = if current_instances == 0 {
            0.0
        } else {
            healthy / f64::from(current_instances)
        };
        Ok(Self {
            cpu: avg(Metric::CpuPercent)?,
            memory: avg(Metric::MemoryPercent)?,
            response_ms: avg(Metric::ResponseTimeMs)?,
            error_rate: avg(Metric::ErrorRatePercent)?,
            healthy_ratio,
        })
    }

    /// Names of the scale-up conditions that hold.
    pub fn overload_triggers(&self, t: &Thresholds) -> Vec<&'static str> {
        let mut triggers = Vec::new();
        if self.cpu > t.scale_up_cpu {
            triggers.push("cpu");
        }
        if self.memory > t.scale_up_memory {
            triggers.push("memory");
        }
        if self.response_ms > t.scale_up_response_ms {
            triggers.push("response_time");
        }
        if self.error_rate > t.scale_up_error_rate {
            triggers.push("error_rate");
        }
        if self.healthy_ratio < t.min_healthy_ratio {
            triggers.push("healthy_ratio");
        }
        triggers
    }

    /// Every scale-down condition holds.
    pub fn is_idle(&self, t: &Thresholds) -> bool {
        self.cpu < t.scale_down_cpu
            && self.memory < t.scale_down_memory
            && self.response_ms < t.scale_down_response_ms
            && self.error_rate < t.scale_down_error_rate
            && self.healthy_ratio >= 1.0
    }
}

impl fmt::Display for WindowAverages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={:.1}%, memory={:.1}%, response={:.1}ms, errors={:.2}%, healthy={:.0}%",
            self.cpu,
            self.memory,
            self.response_ms,
            self.error_rate,
            self.healthy_ratio * 100.0
        )
    }
}

/// Decide whether to add or remove one instance.
pub fn decide(
    window: &MetricsWindow,
    state: &ScalingState,
    thresholds: &Thresholds,
    now: Instant,
) -> ScalingDecision {
    if window.len() < DECISION_SAMPLES {
        return ScalingDecision::none(reason::INSUFFICIENT_HISTORY);
    }

    if state.in_cooldown(thresholds.cooldown(), now) {
        return ScalingDecision::none(reason::COOLDOWN_ACTIVE);
    }

    let current = state.current_instances();
    let averages = match WindowAverages::compute(window, current) {
        Ok(averages) => averages,
        Err(WindowError::NotEnoughData { .. }) => {
            return ScalingDecision::none(reason::INSUFFICIENT_HISTORY);
        }
    };

    let triggers = averages.overload_triggers(thresholds);
    if !triggers.is_empty() {
        if current < thresholds.max_instances {
            return ScalingDecision::ScaleUp {
                target: current + 1,
                reason: format!("high load ({}): {averages}", triggers.join(", ")),
            };
        }
        return ScalingDecision::none(reason::AT_MAX_INSTANCES);
    }

    if averages.is_idle(thresholds) && current > thresholds.min_instances {
        return ScalingDecision::ScaleDown {
            target: current - 1,
            reason: format!("low load: {averages}"),
        };
    }

    ScalingDecision::none(reason::NO_SCALING_NEEDED)
}
