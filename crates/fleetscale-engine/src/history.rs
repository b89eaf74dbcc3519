//! In-memory record of recent scaling actions.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use fleetscale_metrics::InstanceId;

use crate::executor::ScaleOutcome;
use crate::state::Direction;

/// One applied scaling action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScalingEvent {
    /// Unix timestamp (seconds).
    pub at: u64,
    pub direction: Direction,
    pub from: u32,
    pub to: u32,
    pub reason: String,
    /// Started instances that never reported healthy.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub unconfirmed: Vec<InstanceId>,
    /// Number of lifecycle commands that failed.
    pub failures: usize,
}

impl ScalingEvent {
    pub fn from_outcome(outcome: &ScaleOutcome, reason: &str) -> Self {
        Self {
            at: epoch_secs(),
            direction: outcome.direction,
            from: outcome.from,
            to: outcome.to,
            reason: reason.to_string(),
            unconfirmed: outcome.unconfirmed.clone(),
            failures: outcome.failures.len(),
        }
    }
}

/// Bounded ring of scaling events, oldest first. Never persisted.
#[derive(Debug, Clone)]
pub struct ScalingHistory {
    events: VecDeque<ScalingEvent>,
    capacity: usize,
}

impl ScalingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn record(&mut self, event: ScalingEvent) {
        if self.capacity == 0 {
            return;
        }
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// The last `n` events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ScalingEvent> {
        let skip = self.events.len().saturating_sub(n);
        self.events.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
