//! Bounded history of recent snapshots.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::WindowError;
use crate::snapshot::Snapshot;

/// Snapshots required before any average is reported.
pub const MIN_SAMPLES: usize = 3;

/// Numeric snapshot fields the window can average.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    CpuPercent,
    MemoryPercent,
    ResponseTimeMs,
    ErrorRatePercent,
    HealthyInstances,
}

impl Metric {
    pub fn read(self, snapshot: &Snapshot) -> f64 {
        match self {
            Metric::CpuPercent => snapshot.system.cpu_percent,
            Metric::MemoryPercent => snapshot.system.memory_percent,
            Metric::ResponseTimeMs => snapshot.application.avg_response_time_ms,
            Metric::ErrorRatePercent => snapshot.application.avg_error_rate_percent,
            Metric::HealthyInstances => f64::from(snapshot.application.healthy_instance_count),
        }
    }
}

/// FIFO of the last `capacity` snapshots, oldest first.
#[derive(Debug, Clone)]
pub struct MetricsWindow {
    snapshots: VecDeque<Snapshot>,
    capacity: usize,
}

impl MetricsWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, evicting the oldest when full.
    pub fn push(&mut self, snapshot: Snapshot) {
        if self.snapshots.len() == self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
    }

    /// Mean of `metric` over the last `min(k, len)` snapshots.
    pub fn recent_average(&self, metric: Metric, k: usize) -> Result<f64, WindowError> {
        if self.snapshots.len() < MIN_SAMPLES {
            return Err(WindowError::NotEnoughData {
                have: self.snapshots.len(),
                need: MIN_SAMPLES,
            });
        }
        let take = k.clamp(1, self.snapshots.len());
        let sum: f64 = self
            .snapshots
            .iter()
            .rev()
            .take(take)
            .map(|s| metric.read(s))
            .sum();
        Ok(sum / take as f64)
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
