//! Engine — the state owned by the control loop and one tick over it.

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{error, info};

use fleetscale_core::Thresholds;
use fleetscale_metrics::{CollectError, MetricsAggregator, MetricsWindow, Snapshot};

use crate::error::TickError;
use crate::executor::{ScaleOutcome, ScalingExecutor};
use crate::history::{ScalingEvent, ScalingHistory};
use crate::policy;
use crate::state::{ScalingDecision, ScalingState};

/// Events included in a status report.
const STATUS_EVENTS: usize = 10;

/// What one tick decided and did.
#[derive(Debug)]
pub struct TickReport {
    pub decision: ScalingDecision,
    /// Present when the decision was applied.
    pub outcome: Option<ScaleOutcome>,
}

/// Read-only view of the engine for status queries.
#[derive(Debug, Clone, Serialize)]
pub struct ScalerStatus {
    pub running: bool,
    pub current_instances: u32,
    pub min_instances: u32,
    pub max_instances: u32,
    /// Cooldown left when this status was published.
    pub cooldown_remaining_secs: u64,
    pub window_len: usize,
    pub last_decision: Option<ScalingDecision>,
    pub recent_events: Vec<ScalingEvent>,
    #[serde(skip)]
    last_scale_at: Option<Instant>,
    #[serde(skip)]
    cooldown: Duration,
}

impl ScalerStatus {
    /// Cooldown left at `now`, for statuses read some time after publishing.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.last_scale_at {
            Some(at) => self.cooldown.saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }
}

/// Scaling state, metrics window, and the collaborators a tick drives.
///
/// Owned by exactly one control loop; ticks run strictly one at a time.
pub struct Engine {
    thresholds: Thresholds,
    pub(crate) state: ScalingState,
    window: MetricsWindow,
    history: ScalingHistory,
    last_decision: Option<ScalingDecision>,
    aggregator: MetricsAggregator,
    executor: ScalingExecutor,
}

impl Engine {
    pub fn new(
        thresholds: Thresholds,
        aggregator: MetricsAggregator,
        executor: ScalingExecutor,
    ) -> Self {
        Self {
            state: ScalingState::new(thresholds.initial_instances),
            window: MetricsWindow::new(thresholds.window_size),
            history: ScalingHistory::new(thresholds.history_size),
            last_decision: None,
            thresholds,
            aggregator,
            executor,
        }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    pub fn state(&self) -> &ScalingState {
        &self.state
    }

    pub fn window(&self) -> &MetricsWindow {
        &self.window
    }

    pub fn history(&self) -> &ScalingHistory {
        &self.history
    }

    /// Sample every probe for the current fleet. Safe to cancel.
    pub async fn collect(&self) -> Result<Snapshot, CollectError> {
        self.aggregator.collect(self.state.current_instances()).await
    }

    /// Record `snapshot`, decide, and apply the decision.
    ///
    /// `now` becomes the last scaling time if the decision is applied.
    pub async fn evaluate(
        &mut self,
        snapshot: Snapshot,
        now: Instant,
    ) -> Result<TickReport, TickError> {
        self.window.push(snapshot);

        let decision = policy::decide(&self.window, &self.state, &self.thresholds, now);
        self.last_decision = Some(decision.clone());
        let current = self.state.current_instances();

        let Some(target) = decision.target() else {
            info!(
                instances = current,
                reason = %decision.reason(),
                "no scaling action"
            );
            return Ok(TickReport {
                decision,
                outcome: None,
            });
        };

        info!(
            from = current,
            to = target,
            reason = %decision.reason(),
            "applying scaling decision"
        );

        match self
            .executor
            .apply(&decision, &mut self.state, &self.thresholds, now)
            .await
        {
            Ok(outcome) => {
                if let Some(outcome) = &outcome {
                    self.history
                        .record(ScalingEvent::from_outcome(outcome, decision.reason()));
                }
                Ok(TickReport { decision, outcome })
            }
            Err(e) => {
                error!(
                    from = current,
                    to = target,
                    reason = %decision.reason(),
                    error = %e,
                    "scaling decision not applied"
                );
                Err(TickError::Execute(e))
            }
        }
    }

    /// One full tick: collect, then evaluate at the time collection finished.
    pub async fn tick(&mut self) -> Result<TickReport, TickError> {
        let snapshot = self.collect().await?;
        self.evaluate(snapshot, Instant::now()).await
    }

    pub fn status(&self) -> ScalerStatus {
        ScalerStatus {
            running: self.state.is_running(),
            current_instances: self.state.current_instances(),
            min_instances: self.thresholds.min_instances,
            max_instances: self.thresholds.max_instances,
            cooldown_remaining_secs: self
                .state
                .cooldown_remaining(self.thresholds.cooldown(), Instant::now())
                .as_secs(),
            window_len: self.window.len(),
            last_decision: self.last_decision.clone(),
            recent_events: self.history.recent(STATUS_EVENTS),
            last_scale_at: self.state.last_scale_at(),
            cooldown: self.thresholds.cooldown(),
        }
    }
}
