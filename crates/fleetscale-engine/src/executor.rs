//! Scaling executor — turns a decision into lifecycle commands.
//!
//! Scale-up starts each new instance and waits for its health endpoint.
//! Scale-down stops and removes the highest-numbered instances first. The
//! state is committed once, after the commands, with the count actually
//! reached.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use fleetscale_core::Thresholds;
use fleetscale_metrics::{HealthCheck, InstanceId, MetricsProbe};

use crate::error::{ExecutorError, LifecycleError};
use crate::lifecycle::InstanceLifecycle;
use crate::state::{Direction, ScalingDecision, ScalingState};

/// Result of an applied decision.
#[derive(Debug)]
pub struct ScaleOutcome {
    pub direction: Direction,
    pub from: u32,
    pub to: u32,
    /// Instances started or stopped, in the order they were handled.
    pub affected: Vec<InstanceId>,
    /// Started instances that never passed a health check.
    pub unconfirmed: Vec<InstanceId>,
    /// Commands that failed. Scale-down removal failures land here even
    /// though the instance counts as stopped.
    pub failures: Vec<(InstanceId, LifecycleError)>,
}

/// Applies scaling decisions through an `InstanceLifecycle`.
pub struct ScalingExecutor {
    lifecycle: Arc<dyn InstanceLifecycle>,
    probe: Arc<dyn MetricsProbe>,
    probe_timeout: Duration,
    poll_interval: Duration,
    health_timeout: Duration,
}

impl ScalingExecutor {
    pub fn new(lifecycle: Arc<dyn InstanceLifecycle>, probe: Arc<dyn MetricsProbe>) -> Self {
        Self {
            lifecycle,
            probe,
            probe_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            health_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set how often and how long a started instance is polled.
    pub fn with_health_wait(mut self, poll_interval: Duration, timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.health_timeout = timeout;
        self
    }

    /// Apply `decision` and commit the new instance count with `now` as the
    /// last scaling time.
    ///
    /// `None` decisions are a no-op. A target outside the bounds, or one
    /// that does not move in the decision's direction, is rejected before
    /// any command runs.
    pub async fn apply(
        &self,
        decision: &ScalingDecision,
        state: &mut ScalingState,
        thresholds: &Thresholds,
        now: Instant,
    ) -> Result<Option<ScaleOutcome>, ExecutorError> {
        let current = state.current_instances();
        let (direction, target) = match decision {
            ScalingDecision::None { .. } => return Ok(None),
            ScalingDecision::ScaleUp { target, .. } => (Direction::Up, *target),
            ScalingDecision::ScaleDown { target, .. } => (Direction::Down, *target),
        };

        check_target(direction, current, target, thresholds)?;

        let outcome = match direction {
            Direction::Up => self.scale_up(current, target).await,
            Direction::Down => self.scale_down(current, target).await,
        };

        if outcome.affected.is_empty() {
            // Nothing changed; leave the state alone so the next tick retries.
            let (id, source) = outcome
                .failures
                .into_iter()
                .next()
                .ok_or_else(|| ExecutorError::InvariantViolation("no instances affected".into()))?;
            return Err(ExecutorError::Lifecycle { id, source });
        }

        state.commit(outcome.to, now);
        info!(
            direction = %outcome.direction,
            from = outcome.from,
            to = outcome.to,
            reason = %decision.reason(),
            "scaling complete"
        );
        Ok(Some(outcome))
    }

    async fn scale_up(&self, current: u32, target: u32) -> ScaleOutcome {
        info!(from = current, to = target, "scaling up");
        let mut outcome = ScaleOutcome::new(Direction::Up, current);

        for id in current + 1..=target {
            if let Err(e) = self.lifecycle.start(id).await {
                error!(instance = id, error = %e, "failed to start instance");
                outcome.failures.push((id, e));
                break;
            }
            info!(instance = id, "instance started");

            if !self.wait_for_healthy(id).await {
                warn!(
                    instance = id,
                    timeout_secs = self.health_timeout.as_secs(),
                    "instance did not become healthy in time"
                );
                outcome.unconfirmed.push(id);
            }
            outcome.affected.push(id);
            outcome.to = id;
        }

        outcome
    }

    async fn scale_down(&self, current: u32, target: u32) -> ScaleOutcome {
        info!(from = current, to = target, "scaling down");
        let mut outcome = ScaleOutcome::new(Direction::Down, current);

        for id in (target + 1..=current).rev() {
            if let Err(e) = self.lifecycle.stop(id).await {
                error!(instance = id, error = %e, "failed to stop instance");
                outcome.failures.push((id, e));
                break;
            }
            if let Err(e) = self.lifecycle.remove(id).await {
                error!(instance = id, error = %e, "failed to remove stopped instance");
                outcome.failures.push((id, e));
            }
            info!(instance = id, "instance stopped");
            outcome.affected.push(id);
            outcome.to = id - 1;
        }

        outcome
    }

    /// Poll the instance's health endpoint until it answers 2xx or the
    /// health timeout elapses.
    async fn wait_for_healthy(&self, id: InstanceId) -> bool {
        let deadline = Instant::now() + self.health_timeout;
        loop {
            let check = tokio::time::timeout(self.probe_timeout, self.probe.probe_health(id))
                .await
                .unwrap_or(HealthCheck::Failed);
            if check.is_healthy() {
                info!(instance = id, "instance became healthy");
                return true;
            }
            debug!(instance = id, ?check, "instance not healthy yet");

            if Instant::now() + self.poll_interval > deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

impl ScaleOutcome {
    fn new(direction: Direction, from: u32) -> Self {
        Self {
            direction,
            from,
            to: from,
            affected: Vec::new(),
            unconfirmed: Vec::new(),
            failures: Vec::new(),
        }
    }
}

fn check_target(
    direction: Direction,
    current: u32,
    target: u32,
    thresholds: &Thresholds,
) -> Result<(), ExecutorError> {
    if !thresholds.in_bounds(target) {
        return Err(ExecutorError::InvariantViolation(format!(
            "target {target} outside [{}, {}]",
            thresholds.min_instances, thresholds.max_instances
        )));
    }
    let moves = match direction {
        Direction::Up => target > current,
        Direction::Down => target < current,
    };
    if !moves {
        return Err(ExecutorError::InvariantViolation(format!(
            "scale {direction} from {current} to {target}"
        )));
    }
    Ok(())
}
