//! End-to-end scaling ticks against in-memory probes and lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use common::{FakeProbe, Load, RecordingLifecycle, engine, executor, thresholds};
use fleetscale_engine::{
    Action, Direction, ExecutorError, ScalingDecision, ScalingState, TickError, reason,
};

#[tokio::test(start_paused = true)]
async fn sustained_high_cpu_adds_one_instance() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let mut engine = engine(thresholds(3), probe.clone(), lifecycle.clone());

    for _ in 0..2 {
        let report = engine.tick().await.unwrap();
        assert_eq!(report.decision.reason(), reason::INSUFFICIENT_HISTORY);
    }

    let report = engine.tick().await.unwrap();
    assert!(matches!(
        report.decision,
        ScalingDecision::ScaleUp { target: 4, .. }
    ));
    assert!(report.decision.reason().starts_with("high load (cpu)"));

    let outcome = report.outcome.unwrap();
    assert_eq!(outcome.direction, Direction::Up);
    assert_eq!(outcome.affected, vec![4]);
    assert!(outcome.unconfirmed.is_empty());
    assert_eq!(lifecycle.calls(), vec![(Action::Start, 4)]);

    assert_eq!(engine.state().current_instances(), 4);
    assert!(engine.state().last_scale_at().is_some());
    assert_eq!(engine.history().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn tick_after_scaling_is_in_cooldown() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let mut engine = engine(thresholds(3), probe, lifecycle.clone());

    for _ in 0..3 {
        engine.tick().await.unwrap();
    }
    assert_eq!(engine.state().current_instances(), 4);

    tokio::time::advance(Duration::from_secs(60)).await;
    let report = engine.tick().await.unwrap();
    assert_eq!(report.decision.reason(), reason::COOLDOWN_ACTIVE);
    assert!(report.outcome.is_none());

    // Once the cooldown has passed the sustained load scales again.
    tokio::time::advance(Duration::from_secs(300)).await;
    let report = engine.tick().await.unwrap();
    assert!(matches!(
        report.decision,
        ScalingDecision::ScaleUp { target: 5, .. }
    ));
    assert_eq!(lifecycle.calls(), vec![(Action::Start, 4), (Action::Start, 5)]);
}

#[tokio::test(start_paused = true)]
async fn idle_fleet_sheds_one_instance() {
    let probe = Arc::new(FakeProbe::new(Load::IDLE));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let mut engine = engine(thresholds(4), probe, lifecycle.clone());

    for _ in 0..2 {
        engine.tick().await.unwrap();
    }
    let report = engine.tick().await.unwrap();
    assert!(matches!(
        report.decision,
        ScalingDecision::ScaleDown { target: 3, .. }
    ));
    assert!(report.decision.reason().starts_with("low load"));
    assert_eq!(
        lifecycle.calls(),
        vec![(Action::Stop, 4), (Action::Remove, 4)]
    );
    assert_eq!(engine.state().current_instances(), 3);
}

#[tokio::test(start_paused = true)]
async fn idle_fleet_at_minimum_stays() {
    let probe = Arc::new(FakeProbe::new(Load::IDLE));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let mut engine = engine(thresholds(2), probe, lifecycle.clone());

    for _ in 0..4 {
        let report = engine.tick().await.unwrap();
        assert!(report.decision.is_none());
    }
    assert_eq!(
        engine.status().last_decision.unwrap().reason(),
        reason::NO_SCALING_NEEDED
    );
    assert!(lifecycle.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn steady_load_does_nothing() {
    let probe = Arc::new(FakeProbe::new(Load::STEADY));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let mut engine = engine(thresholds(3), probe, lifecycle.clone());

    for _ in 0..5 {
        engine.tick().await.unwrap();
    }
    assert_eq!(engine.state().current_instances(), 3);
    assert!(engine.state().last_scale_at().is_none());
    assert!(engine.history().is_empty());
    assert!(lifecycle.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn scale_down_removes_highest_numbered_first() {
    let probe = Arc::new(FakeProbe::new(Load::IDLE));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let executor = executor(lifecycle.clone(), probe);
    let t = thresholds(5);
    let mut state = ScalingState::new(5);
    let now = Instant::now();

    let decision = ScalingDecision::ScaleDown {
        target: 3,
        reason: "low load".into(),
    };
    let outcome = executor
        .apply(&decision, &mut state, &t, now)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.affected, vec![5, 4]);
    assert_eq!(
        lifecycle.calls(),
        vec![
            (Action::Stop, 5),
            (Action::Remove, 5),
            (Action::Stop, 4),
            (Action::Remove, 4),
        ]
    );
    assert_eq!(state.current_instances(), 3);
    assert_eq!(state.last_scale_at(), Some(now));
}

#[tokio::test(start_paused = true)]
async fn instance_that_never_gets_healthy_still_counts() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    probe.mark_unhealthy(4);
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let executor = executor(lifecycle.clone(), probe);
    let t = thresholds(3);
    let mut state = ScalingState::new(3);
    let now = Instant::now();

    let decision = ScalingDecision::ScaleUp {
        target: 4,
        reason: "high load".into(),
    };
    let outcome = executor
        .apply(&decision, &mut state, &t, now)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.affected, vec![4]);
    assert_eq!(outcome.unconfirmed, vec![4]);
    assert_eq!(state.current_instances(), 4);
    assert_eq!(state.last_scale_at(), Some(now));
}

#[tokio::test(start_paused = true)]
async fn failed_start_leaves_state_untouched() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    let lifecycle = Arc::new(RecordingLifecycle::failing(Action::Start));
    let executor = executor(lifecycle.clone(), probe);
    let t = thresholds(3);
    let mut state = ScalingState::new(3);

    let decision = ScalingDecision::ScaleUp {
        target: 4,
        reason: "high load".into(),
    };
    let err = executor
        .apply(&decision, &mut state, &t, Instant::now())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::Lifecycle { id: 4, .. }));
    assert_eq!(state.current_instances(), 3);
    assert!(state.last_scale_at().is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_removal_still_counts_as_stopped() {
    let probe = Arc::new(FakeProbe::new(Load::IDLE));
    let lifecycle = Arc::new(RecordingLifecycle::failing(Action::Remove));
    let executor = executor(lifecycle.clone(), probe);
    let t = thresholds(4);
    let mut state = ScalingState::new(4);

    let decision = ScalingDecision::ScaleDown {
        target: 3,
        reason: "low load".into(),
    };
    let outcome = executor
        .apply(&decision, &mut state, &t, Instant::now())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.affected, vec![4]);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(state.current_instances(), 3);
}

#[tokio::test(start_paused = true)]
async fn engine_reports_failed_apply_and_retries_next_tick() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    let lifecycle = Arc::new(RecordingLifecycle::failing(Action::Start));
    let mut engine = engine(thresholds(3), probe, lifecycle.clone());

    for _ in 0..2 {
        engine.tick().await.unwrap();
    }
    let err = engine.tick().await.unwrap_err();
    assert!(matches!(err, TickError::Execute(ExecutorError::Lifecycle { .. })));
    assert_eq!(engine.state().current_instances(), 3);

    // No cooldown was stamped, so the next tick tries again.
    let err = engine.tick().await.unwrap_err();
    assert!(matches!(err, TickError::Execute(_)));
    assert_eq!(lifecycle.calls(), vec![(Action::Start, 4), (Action::Start, 4)]);
    assert!(engine.history().is_empty());
}

#[tokio::test]
async fn out_of_bounds_target_runs_no_commands() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let executor = executor(lifecycle.clone(), probe);
    let t = thresholds(10);
    let mut state = ScalingState::new(10);

    let decision = ScalingDecision::ScaleUp {
        target: 11,
        reason: "high load".into(),
    };
    let err = executor
        .apply(&decision, &mut state, &t, Instant::now())
        .await
        .unwrap_err();

    assert!(matches!(err, ExecutorError::InvariantViolation(_)));
    assert!(lifecycle.calls().is_empty());
    assert_eq!(state.current_instances(), 10);
}

#[tokio::test(start_paused = true)]
async fn failed_collection_is_a_tick_error() {
    let probe = Arc::new(FakeProbe::new(Load::HIGH_CPU));
    probe.fail_system(true);
    let lifecycle = Arc::new(RecordingLifecycle::default());
    let mut engine = engine(thresholds(3), probe, lifecycle);

    let err = engine.tick().await.unwrap_err();
    assert!(matches!(err, TickError::Collect(_)));
    assert!(engine.window().is_empty());
}
