//! In-memory collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetscale_core::Thresholds;
use fleetscale_engine::{
    Action, Engine, InstanceLifecycle, LifecycleError, LifecycleResult, ScalingExecutor,
};
use fleetscale_metrics::{
    BoxFuture, DatabaseSample, HealthCheck, InstanceId, InstanceSample, InstanceStats,
    MetricsAggregator, MetricsProbe, ProbeError, ProbeResult, SystemSample,
};

/// Load reported by every probe.
#[derive(Debug, Clone, Copy)]
pub struct Load {
    pub cpu: f64,
    pub memory: f64,
    pub response_ms: f64,
    pub error_rate: f64,
}

impl Load {
    pub const HIGH_CPU: Load = Load {
        cpu: 85.0,
        memory: 50.0,
        response_ms: 300.0,
        error_rate: 0.5,
    };

    pub const IDLE: Load = Load {
        cpu: 20.0,
        memory: 40.0,
        response_ms: 300.0,
        error_rate: 0.5,
    };

    pub const STEADY: Load = Load {
        cpu: 50.0,
        memory: 60.0,
        response_ms: 800.0,
        error_rate: 2.0,
    };
}

/// Every instance answers with the current load; health checks pass unless
/// the instance is marked unhealthy.
pub struct FakeProbe {
    load: Mutex<Load>,
    unhealthy: Mutex<HashSet<InstanceId>>,
    system_fails: AtomicBool,
    system_hangs: AtomicBool,
    system_calls: AtomicUsize,
}

impl FakeProbe {
    pub fn new(load: Load) -> Self {
        Self {
            load: Mutex::new(load),
            unhealthy: Mutex::new(HashSet::new()),
            system_fails: AtomicBool::new(false),
            system_hangs: AtomicBool::new(false),
            system_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_load(&self, load: Load) {
        *self.load.lock().unwrap() = load;
    }

    pub fn mark_unhealthy(&self, id: InstanceId) {
        self.unhealthy.lock().unwrap().insert(id);
    }

    pub fn fail_system(&self, fail: bool) {
        self.system_fails.store(fail, Ordering::SeqCst);
    }

    pub fn hang_system(&self, hang: bool) {
        self.system_hangs.store(hang, Ordering::SeqCst);
    }

    /// Collections attempted so far.
    pub fn system_calls(&self) -> usize {
        self.system_calls.load(Ordering::SeqCst)
    }

    fn load(&self) -> Load {
        *self.load.lock().unwrap()
    }
}

impl MetricsProbe for FakeProbe {
    fn probe_system(&self) -> BoxFuture<'_, ProbeResult<SystemSample>> {
        self.system_calls.fetch_add(1, Ordering::SeqCst);
        let load = self.load();
        let fails = self.system_fails.load(Ordering::SeqCst);
        let hangs = self.system_hangs.load(Ordering::SeqCst);
        Box::pin(async move {
            if hangs {
                std::future::pending::<()>().await;
            }
            if fails {
                return Err(ProbeError::System("host unavailable".into()));
            }
            Ok(SystemSample {
                cpu_percent: load.cpu,
                memory_percent: load.memory,
                ..SystemSample::default()
            })
        })
    }

    fn probe_instance(&self, _id: InstanceId) -> BoxFuture<'_, ProbeResult<InstanceSample>> {
        let load = self.load();
        Box::pin(async move {
            let stats = InstanceStats {
                total_requests: 100,
                active_connections: 1,
                response_time_avg: load.response_ms,
                error_rate: load.error_rate,
                status: None,
            };
            Ok(InstanceSample {
                raw: serde_json::to_value(&stats).unwrap(),
                stats,
            })
        })
    }

    fn probe_database(&self) -> BoxFuture<'_, ProbeResult<DatabaseSample>> {
        Box::pin(async {
            Ok(DatabaseSample {
                detail: serde_json::json!({ "connections": 1 }),
            })
        })
    }

    fn probe_health(&self, id: InstanceId) -> BoxFuture<'_, HealthCheck> {
        let healthy = !self.unhealthy.lock().unwrap().contains(&id);
        Box::pin(async move {
            if healthy {
                HealthCheck::Healthy
            } else {
                HealthCheck::Unhealthy
            }
        })
    }

    fn instance_port(&self, id: InstanceId) -> u16 {
        5000 + id as u16
    }
}

/// Records every command; optionally fails one kind of action.
#[derive(Default)]
pub struct RecordingLifecycle {
    calls: Mutex<Vec<(Action, InstanceId)>>,
    failing: Mutex<Option<Action>>,
}

impl RecordingLifecycle {
    pub fn failing(action: Action) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(Some(action)),
        }
    }

    pub fn calls(&self) -> Vec<(Action, InstanceId)> {
        self.calls.lock().unwrap().clone()
    }

    fn run(&self, action: Action, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        self.calls.lock().unwrap().push((action, id));
        let fail = *self.failing.lock().unwrap() == Some(action);
        Box::pin(async move {
            if fail {
                Err(LifecycleError::CommandFailed {
                    command: format!("{action:?} app-{id}"),
                    code: Some(1),
                    stderr: "no such service".into(),
                })
            } else {
                Ok(())
            }
        })
    }
}

impl InstanceLifecycle for RecordingLifecycle {
    fn start(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        self.run(Action::Start, id)
    }

    fn stop(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        self.run(Action::Stop, id)
    }

    fn remove(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        self.run(Action::Remove, id)
    }
}

pub fn thresholds(initial: u32) -> Thresholds {
    Thresholds {
        min_instances: 2,
        max_instances: 10,
        initial_instances: initial,
        ..Thresholds::default()
    }
}

pub fn executor(lifecycle: Arc<RecordingLifecycle>, probe: Arc<FakeProbe>) -> ScalingExecutor {
    ScalingExecutor::new(lifecycle, probe)
        .with_health_wait(Duration::from_secs(1), Duration::from_secs(3))
}

pub fn engine(
    thresholds: Thresholds,
    probe: Arc<FakeProbe>,
    lifecycle: Arc<RecordingLifecycle>,
) -> Engine {
    let aggregator = MetricsAggregator::new(probe.clone(), Duration::from_secs(5));
    Engine::new(thresholds, aggregator, executor(lifecycle, probe))
}
