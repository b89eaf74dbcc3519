//! Metrics aggregator — one concurrent sampling pass per tick.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{CollectError, ProbeResult};
use crate::probe::{MetricsProbe, bounded};
use crate::snapshot::{
    ApplicationMetrics, DatabaseMetrics, InstanceId, InstanceReport, InstanceSample, Snapshot,
};

/// Fans out to every probe and merges the results into a `Snapshot`.
#[derive(Clone)]
pub struct MetricsAggregator {
    probe: Arc<dyn MetricsProbe>,
    timeout: Duration,
}

impl MetricsAggregator {
    pub fn new(probe: Arc<dyn MetricsProbe>, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    pub fn probe(&self) -> &Arc<dyn MetricsProbe> {
        &self.probe
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sample the host, the database, and instances `1..=current_instances`.
    ///
    /// All probes run concurrently and each is bounded by the probe timeout.
    /// Instance and database failures are recorded in the snapshot; only a
    /// failed system probe is returned as an error. Dropping the returned
    /// future cancels every outstanding probe.
    pub async fn collect(&self, current_instances: u32) -> Result<Snapshot, CollectError> {
        let mut instance_probes = JoinSet::new();
        for id in 1..=current_instances {
            let probe = self.probe.clone();
            let timeout = self.timeout;
            instance_probes.spawn(async move {
                let result = bounded(timeout, probe.probe_instance(id)).await;
                (id, result)
            });
        }

        let (system, database, instance_results) = tokio::join!(
            bounded(self.timeout, self.probe.probe_system()),
            bounded(self.timeout, self.probe.probe_database()),
            join_instances(&mut instance_probes),
        );

        let system = system.map_err(CollectError::System)?;

        if let Err(e) = &database {
            warn!(error = %e, "database probe failed");
        }
        let database = DatabaseMetrics::from_probe(database);

        let mut reports: Vec<InstanceReport> = instance_results
            .into_iter()
            .map(|(id, result)| {
                if let Err(e) = &result {
                    warn!(instance = id, error = %e, "instance probe failed");
                }
                InstanceReport::from_probe(id, self.probe.instance_port(id), result)
            })
            .collect();

        // Instances whose task panicked still get an entry.
        for id in 1..=current_instances {
            if !reports.iter().any(|r| r.id == id) {
                reports.push(InstanceReport::from_probe(
                    id,
                    self.probe.instance_port(id),
                    Err(crate::ProbeError::Transport("probe task aborted".into())),
                ));
            }
        }

        let application = ApplicationMetrics::from_reports(reports);

        debug!(
            instances = current_instances,
            healthy = application.healthy_instance_count,
            cpu = system.cpu_percent,
            memory = system.memory_percent,
            database = database.available,
            "metrics collected"
        );

        Ok(Snapshot {
            taken_at: epoch_secs(),
            system,
            application,
            database,
        })
    }
}

async fn join_instances(
    set: &mut JoinSet<(InstanceId, ProbeResult<InstanceSample>)>,
) -> Vec<(InstanceId, ProbeResult<InstanceSample>)> {
    let mut results = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!(error = %e, "instance probe task failed"),
        }
    }
    results
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probe::{BoxFuture, HealthCheck};
    use crate::snapshot::{DatabaseSample, InstanceStats, InstanceStatus, SystemSample};
    use std::collections::HashMap;

    #[derive(Clone)]
    enum Reply {
        Stats(InstanceStats),
        Fail(ProbeError),
        Hang,
    }

    struct FakeProbe {
        system: ProbeResult<SystemSample>,
        database: ProbeResult<DatabaseSample>,
        instances: HashMap<InstanceId, Reply>,
    }

    impl FakeProbe {
        fn new() -> Self {
            Self {
                system: Ok(SystemSample {
                    cpu_percent: 50.0,
                    memory_percent: 40.0,
                    ..SystemSample::default()
                }),
                database: Ok(DatabaseSample {
                    detail: serde_json::json!({ "connections": 3 }),
                }),
                instances: HashMap::new(),
            }
        }

        fn with(mut self, id: InstanceId, reply: Reply) -> Self {
            self.instances.insert(id, reply);
            self
        }
    }

    impl MetricsProbe for FakeProbe {
        fn probe_system(&self) -> BoxFuture<'_, ProbeResult<SystemSample>> {
            let r = self.system.clone();
            Box::pin(async move { r })
        }

        fn probe_instance(&self, id: InstanceId) -> BoxFuture<'_, ProbeResult<InstanceSample>> {
            let reply = self
                .instances
                .get(&id)
                .cloned()
                .unwrap_or(Reply::Fail(ProbeError::Transport("connection refused".into())));
            Box::pin(async move {
                match reply {
                    Reply::Stats(stats) => Ok(InstanceSample {
                        raw: serde_json::to_value(&stats).unwrap(),
                        stats,
                    }),
                    Reply::Fail(e) => Err(e),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Err(ProbeError::Transport("unreachable".into()))
                    }
                }
            })
        }

        fn probe_database(&self) -> BoxFuture<'_, ProbeResult<DatabaseSample>> {
            let r = self.database.clone();
            Box::pin(async move { r })
        }

        fn probe_health(&self, _id: InstanceId) -> BoxFuture<'_, HealthCheck> {
            Box::pin(async { HealthCheck::Healthy })
        }

        fn instance_port(&self, id: InstanceId) -> u16 {
            5000 + id as u16
        }
    }

    fn stats(requests: u64, rt: f64, err: f64) -> InstanceStats {
        InstanceStats {
            total_requests: requests,
            active_connections: 2,
            response_time_avg: rt,
            error_rate: err,
            status: None,
        }
    }

    fn aggregator(probe: FakeProbe) -> MetricsAggregator {
        MetricsAggregator::new(Arc::new(probe), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn collect_merges_instances() {
        let probe = FakeProbe::new()
            .with(1, Reply::Stats(stats(100, 200.0, 1.0)))
            .with(2, Reply::Stats(stats(200, 400.0, 3.0)))
            .with(3, Reply::Fail(ProbeError::Status(503)));

        let snap = aggregator(probe).collect(3).await.unwrap();

        assert_eq!(snap.system.cpu_percent, 50.0);
        assert!(snap.database.available);
        let app = &snap.application;
        assert_eq!(app.healthy_instance_count, 2);
        assert_eq!(app.total_requests, 300);
        assert_eq!(app.active_connections, 4);
        assert_eq!(app.avg_response_time_ms, 300.0);
        assert_eq!(app.avg_error_rate_percent, 2.0);
        assert_eq!(app.instances.len(), 3);
        assert_eq!(app.instances[2].status, InstanceStatus::Unhealthy);
        assert_eq!(app.instances[2].port, 5003);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_instance_times_out_without_aborting_tick() {
        let probe = FakeProbe::new()
            .with(1, Reply::Stats(stats(10, 100.0, 0.0)))
            .with(2, Reply::Hang);

        let snap = aggregator(probe).collect(2).await.unwrap();

        let app = &snap.application;
        assert_eq!(app.healthy_instance_count, 1);
        assert_eq!(app.instances[1].status, InstanceStatus::Error);
        assert!(app.instances[1].error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn no_healthy_instances_yields_zero_averages() {
        let probe = FakeProbe::new()
            .with(1, Reply::Fail(ProbeError::Status(500)))
            .with(2, Reply::Fail(ProbeError::Transport("refused".into())));

        let snap = aggregator(probe).collect(2).await.unwrap();

        assert_eq!(snap.application.healthy_instance_count, 0);
        assert_eq!(snap.application.avg_response_time_ms, 0.0);
        assert_eq!(snap.application.avg_error_rate_percent, 0.0);
    }

    #[tokio::test]
    async fn database_failure_does_not_fail_collection() {
        let mut probe = FakeProbe::new().with(1, Reply::Stats(stats(1, 1.0, 0.0)));
        probe.database = Err(ProbeError::Transport("refused".into()));

        let snap = aggregator(probe).collect(1).await.unwrap();
        assert!(!snap.database.available);
        assert_eq!(snap.application.healthy_instance_count, 1);
    }

    #[tokio::test]
    async fn system_failure_fails_collection() {
        let mut probe = FakeProbe::new();
        probe.system = Err(ProbeError::System("sampler panicked".into()));

        let err = aggregator(probe).collect(1).await.unwrap_err();
        assert!(matches!(err, CollectError::System(ProbeError::System(_))));
    }

    #[tokio::test]
    async fn probes_only_current_instances() {
        let probe = FakeProbe::new()
            .with(1, Reply::Stats(stats(1, 1.0, 0.0)))
            .with(2, Reply::Stats(stats(1, 1.0, 0.0)))
            .with(3, Reply::Stats(stats(1, 1.0, 0.0)));

        let snap = aggregator(probe).collect(2).await.unwrap();
        let ids: Vec<_> = snap.application.instances.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
