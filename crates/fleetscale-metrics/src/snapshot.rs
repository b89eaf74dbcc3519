//! Snapshot types — the merged metrics result of one tick.
//!
//! A `Snapshot` is built once by the aggregator and never mutated after.

use serde::{Deserialize, Deserializer, Serialize};

/// Application instance number. Instances are numbered from 1.
pub type InstanceId = u32;

// ── Probe samples ──────────────────────────────────────────────────

/// Host resource usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    /// One-minute load average (0 where unsupported).
    pub load_average: f64,
    pub network: NetworkCounters,
}

/// Cumulative network counters summed over all interfaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// Body of an instance's stats endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceStats {
    #[serde(deserialize_with = "lenient_count")]
    pub total_requests: u64,
    #[serde(deserialize_with = "lenient_count")]
    pub active_connections: u64,
    /// Mean response time in milliseconds.
    pub response_time_avg: f64,
    /// Error rate in percent.
    pub error_rate: f64,
    /// Self-reported status, if the instance publishes one.
    pub status: Option<String>,
}

impl InstanceStats {
    /// An instance is healthy unless it reports otherwise.
    pub fn reports_healthy(&self) -> bool {
        match self.status.as_deref() {
            None => true,
            Some(s) => s.eq_ignore_ascii_case("healthy") || s.eq_ignore_ascii_case("ok"),
        }
    }
}

/// Accept counters sent as integers or floats; floats are truncated and
/// negative values read as 0.
fn lenient_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Count {
        Int(u64),
        Float(f64),
    }

    Ok(match Count::deserialize(deserializer)? {
        Count::Int(n) => n,
        Count::Float(f) if f.is_finite() && f > 0.0 => f as u64,
        Count::Float(_) => 0,
    })
}

/// Successful answer from one instance's stats endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceSample {
    pub stats: InstanceStats,
    /// The body as received, kept for the snapshot.
    pub raw: serde_json::Value,
}

impl InstanceSample {
    pub fn from_json(raw: serde_json::Value) -> Result<Self, serde_json::Error> {
        let stats = serde_json::from_value(raw.clone())?;
        Ok(Self { stats, raw })
    }
}

/// Successful answer from the database stats endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSample {
    pub detail: serde_json::Value,
}

// ── Snapshot ───────────────────────────────────────────────────────

/// Status of one instance within a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Probe succeeded and the instance reported healthy.
    Healthy,
    /// The instance answered but is not healthy.
    Unhealthy,
    /// The probe failed (timeout, connection, bad body).
    Error,
}

/// Per-instance entry of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceReport {
    pub id: InstanceId,
    pub port: u16,
    pub status: InstanceStatus,
    /// Parsed stats, present whenever the stats endpoint answered 2xx.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<InstanceStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_stats: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InstanceReport {
    /// Classify a probe outcome.
    ///
    /// A non-2xx answer is `Unhealthy`; every other failure is `Error`.
    pub fn from_probe(
        id: InstanceId,
        port: u16,
        result: crate::ProbeResult<InstanceSample>,
    ) -> Self {
        match result {
            Ok(sample) => Self {
                id,
                port,
                status: if sample.stats.reports_healthy() {
                    InstanceStatus::Healthy
                } else {
                    InstanceStatus::Unhealthy
                },
                stats: Some(sample.stats),
                raw_stats: Some(sample.raw),
                error: None,
            },
            Err(e) => Self {
                id,
                port,
                status: if e.is_response() {
                    InstanceStatus::Unhealthy
                } else {
                    InstanceStatus::Error
                },
                stats: None,
                raw_stats: None,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Fleet-level application aggregates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationMetrics {
    /// Sum over every instance that returned stats.
    pub total_requests: u64,
    /// Sum over every instance that returned stats.
    pub active_connections: u64,
    /// Mean over healthy instances; 0 when none are healthy.
    pub avg_response_time_ms: f64,
    /// Mean over healthy instances; 0 when none are healthy.
    pub avg_error_rate_percent: f64,
    pub healthy_instance_count: u32,
    /// Ordered by instance id.
    pub instances: Vec<InstanceReport>,
}

impl ApplicationMetrics {
    /// Merge per-instance reports into fleet aggregates.
    pub fn from_reports(mut instances: Vec<InstanceReport>) -> Self {
        instances.sort_by_key(|r| r.id);

        let mut total_requests = 0u64;
        let mut active_connections = 0u64;
        let mut response_sum = 0.0;
        let mut error_sum = 0.0;
        let mut healthy = 0u32;

        for report in &instances {
            let Some(stats) = &report.stats else { continue };
            total_requests = total_requests.saturating_add(stats.total_requests);
            active_connections = active_connections.saturating_add(stats.active_connections);
            if report.status == InstanceStatus::Healthy {
                healthy += 1;
                response_sum += stats.response_time_avg;
                error_sum += stats.error_rate;
            }
        }

        let (avg_response_time_ms, avg_error_rate_percent) = if healthy > 0 {
            (response_sum / healthy as f64, error_sum / healthy as f64)
        } else {
            (0.0, 0.0)
        };

        Self {
            total_requests,
            active_connections,
            avg_response_time_ms,
            avg_error_rate_percent,
            healthy_instance_count: healthy,
            instances,
        }
    }
}

/// Database availability as seen by the probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseMetrics {
    pub available: bool,
    pub detail: serde_json::Value,
}

impl DatabaseMetrics {
    pub fn from_probe(result: crate::ProbeResult<DatabaseSample>) -> Self {
        match result {
            Ok(sample) => Self {
                available: true,
                detail: sample.detail,
            },
            Err(e) => Self {
                available: false,
                detail: serde_json::json!({ "error": e.to_string() }),
            },
        }
    }
}

/// Merged metrics of a single tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unix timestamp (seconds) when collection finished.
    pub taken_at: u64,
    pub system: SystemSample,
    pub application: ApplicationMetrics,
    pub database: DatabaseMetrics,
}
