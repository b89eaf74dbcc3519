//! fleetscale-metrics — per-tick metrics collection for the autoscaler.
//!
//! Probes the host, every application instance, and the database, merges
//! the results into one immutable `Snapshot`, and keeps a bounded window of
//! recent snapshots for the scaling policy to average over.
//!
//! # Architecture
//!
//! ```text
//! MetricsAggregator::collect(n)
//!   ├── probe_system()          ─┐
//!   ├── probe_database()         ├─ concurrent, each bounded by the probe timeout
//!   └── probe_instance(1..=n)   ─┘
//!         ↓ join
//!   Snapshot → MetricsWindow::push → recent_average(metric, k)
//! ```
//!
//! A failed instance probe becomes an `error` entry in the snapshot and a
//! failed database probe marks the database unavailable. Only a failed
//! system probe fails the collection.

pub mod aggregator;
pub mod error;
pub mod probe;
pub mod snapshot;
pub mod system;
pub mod window;

pub use aggregator::MetricsAggregator;
pub use error::{CollectError, ProbeError, ProbeResult, WindowError};
pub use probe::{BoxFuture, HealthCheck, HttpProbe, MetricsProbe, bounded};
pub use snapshot::{
    ApplicationMetrics, DatabaseMetrics, DatabaseSample, InstanceId, InstanceReport,
    InstanceSample, InstanceStats, InstanceStatus, NetworkCounters, Snapshot, SystemSample,
};
pub use system::SystemSampler;
pub use window::{Metric, MetricsWindow, MIN_SAMPLES};
