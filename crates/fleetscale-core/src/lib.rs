//! fleetscale-core — shared configuration for the fleetscale autoscaler.
//!
//! Holds the `fleetscale.toml` model, the scaling `Thresholds` consumed by
//! the policy, and the duration parsing shared by probe and lifecycle
//! settings.
//!
//! # Configuration
//!
//! ```text
//! [scaling]
//! min_instances = 2
//! max_instances = 10
//! initial_instances = 3
//! scale_up_cpu = 70.0
//! scale_down_cpu = 30.0
//! cooldown_secs = 300
//! tick_interval_secs = 60
//! window_size = 5
//!
//! [probes]
//! host = "127.0.0.1"
//! base_port = 5000
//! timeout = "5s"
//!
//! [lifecycle]
//! program = "docker-compose"
//! service_prefix = "app"
//! ```
//!
//! `FLEETSCALE_*` environment variables override the `[scaling]` section.

pub mod config;
pub mod duration;
pub mod error;

pub use config::{LifecycleConfig, ProbeConfig, ScalerConfig, Thresholds};
pub use duration::parse_duration;
pub use error::{ConfigError, ConfigResult};
