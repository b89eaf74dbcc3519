//! fleetscale.toml configuration parser.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::duration::parse_duration;
use crate::error::{ConfigError, ConfigResult};

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "FLEETSCALE_";

/// Top-level scaler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    pub scaling: Thresholds,
    pub probes: ProbeConfig,
    pub lifecycle: LifecycleConfig,
}

/// Scaling thresholds and loop timing. Read-only after startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub min_instances: u32,
    pub max_instances: u32,
    /// Instance count assumed to be running when the loop starts.
    pub initial_instances: u32,
    /// Average CPU percent above which the fleet grows.
    pub scale_up_cpu: f64,
    /// Average CPU percent below which the fleet may shrink.
    pub scale_down_cpu: f64,
    pub scale_up_memory: f64,
    pub scale_down_memory: f64,
    pub scale_up_response_ms: f64,
    pub scale_down_response_ms: f64,
    pub scale_up_error_rate: f64,
    pub scale_down_error_rate: f64,
    /// Healthy/current ratio below which the fleet grows.
    pub min_healthy_ratio: f64,
    pub cooldown_secs: u64,
    pub tick_interval_secs: u64,
    /// Snapshots retained in the metrics window.
    pub window_size: usize,
    /// Scaling events retained for status reporting.
    pub history_size: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_instances: 2,
            max_instances: 10,
            initial_instances: 3,
            scale_up_cpu: 70.0,
            scale_down_cpu: 30.0,
            scale_up_memory: 80.0,
            scale_down_memory: 50.0,
            scale_up_response_ms: 2000.0,
            scale_down_response_ms: 500.0,
            scale_up_error_rate: 5.0,
            scale_down_error_rate: 1.0,
            min_healthy_ratio: 0.8,
            cooldown_secs: 300,
            tick_interval_secs: 60,
            window_size: 5,
            history_size: 50,
        }
    }
}

impl Thresholds {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Whether `count` lies within `[min_instances, max_instances]`.
    pub fn in_bounds(&self, count: u32) -> bool {
        (self.min_instances..=self.max_instances).contains(&count)
    }
}

/// Where and how the metrics probes reach their collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Host the application instances listen on.
    pub host: String,
    /// Instance N listens on `base_port + N`.
    pub base_port: u16,
    pub stats_path: String,
    pub health_path: String,
    /// `host:port` of the database stats endpoint.
    pub database_address: String,
    pub database_path: String,
    /// Per-probe timeout, e.g. "5s".
    pub timeout: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            base_port: 5000,
            stats_path: "/api/stats".to_string(),
            health_path: "/api/health".to_string(),
            database_address: "127.0.0.1:5004".to_string(),
            database_path: "/api/stats".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> ConfigResult<Duration> {
        duration_field("probes.timeout", &self.timeout)
    }

    /// Address of application instance `id`.
    pub fn instance_address(&self, id: u32) -> String {
        format!("{}:{}", self.host, self.instance_port(id))
    }

    pub fn instance_port(&self, id: u32) -> u16 {
        self.base_port.saturating_add(id.min(u16::MAX as u32) as u16)
    }
}

/// How instances are started and stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Orchestration command, e.g. "docker-compose".
    pub program: String,
    /// Optional compose file passed with `-f`.
    pub compose_file: Option<String>,
    /// Service N is named `{service_prefix}-{N}`.
    pub service_prefix: String,
    /// Delay between health polls of a freshly started instance.
    pub health_poll_interval: String,
    /// Give up waiting for a started instance after this long.
    pub health_timeout: String,
    /// Upper bound on a single orchestration command.
    pub command_timeout: String,
    /// How often the daemon logs its status.
    pub status_interval: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            program: "docker-compose".to_string(),
            compose_file: None,
            service_prefix: "app".to_string(),
            health_poll_interval: "5s".to_string(),
            health_timeout: "60s".to_string(),
            command_timeout: "120s".to_string(),
            status_interval: "60s".to_string(),
        }
    }
}

impl LifecycleConfig {
    pub fn health_poll_interval(&self) -> ConfigResult<Duration> {
        duration_field("lifecycle.health_poll_interval", &self.health_poll_interval)
    }

    pub fn health_timeout(&self) -> ConfigResult<Duration> {
        duration_field("lifecycle.health_timeout", &self.health_timeout)
    }

    pub fn command_timeout(&self) -> ConfigResult<Duration> {
        duration_field("lifecycle.command_timeout", &self.command_timeout)
    }

    pub fn status_interval(&self) -> ConfigResult<Duration> {
        duration_field("lifecycle.status_interval", &self.status_interval)
    }

    /// Compose service name for instance `id`.
    pub fn service_name(&self, id: u32) -> String {
        format!("{}-{id}", self.service_prefix)
    }
}

impl ScalerConfig {
    /// Load from a TOML file, apply `FLEETSCALE_*` overrides, and validate.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides for the `[scaling]` section.
    ///
    /// `lookup` maps a full variable name (e.g. `FLEETSCALE_MIN_INSTANCES`)
    /// to its value, if set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let s = &mut self.scaling;
        override_from(&lookup, "MIN_INSTANCES", &mut s.min_instances)?;
        override_from(&lookup, "MAX_INSTANCES", &mut s.max_instances)?;
        override_from(&lookup, "INITIAL_INSTANCES", &mut s.initial_instances)?;
        override_from(&lookup, "SCALE_UP_CPU", &mut s.scale_up_cpu)?;
        override_from(&lookup, "SCALE_DOWN_CPU", &mut s.scale_down_cpu)?;
        override_from(&lookup, "COOLDOWN_SECS", &mut s.cooldown_secs)?;
        override_from(&lookup, "TICK_INTERVAL_SECS", &mut s.tick_interval_secs)?;
        override_from(&lookup, "WINDOW_SIZE", &mut s.window_size)?;
        Ok(())
    }

    /// Check bounds and cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        let s = &self.scaling;
        if s.min_instances == 0 {
            return Err(ConfigError::Invalid("min_instances must be at least 1".into()));
        }
        if s.min_instances > s.max_instances {
            return Err(ConfigError::Invalid(format!(
                "min_instances ({}) exceeds max_instances ({})",
                s.min_instances, s.max_instances
            )));
        }
        if !s.in_bounds(s.initial_instances) {
            return Err(ConfigError::Invalid(format!(
                "initial_instances ({}) outside [{}, {}]",
                s.initial_instances, s.min_instances, s.max_instances
            )));
        }
        if s.scale_down_cpu >= s.scale_up_cpu {
            return Err(ConfigError::Invalid(format!(
                "scale_down_cpu ({}) must be below scale_up_cpu ({})",
                s.scale_down_cpu, s.scale_up_cpu
            )));
        }
        if s.window_size < 3 {
            return Err(ConfigError::Invalid("window_size must be at least 3".into()));
        }
        if s.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("tick_interval_secs must be positive".into()));
        }
        let last_port = u32::from(self.probes.base_port).checked_add(s.max_instances);
        if last_port.is_none_or(|port| port > u32::from(u16::MAX)) {
            return Err(ConfigError::Invalid(format!(
                "base_port {} leaves no room for {} instances",
                self.probes.base_port, s.max_instances
            )));
        }

        let durations = [
            ("probes.timeout", self.probes.timeout()?),
            ("lifecycle.health_poll_interval", self.lifecycle.health_poll_interval()?),
            ("lifecycle.health_timeout", self.lifecycle.health_timeout()?),
            ("lifecycle.command_timeout", self.lifecycle.command_timeout()?),
            ("lifecycle.status_interval", self.lifecycle.status_interval()?),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::Invalid(format!("{field} must be positive")));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn override_from<F, T>(lookup: &F, key: &str, slot: &mut T) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let var = format!("{ENV_PREFIX}{key}");
    if let Some(value) = lookup(&var) {
        *slot = value.trim().parse().map_err(|_| ConfigError::Env {
            var: var.clone(),
            value: value.clone(),
        })?;
        debug!(%var, %value, "config override from environment");
    }
    Ok(())
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}
