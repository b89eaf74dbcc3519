//! Instance lifecycle — the orchestration collaborator.
//!
//! The engine only ever asks for three things: start, stop, and remove an
//! instance by number. `ComposeLifecycle` maps those onto `docker-compose`
//! service commands.

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use fleetscale_core::LifecycleConfig;
use fleetscale_metrics::{BoxFuture, InstanceId};

use crate::error::{LifecycleError, LifecycleResult};

/// Starts and stops application instances.
pub trait InstanceLifecycle: Send + Sync {
    fn start(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>>;

    fn stop(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>>;

    fn remove(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>>;
}

/// Lifecycle action, mapped to a compose subcommand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Start,
    Stop,
    Remove,
}

/// Drives instances through `docker-compose` (or a compatible program).
pub struct ComposeLifecycle {
    config: LifecycleConfig,
    timeout: Duration,
}

impl ComposeLifecycle {
    pub fn new(config: LifecycleConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    /// Arguments passed to the program for `action` on instance `id`.
    pub fn args(&self, action: Action, id: InstanceId) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(file) = &self.config.compose_file {
            args.push("-f".to_string());
            args.push(file.clone());
        }
        match action {
            Action::Start => args.extend(["up".to_string(), "-d".to_string()]),
            Action::Stop => args.push("stop".to_string()),
            Action::Remove => args.extend(["rm".to_string(), "-f".to_string()]),
        }
        args.push(self.config.service_name(id));
        args
    }

    async fn run(&self, action: Action, id: InstanceId) -> LifecycleResult<()> {
        let args = self.args(action, id);
        let command = format!("{} {}", self.config.program, args.join(" "));
        debug!(%command, "running lifecycle command");

        let output = Command::new(&self.config.program)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => return Err(LifecycleError::Spawn { command, source }),
            Err(_) => {
                return Err(LifecycleError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(LifecycleError::CommandFailed {
                command,
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(instance = id, ?action, service = %self.config.service_name(id), "lifecycle command succeeded");
        Ok(())
    }
}

impl InstanceLifecycle for ComposeLifecycle {
    fn start(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        Box::pin(self.run(Action::Start, id))
    }

    fn stop(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        Box::pin(self.run(Action::Stop, id))
    }

    fn remove(&self, id: InstanceId) -> BoxFuture<'_, LifecycleResult<()>> {
        Box::pin(self.run(Action::Remove, id))
    }
}
