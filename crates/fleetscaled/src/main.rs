//! fleetscaled — the fleetscale daemon.
//!
//! Wires the HTTP/sysinfo probe, the docker-compose lifecycle and the
//! scaling engine together and runs the control loop until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! fleetscaled run --config /etc/fleetscale/fleetscale.toml
//! fleetscaled check-config --config fleetscale.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::time::Instant;
use tracing::{info, warn};

use fleetscale_core::ScalerConfig;
use fleetscale_engine::{ComposeLifecycle, ControlLoop, Engine, ScalingExecutor};
use fleetscale_metrics::{HttpProbe, MetricsAggregator};

#[derive(Parser)]
#[command(name = "fleetscaled", about = "Autoscaler for a fleet of application instances")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loop until interrupted.
    Run(ConfigArgs),

    /// Load and validate the configuration, then print the effective values.
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run(args) => run(load_config(&args)?).await,
        Command::CheckConfig(args) => check_config(&args),
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,fleetscaled=debug,fleetscale=debug")
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(args: &ConfigArgs) -> anyhow::Result<ScalerConfig> {
    let config = ScalerConfig::load(args.config.as_deref())
        .with_context(|| match &args.config {
            Some(path) => format!("loading config from {}", path.display()),
            None => "loading default config".to_string(),
        })?;
    Ok(config)
}

fn check_config(args: &ConfigArgs) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let rendered = config
        .to_toml_string()
        .context("rendering effective config")?;
    println!("{rendered}");
    info!("configuration is valid");
    Ok(())
}

async fn run(config: ScalerConfig) -> anyhow::Result<()> {
    let ScalerConfig {
        scaling,
        probes,
        lifecycle,
    } = config;

    info!(
        min = scaling.min_instances,
        max = scaling.max_instances,
        initial = scaling.initial_instances,
        "fleetscale daemon starting"
    );

    // ── Collaborators ──────────────────────────────────────────

    let probe_timeout = probes.timeout()?;
    let probe = Arc::new(HttpProbe::new(probes));
    let aggregator = MetricsAggregator::new(probe.clone(), probe_timeout);

    let command_timeout = lifecycle.command_timeout()?;
    let health_poll = lifecycle.health_poll_interval()?;
    let health_timeout = lifecycle.health_timeout()?;
    let status_interval = lifecycle.status_interval()?;
    info!(
        program = %lifecycle.program,
        prefix = %lifecycle.service_prefix,
        "lifecycle initialized"
    );

    let executor = ScalingExecutor::new(
        Arc::new(ComposeLifecycle::new(lifecycle, command_timeout)),
        probe,
    )
    .with_probe_timeout(probe_timeout)
    .with_health_wait(health_poll, health_timeout);

    let control = ControlLoop::new(Engine::new(scaling, aggregator, executor));

    // ── Run until Ctrl-C ───────────────────────────────────────

    control.start().await;

    let mut report = tokio::time::interval(status_interval);
    // The first tick fires immediately; the loop logs its own start.
    report.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C, shutting down");
                }
                info!("shutdown signal received");
                break;
            }
            _ = report.tick() => log_status(&control),
        }
    }

    control.stop().await;
    info!("fleetscale daemon stopped");
    Ok(())
}

fn log_status(control: &ControlLoop) {
    let status = control.status();
    let cooldown = status.cooldown_remaining(Instant::now());
    info!(
        running = status.running,
        instances = status.current_instances,
        min = status.min_instances,
        max = status.max_instances,
        cooldown_remaining_secs = cooldown.as_secs(),
        window = status.window_len,
        last_decision = status.last_decision.as_ref().map(|d| d.reason()).unwrap_or("-"),
        "status"
    );
    if let Some(event) = status.recent_events.last() {
        match serde_json::to_string(event) {
            Ok(json) => info!(event = %json, "last scaling event"),
            Err(e) => warn!(error = %e, "failed to render scaling event"),
        }
    }
}
