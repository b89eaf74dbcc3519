//! Control loop — schedules ticks and owns the engine.
//!
//! ```text
//!          start()                 stop()
//! Stopped ────────► Running ────────────────► Stopped
//!                     │  tick: collect → push → decide → apply
//!                     │  sleep until next tick (30s after a failed tick)
//!                     └─ status published after every tick
//! ```
//!
//! A `stop()` that arrives while probes are in flight cancels them. A stop
//! that arrives during `apply` waits for it to finish, so the scaling state
//! is never left half-updated.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, ScalerStatus};
use crate::error::TickError;

/// Delay before retrying after a tick failed to collect metrics.
pub const FAILURE_BACKOFF: Duration = Duration::from_secs(30);

/// Handle to the running tick task.
struct Driver {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// Runs the engine periodically on a background task.
pub struct ControlLoop {
    engine: Arc<Mutex<Engine>>,
    /// Serializes start/stop.
    driver: Mutex<Option<Driver>>,
    status: Arc<watch::Sender<ScalerStatus>>,
    failure_backoff: Duration,
    stop_timeout: Duration,
}

impl ControlLoop {
    pub fn new(engine: Engine) -> Self {
        let (status, _) = watch::channel(engine.status());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            driver: Mutex::new(None),
            status: Arc::new(status),
            failure_backoff: FAILURE_BACKOFF,
            stop_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    /// Bound on how long `stop()` waits for an in-flight tick before
    /// aborting it.
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Start ticking. A no-op (with a warning) if already running.
    pub async fn start(&self) {
        let mut driver = self.driver.lock().await;
        if driver.is_some() {
            warn!("control loop already running");
            return;
        }

        {
            let mut engine = self.engine.lock().await;
            engine.state.set_running(true);
            self.status.send_replace(engine.status());
            info!(
                instances = engine.state().current_instances(),
                interval_secs = engine.thresholds().tick_interval_secs,
                "control loop started"
            );
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            self.engine.clone(),
            shutdown_rx,
            self.status.clone(),
            self.failure_backoff,
        ));
        *driver = Some(Driver {
            handle,
            shutdown_tx,
        });
    }

    /// Stop ticking and wait for the in-flight tick.
    ///
    /// No tick runs after this returns. If the tick outlives the stop
    /// timeout it is aborted; the scaling state is only ever written in a
    /// single step, so it stays consistent either way.
    pub async fn stop(&self) {
        let mut driver = self.driver.lock().await;
        let Some(Driver {
            mut handle,
            shutdown_tx,
        }) = driver.take()
        else {
            debug!("control loop not running");
            return;
        };

        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(self.stop_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "control loop task failed"),
            Err(_) => {
                warn!(
                    timeout_secs = self.stop_timeout.as_secs(),
                    "in-flight tick did not finish in time, aborting"
                );
                handle.abort();
                let _ = handle.await;
            }
        }

        let mut engine = self.engine.lock().await;
        engine.state.set_running(false);
        self.status.send_replace(engine.status());
        info!(
            instances = engine.state().current_instances(),
            "control loop stopped"
        );
    }

    pub async fn is_running(&self) -> bool {
        self.driver.lock().await.is_some()
    }

    /// Latest published status. Never waits on a running tick.
    pub fn status(&self) -> ScalerStatus {
        self.status.borrow().clone()
    }

    /// Receive a new status after every tick.
    pub fn subscribe(&self) -> watch::Receiver<ScalerStatus> {
        self.status.subscribe()
    }
}

async fn run_loop(
    shared: Arc<Mutex<Engine>>,
    mut shutdown: watch::Receiver<bool>,
    status: Arc<watch::Sender<ScalerStatus>>,
    failure_backoff: Duration,
) {
    loop {
        let tick_started = Instant::now();
        let mut engine = shared.lock().await;
        let interval = engine.thresholds().tick_interval();

        let collected = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!("shutdown during collection, tick abandoned");
                break;
            }
            collected = engine.collect() => collected,
        };

        let next_tick = match collected {
            Ok(snapshot) => {
                match engine.evaluate(snapshot, Instant::now()).await {
                    Ok(report) => debug!(decision = ?report.decision, "tick complete"),
                    // Already logged with its reason by the engine.
                    Err(TickError::Execute(_)) => {}
                    Err(e) => error!(error = %e, "tick failed"),
                }
                tick_started + interval
            }
            Err(e) => {
                error!(
                    error = %e,
                    backoff_secs = failure_backoff.as_secs(),
                    "tick failed, backing off"
                );
                Instant::now() + failure_backoff
            }
        };

        status.send_replace(engine.status());
        drop(engine);

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep_until(next_tick) => {}
        }
    }

    debug!("control loop task exiting");
}
