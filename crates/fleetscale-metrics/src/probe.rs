//! Metrics probes — one read-only query against one data source.
//!
//! `MetricsProbe` is the seam between the engine and its collaborators.
//! `HttpProbe` is the production implementation: hyper GETs against the
//! instance and database endpoints plus sysinfo for the host.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use tracing::debug;

use fleetscale_core::ProbeConfig;

use crate::error::{ProbeError, ProbeResult};
use crate::snapshot::{DatabaseSample, InstanceId, InstanceSample, SystemSample};
use crate::system::SystemSampler;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a single health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheck {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The check could not be executed (connection error or timeout).
    Failed,
}

impl HealthCheck {
    pub fn is_healthy(self) -> bool {
        self == HealthCheck::Healthy
    }
}

/// Read-only access to the system, application, and database collaborators.
///
/// Implementations do not enforce timeouts; callers wrap each call with
/// [`bounded`].
pub trait MetricsProbe: Send + Sync {
    fn probe_system(&self) -> BoxFuture<'_, ProbeResult<SystemSample>>;

    fn probe_instance(&self, id: InstanceId) -> BoxFuture<'_, ProbeResult<InstanceSample>>;

    fn probe_database(&self) -> BoxFuture<'_, ProbeResult<DatabaseSample>>;

    fn probe_health(&self, id: InstanceId) -> BoxFuture<'_, HealthCheck>;

    /// Port instance `id` is addressed on.
    fn instance_port(&self, id: InstanceId) -> u16;
}

/// Run a probe call with a deadline, mapping expiry to `ProbeError::Timeout`.
pub async fn bounded<T, F>(timeout: Duration, fut: F) -> ProbeResult<T>
where
    F: Future<Output = ProbeResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

/// Probes real endpoints over HTTP/1 and samples the local host.
pub struct HttpProbe {
    config: ProbeConfig,
    system: SystemSampler,
}

impl HttpProbe {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            system: SystemSampler::new(),
        }
    }
}

impl MetricsProbe for HttpProbe {
    fn probe_system(&self) -> BoxFuture<'_, ProbeResult<SystemSample>> {
        Box::pin(self.system.sample())
    }

    fn probe_instance(&self, id: InstanceId) -> BoxFuture<'_, ProbeResult<InstanceSample>> {
        Box::pin(async move {
            let address = self.config.instance_address(id);
            let body = get_success(&address, &self.config.stats_path).await?;
            let raw = decode_json(&body)?;
            InstanceSample::from_json(raw).map_err(|e| ProbeError::Decode(e.to_string()))
        })
    }

    fn probe_database(&self) -> BoxFuture<'_, ProbeResult<DatabaseSample>> {
        Box::pin(async move {
            let body =
                get_success(&self.config.database_address, &self.config.database_path).await?;
            Ok(DatabaseSample {
                detail: decode_json(&body)?,
            })
        })
    }

    fn probe_health(&self, id: InstanceId) -> BoxFuture<'_, HealthCheck> {
        Box::pin(async move {
            let address = self.config.instance_address(id);
            match http_get(&address, &self.config.health_path).await {
                Ok((status, _)) if status.is_success() => HealthCheck::Healthy,
                Ok((status, _)) => {
                    debug!(%status, %address, "health check non-2xx");
                    HealthCheck::Unhealthy
                }
                Err(_) => HealthCheck::Failed,
            }
        })
    }

    fn instance_port(&self, id: InstanceId) -> u16 {
        self.config.instance_port(id)
    }
}

async fn get_success(address: &str, path: &str) -> ProbeResult<Bytes> {
    let (status, body) = http_get(address, path).await?;
    if status.is_success() {
        Ok(body)
    } else {
        debug!(%status, %address, %path, "probe non-2xx");
        Err(ProbeError::Status(status.as_u16()))
    }
}

fn decode_json(body: &Bytes) -> ProbeResult<serde_json::Value> {
    serde_json::from_slice(body).map_err(|e| ProbeError::Decode(e.to_string()))
}

/// Issue a single `GET http://{address}{path}` and read the whole body.
pub async fn http_get(address: &str, path: &str) -> ProbeResult<(http::StatusCode, Bytes)> {
    let uri = format!("http://{address}{path}");

    let stream = tokio::net::TcpStream::connect(address).await.map_err(|e| {
        debug!(error = %e, %uri, "probe connection failed");
        ProbeError::Transport(e.to_string())
    })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| {
            debug!(error = %e, %uri, "probe handshake failed");
            ProbeError::Transport(e.to_string())
        })?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", address)
        .header("user-agent", "fleetscale-probe/0.1")
        .header("accept", "application/json")
        .body(http_body_util::Empty::<Bytes>::new())
        .map_err(|e| ProbeError::Transport(e.to_string()))?;

    let resp = sender.send_request(req).await.map_err(|e| {
        debug!(error = %e, %uri, "probe request failed");
        ProbeError::Transport(e.to_string())
    })?;

    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ProbeError::Transport(e.to_string()))?
        .to_bytes();

    Ok((status, body))
}
