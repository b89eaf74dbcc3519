//! Host resource sampling via sysinfo.

use std::sync::{Arc, Mutex, PoisonError};

use sysinfo::{Networks, System};
use tracing::debug;

use crate::error::{ProbeError, ProbeResult};
use crate::snapshot::{NetworkCounters, SystemSample};

/// Samples CPU, memory, load, and network counters of the local host.
///
/// Keeps one `System` across samples so CPU usage is measured against the
/// previous refresh.
#[derive(Clone)]
pub struct SystemSampler {
    system: Arc<Mutex<System>>,
}

impl SystemSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    /// Take one sample.
    ///
    /// Runs on the blocking pool: a CPU reading needs two refreshes at least
    /// `MINIMUM_CPU_UPDATE_INTERVAL` apart.
    pub async fn sample(&self) -> ProbeResult<SystemSample> {
        let system = self.system.clone();

        tokio::task::spawn_blocking(move || {
            let mut sys = system.lock().unwrap_or_else(PoisonError::into_inner);

            sys.refresh_cpu_usage();
            std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
            sys.refresh_cpu_usage();
            sys.refresh_memory();

            let cpu_percent = f64::from(sys.global_cpu_usage());
            let memory_percent = percent(sys.used_memory(), sys.total_memory());
            let load_average = System::load_average().one;

            let networks = Networks::new_with_refreshed_list();
            let network = networks
                .list()
                .values()
                .fold(NetworkCounters::default(), |acc, data| NetworkCounters {
                    bytes_sent: acc.bytes_sent + data.total_transmitted(),
                    bytes_recv: acc.bytes_recv + data.total_received(),
                    packets_sent: acc.packets_sent + data.total_packets_transmitted(),
                    packets_recv: acc.packets_recv + data.total_packets_received(),
                });

            debug!(cpu_percent, memory_percent, load_average, "system sampled");

            SystemSample {
                cpu_percent,
                memory_percent,
                load_average,
                network,
            }
        })
        .await
        .map_err(|e| ProbeError::System(e.to_string()))
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_handles_zero_total() {
        assert_eq!(percent(10, 0), 0.0);
        assert_eq!(percent(25, 100), 25.0);
    }

    #[tokio::test]
    async fn sample_is_within_range() {
        let sampler = SystemSampler::new();
        let sample = sampler.sample().await.unwrap();
        assert!((0.0..=100.0).contains(&sample.memory_percent));
        assert!(sample.cpu_percent >= 0.0);
        assert!(sample.load_average >= 0.0);
    }
}
