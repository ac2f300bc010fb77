use super::{MetricRecord, StatConverter};
use crate::runtime::{ContainerDescriptor, RawStats};
use std::collections::BTreeMap;

pub const CPU_PERCENT: &str = "docker-container-cpu";
pub const MEMORY_BYTES: &str = "docker-container-memory";
pub const MEMORY_PERCENT: &str = "docker-container-memory-percent";
pub const NETWORK_RX_BYTES: &str = "docker-container-rx";
pub const NETWORK_TX_BYTES: &str = "docker-container-tx";
pub const BLOCK_READ_BYTES: &str = "docker-container-blkio-read";
pub const BLOCK_WRITE_BYTES: &str = "docker-container-blkio-write";
pub const PIDS: &str = "docker-container-pids";

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";

/// Converts Docker container summaries and stats samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerStatConverter;

impl StatConverter for DockerStatConverter {
    fn container_properties(
        &self,
        container: &ContainerDescriptor,
        host_name: &str,
    ) -> BTreeMap<String, String> {
        let mut properties = BTreeMap::new();

        let mut put = |key: &str, value: Option<&str>| {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                properties.insert(key.to_string(), value.to_string());
            }
        };

        put("Docker host", Some(host_name));
        put("Docker container id", Some(container.id.as_str()));
        put(
            "Docker container name",
            container.names.first().map(|n| n.trim_start_matches('/')),
        );
        put("Docker image", container.image.as_deref());
        put("Docker image id", container.image_id.as_deref());
        put(
            "Docker compose project",
            container.labels.get(COMPOSE_PROJECT_LABEL).map(String::as_str),
        );
        put(
            "Docker compose service",
            container.labels.get(COMPOSE_SERVICE_LABEL).map(String::as_str),
        );

        properties
    }

    fn convert_to_metrics(&self, stats: &RawStats) -> Vec<MetricRecord> {
        let mut metrics = Vec::new();

        let mut push = |name: &str, value: Option<f64>| {
            if let Some(value) = value.filter(|v| v.is_finite()) {
                metrics.push(MetricRecord::new(name, value));
            }
        };

        push(CPU_PERCENT, cpu_percent(stats));
        push(MEMORY_BYTES, stats.memory_usage.map(|v| v as f64));
        push(MEMORY_PERCENT, memory_percent(stats));
        push(NETWORK_RX_BYTES, stats.network_rx_bytes.map(|v| v as f64));
        push(NETWORK_TX_BYTES, stats.network_tx_bytes.map(|v| v as f64));
        push(BLOCK_READ_BYTES, stats.block_read_bytes.map(|v| v as f64));
        push(BLOCK_WRITE_BYTES, stats.block_write_bytes.map(|v| v as f64));
        push(PIDS, stats.pids.map(|v| v as f64));

        metrics
    }
}

/// CPU usage over the sampling window, as `docker stats` reports it
/// (100% per fully used core).
fn cpu_percent(stats: &RawStats) -> Option<f64> {
    let cpu = stats.cpu_total_usage?;
    let precpu = stats.precpu_total_usage?;
    let system = stats.system_cpu_usage?;
    let presystem = stats.presystem_cpu_usage?;

    // Counters restart when the container does
    let cpu_delta = cpu.checked_sub(precpu)? as f64;
    let system_delta = system.checked_sub(presystem)? as f64;
    if system_delta <= 0.0 {
        return None;
    }

    let cpu_count = stats.online_cpus.filter(|&n| n > 0).unwrap_or(1) as f64;

    Some((cpu_delta / system_delta) * cpu_count * 100.0)
}

fn memory_percent(stats: &RawStats) -> Option<f64> {
    let usage = stats.memory_usage?;
    let limit = stats.memory_limit.filter(|&l| l > 0)?;

    Some((usage as f64 / limit as f64) * 100.0)
}
