use super::{ContainerDescriptor, RawStats, RuntimeClient};
use crate::error::RuntimeWrapperError;
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, Stats, StatsOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerSummary;
use bollard::Docker;
use futures::StreamExt;
use sysinfo::System;
use tracing::{debug, warn};

pub struct DockerRuntime {
    client: Docker,
}

impl DockerRuntime {
    /// Connect to the default socket, or to `socket_path` when given, and ping
    pub async fn connect(
        socket_path: Option<&str>,
        timeout_secs: u64,
    ) -> Result<Self, RuntimeWrapperError> {
        let client = match socket_path {
            Some(path) => {
                Docker::connect_with_socket(path, timeout_secs, bollard::API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_socket_defaults()
                .map(|c| c.with_timeout(std::time::Duration::from_secs(timeout_secs))),
        }
        .map_err(|e| RuntimeWrapperError::Unavailable(e.to_string()))?;

        client
            .ping()
            .await
            .map_err(|e| RuntimeWrapperError::Unavailable(e.to_string()))?;

        Ok(Self { client })
    }

    fn describe(container: ContainerSummary) -> Option<ContainerDescriptor> {
        let id = container.id?;

        Some(ContainerDescriptor {
            id,
            names: container.names.unwrap_or_default(),
            image: container.image,
            image_id: container.image_id,
            command: container.command,
            created: container.created,
            state: container.state,
            status: container.status,
            labels: container.labels.unwrap_or_default(),
        })
    }

    fn raw_stats(stats: &Stats) -> RawStats {
        let (network_rx, network_tx) = stats
            .networks
            .as_ref()
            .map(|networks| {
                networks.values().fold((0u64, 0u64), |(rx, tx), net| {
                    (rx + net.rx_bytes, tx + net.tx_bytes)
                })
            })
            .unzip();

        let (block_read, block_write) = stats
            .blkio_stats
            .io_service_bytes_recursive
            .as_ref()
            .map(|io_stats| {
                io_stats
                    .iter()
                    .fold((0u64, 0u64), |(read, write), stat| match stat.op.as_str() {
                        "read" | "Read" => (read + stat.value, write),
                        "write" | "Write" => (read, write + stat.value),
                        _ => (read, write),
                    })
            })
            .unzip();

        // A zero total with no system counter means the sample was never filled
        let cpu_total = Some(stats.cpu_stats.cpu_usage.total_usage)
            .filter(|_| stats.cpu_stats.system_cpu_usage.is_some());
        let precpu_total = Some(stats.precpu_stats.cpu_usage.total_usage)
            .filter(|_| stats.precpu_stats.system_cpu_usage.is_some());

        RawStats {
            read: Some(stats.read.clone()).filter(|r| !r.is_empty()),
            cpu_total_usage: cpu_total,
            precpu_total_usage: precpu_total,
            system_cpu_usage: stats.cpu_stats.system_cpu_usage,
            presystem_cpu_usage: stats.precpu_stats.system_cpu_usage,
            online_cpus: stats.cpu_stats.online_cpus,
            memory_usage: stats.memory_stats.usage,
            memory_limit: stats.memory_stats.limit,
            network_rx_bytes: network_rx,
            network_tx_bytes: network_tx,
            block_read_bytes: block_read,
            block_write_bytes: block_write,
            pids: stats.pids_stats.current,
        }
    }
}

fn map_error(container_id: &str, error: bollard::errors::Error) -> RuntimeWrapperError {
    match error {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 409, ..
        } => RuntimeWrapperError::NotRunning(container_id.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeWrapperError::NotFound(container_id.to_string()),
        other => RuntimeWrapperError::Api(other.to_string()),
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn host_name(&self) -> Result<String, RuntimeWrapperError> {
        match self.client.info().await {
            Ok(info) => {
                if let Some(name) = info.name.filter(|n| !n.is_empty()) {
                    return Ok(name);
                }
            }
            Err(e) => {
                warn!("Failed to get Docker info: {}", e);
            }
        }

        System::host_name()
            .ok_or_else(|| RuntimeWrapperError::Unavailable("host name unknown".to_string()))
    }

    async fn containers(&self) -> Result<Vec<ContainerDescriptor>, RuntimeWrapperError> {
        let options = ListContainersOptions::<String> {
            all: false,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeWrapperError::Api(e.to_string()))?;

        Ok(containers.into_iter().filter_map(Self::describe).collect())
    }

    async fn stats(
        &self,
        container: &ContainerDescriptor,
    ) -> Result<RawStats, RuntimeWrapperError> {
        // Not one-shot: the daemon waits for a second sample so precpu is populated
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };

        let mut stream = self.client.stats(&container.id, Some(options));

        match stream.next().await {
            Some(Ok(stats)) => Ok(Self::raw_stats(&stats)),
            Some(Err(e)) => Err(map_error(&container.id, e)),
            None => Err(RuntimeWrapperError::Api(format!(
                "no stats returned for {}",
                container.short_id()
            ))),
        }
    }

    async fn run_command(
        &self,
        container: &ContainerDescriptor,
        command: &[String],
    ) -> Result<String, RuntimeWrapperError> {
        let exec = self
            .client
            .create_exec(
                &container.id,
                CreateExecOptions {
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    cmd: Some(command.to_vec()),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_error(&container.id, e))?;

        debug!(
            container = %container.short_id(),
            command = ?command,
            "Running command in container"
        );

        let mut output = String::new();
        match self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_error(&container.id, e))?
        {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| map_error(&container.id, e))?;
                    output.push_str(&String::from_utf8_lossy(&chunk.into_bytes()));
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_error(&container.id, e))?;

        match inspect.exit_code {
            Some(0) | None => Ok(output),
            Some(exit_code) => Err(RuntimeWrapperError::CommandFailed { exit_code, output }),
        }
    }
}
