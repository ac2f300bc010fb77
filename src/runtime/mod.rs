//! Container runtime collaborator.
//!
//! The collection cycle only talks to the runtime through [`RuntimeClient`];
//! the Docker implementation lives behind the `docker` feature.

#[cfg(feature = "docker")]
mod docker;

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;

use crate::error::RuntimeWrapperError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// One running container as reported by the runtime.
///
/// A new poll replaces a descriptor entirely; nothing mutates it in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContainerDescriptor {
    pub id: String,
    pub names: Vec<String>,
    pub image: Option<String>,
    pub image_id: Option<String>,
    pub command: Option<String>,
    pub created: Option<i64>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub labels: HashMap<String, String>,
}

impl ContainerDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn short_id(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }

    /// Whether `id` names this container. Prefixes of at least 12 characters
    /// match, since that is how Docker abbreviates ids (and hostnames).
    pub fn matches_id(&self, id: &str) -> bool {
        self.id == id || (id.len() >= 12 && self.id.starts_with(id))
    }
}

/// A single stats sample. Every counter is optional; the runtime reports
/// what it has.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawStats {
    pub read: Option<String>,
    pub cpu_total_usage: Option<u64>,
    pub precpu_total_usage: Option<u64>,
    pub system_cpu_usage: Option<u64>,
    pub presystem_cpu_usage: Option<u64>,
    pub online_cpus: Option<u64>,
    pub memory_usage: Option<u64>,
    pub memory_limit: Option<u64>,
    pub network_rx_bytes: Option<u64>,
    pub network_tx_bytes: Option<u64>,
    pub block_read_bytes: Option<u64>,
    pub block_write_bytes: Option<u64>,
    pub pids: Option<u64>,
}

#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Name of the host the runtime runs on
    async fn host_name(&self) -> Result<String, RuntimeWrapperError>;

    /// Currently running containers
    async fn containers(&self) -> Result<Vec<ContainerDescriptor>, RuntimeWrapperError>;

    /// One stats sample for a container
    async fn stats(&self, container: &ContainerDescriptor)
        -> Result<RawStats, RuntimeWrapperError>;

    /// Run a command inside a container and return its combined output
    async fn run_command(
        &self,
        container: &ContainerDescriptor,
        command: &[String],
    ) -> Result<String, RuntimeWrapperError>;
}
