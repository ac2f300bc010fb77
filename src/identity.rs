//! Figuring out which container, if any, this process runs in.

use std::fs;
use std::path::PathBuf;
use tracing::debug;

pub trait SelfIdentityProvider: Send + Sync {
    fn my_container_id(&self) -> Option<String>;
}

/// Fixed identity, from configuration
pub struct StaticIdentity(pub Option<String>);

impl SelfIdentityProvider for StaticIdentity {
    fn my_container_id(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Reads the id injected into the container, then falls back to procfs.
pub struct ProcIdentity {
    id_file: Option<PathBuf>,
    cgroup_path: PathBuf,
    mountinfo_path: PathBuf,
}

impl ProcIdentity {
    pub fn new(
        id_file: Option<impl Into<PathBuf>>,
        cgroup_path: impl Into<PathBuf>,
        mountinfo_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id_file: id_file.map(Into::into),
            cgroup_path: cgroup_path.into(),
            mountinfo_path: mountinfo_path.into(),
        }
    }

    fn read_id_file(&self) -> Option<String> {
        let path = self.id_file.as_ref()?;
        let content = fs::read_to_string(path).ok()?;
        let id = content.trim();
        (!id.is_empty()).then(|| id.to_string())
    }

    fn id_from_cgroup(&self) -> Option<String> {
        let content = fs::read_to_string(&self.cgroup_path).ok()?;

        // "<hierarchy>:<controllers>:<path>"
        content
            .lines()
            .filter_map(|line| line.splitn(3, ':').nth(2))
            .find_map(extract_container_id)
    }

    fn id_from_mountinfo(&self) -> Option<String> {
        let content = fs::read_to_string(&self.mountinfo_path).ok()?;

        // cgroup v2 hides the id from /proc/self/cgroup, but the
        // hostname/resolv.conf bind mounts still point into the container dir
        content
            .lines()
            .filter_map(|line| line.split_once("/containers/").map(|(_, rest)| rest))
            .find_map(extract_container_id)
    }
}

impl SelfIdentityProvider for ProcIdentity {
    fn my_container_id(&self) -> Option<String> {
        let id = self
            .read_id_file()
            .or_else(|| self.id_from_cgroup())
            .or_else(|| self.id_from_mountinfo());

        debug!(container_id = ?id, "Resolved own container id");
        id
    }
}

/// Find a 64 character hex container id among the path components.
pub fn extract_container_id(path: &str) -> Option<String> {
    path.split('/').rev().find_map(|part| {
        let part = part.strip_suffix(".scope").unwrap_or(part);
        let id = part
            .strip_prefix("docker-")
            .or_else(|| part.strip_prefix("crio-"))
            .or_else(|| part.strip_prefix("cri-containerd-"))
            .unwrap_or(part);

        (id.len() == 64 && id.chars().all(|c| c.is_ascii_hexdigit())).then(|| id.to_string())
    })
}
