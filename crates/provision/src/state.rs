//! Cluster state persistence.
//!
//! Every provider writes `<stateDir>/<name>/state.json` after a successful
//! create so that `show`, `start` and `destroy` can find the cluster again.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ipnet::IpNet;
use machinery::MachineType;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// File name of the persisted state inside the cluster directory.
pub const STATE_FILE: &str = "state.json";

/// A provisioned cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    /// Provider that created the cluster.
    pub provisioner: String,
    /// `<stateDir>/<name>`.
    #[serde(skip)]
    pub state_directory: PathBuf,
    pub info: ClusterInfo,
    /// Timestamp of last update.
    pub updated_at: String,
}

/// Cluster topology as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub cluster_name: String,
    pub network: NetworkInfo,
    pub nodes: Vec<NodeInfo>,
    /// External Kubernetes API URL, if the provider exposes one.
    #[serde(default)]
    pub kubernetes_endpoint: Option<String>,
}

impl ClusterInfo {
    pub fn control_planes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes
            .iter()
            .filter(|node| node.machine_type.is_control_plane())
    }

    pub fn workers(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes
            .iter()
            .filter(|node| node.machine_type == MachineType::Worker)
    }
}

/// Network of a provisioned cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub name: String,
    pub cidrs: Vec<IpNet>,
    pub gateway_addrs: Vec<IpAddr>,
    pub mtu: u32,
}

/// A provisioned node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Provider-specific id (container id, pid file path).
    pub id: String,
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub name: String,
    pub machine_type: MachineType,
    pub ips: Vec<IpAddr>,
    pub nano_cpus: i64,
    /// Bytes.
    pub memory: i64,
    /// Bytes, primary disk only. Zero for containers.
    #[serde(default)]
    pub disk_size: u64,
}

impl NodeInfo {
    /// First address, used as the node's machine API target.
    #[must_use]
    pub fn primary_ip(&self) -> Option<IpAddr> {
        self.ips.first().copied()
    }
}

impl Cluster {
    /// Create a new cluster handle rooted at `<state_directory>/<name>`.
    #[must_use]
    pub fn new(provisioner: impl Into<String>, state_directory: &Path, info: ClusterInfo) -> Self {
        Self {
            provisioner: provisioner.into(),
            state_directory: state_directory.join(&info.cluster_name),
            info,
            updated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get the state file path.
    #[must_use]
    pub fn state_file(cluster_dir: &Path) -> PathBuf {
        cluster_dir.join(STATE_FILE)
    }

    /// Load state of cluster `name` under `state_directory`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(state_directory: &Path, name: &str) -> Result<Option<Self>> {
        let cluster_dir = state_directory.join(name);
        let path = Self::state_file(&cluster_dir);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read state file {}", path.display()))?;
        let mut state: Self =
            serde_json::from_str(&content).context("Failed to parse state file")?;
        state.state_directory = cluster_dir;

        info!(
            cluster = %state.info.cluster_name,
            provisioner = %state.provisioner,
            "Loaded cluster state"
        );
        Ok(Some(state))
    }

    /// Save state to file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save(&mut self) -> Result<()> {
        self.updated_at = chrono::Utc::now().to_rfc3339();

        std::fs::create_dir_all(&self.state_directory)
            .context("Failed to create state directory")?;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize state")?;
        std::fs::write(Self::state_file(&self.state_directory), content)
            .context("Failed to write state file")?;

        Ok(())
    }

    /// Path of a file inside the cluster directory.
    #[must_use]
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.state_directory.join(file_name)
    }
}
