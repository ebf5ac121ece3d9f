//! Provider trait and common types for cluster back-ends.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use machinery::{ClientConfig, GenOption, IfaceSelector};
use thiserror::Error;

use crate::request::{ClusterRequest, NetworkRequest};
use crate::state::Cluster;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Provisioner name not known to the factory.
    #[error("unsupported provisioner {0:?}")]
    UnsupportedProvisioner(String),

    /// A helper binary could not be started.
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A helper binary exited with a failure.
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    /// Cluster state not found.
    #[error("cluster {0:?} not found")]
    NotFound(String),

    /// Invalid request or configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// File system error.
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Machine config encoding failed.
    #[error(transparent)]
    Machinery(#[from] machinery::ConfigError),

    /// State persistence failed.
    #[error(transparent)]
    State(#[from] anyhow::Error),
}

impl ProviderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Provision options: back-end toggles that are not part of the request.
#[derive(Debug, Clone)]
pub struct Options {
    pub talos_config: Option<ClientConfig>,
    /// `host:container[/protocol]` forwards on the first control plane.
    pub docker_ports: Vec<String>,
    pub docker_ports_host_ip: String,
    pub docker_image: String,
    pub bootloader_enabled: bool,
    pub uefi_enabled: bool,
    pub tpm1_2_enabled: bool,
    pub tpm2_enabled: bool,
    pub iommu_enabled: bool,
    pub with_debug_shell: bool,
    /// `amd64` or `arm64`.
    pub target_arch: String,
    pub extra_uefi_search_paths: Vec<PathBuf>,
    pub json_logs_endpoint: Option<String>,
    pub kubernetes_endpoint: Option<String>,
    pub kms_endpoint: Option<String>,
    pub siderolink_enabled: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            talos_config: None,
            docker_ports: Vec::new(),
            docker_ports_host_ip: "0.0.0.0".to_string(),
            docker_image: String::new(),
            bootloader_enabled: true,
            uefi_enabled: true,
            tpm1_2_enabled: false,
            tpm2_enabled: false,
            iommu_enabled: false,
            with_debug_shell: false,
            target_arch: host_arch().to_string(),
            extra_uefi_search_paths: Vec::new(),
            json_logs_endpoint: None,
            kubernetes_endpoint: None,
            kms_endpoint: None,
            siderolink_enabled: false,
        }
    }
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_talos_config(mut self, config: ClientConfig) -> Self {
        self.talos_config = Some(config);
        self
    }

    #[must_use]
    pub fn with_docker_ports(mut self, ports: Vec<String>) -> Self {
        self.docker_ports = ports;
        self
    }

    #[must_use]
    pub fn with_docker_ports_host_ip(mut self, host_ip: impl Into<String>) -> Self {
        self.docker_ports_host_ip = host_ip.into();
        self
    }

    #[must_use]
    pub fn with_docker_image(mut self, image: impl Into<String>) -> Self {
        self.docker_image = image.into();
        self
    }

    #[must_use]
    pub fn with_bootloader(mut self, enabled: bool) -> Self {
        self.bootloader_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_uefi(mut self, enabled: bool) -> Self {
        self.uefi_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_tpm1_2(mut self, enabled: bool) -> Self {
        self.tpm1_2_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_tpm2(mut self, enabled: bool) -> Self {
        self.tpm2_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_iommu(mut self, enabled: bool) -> Self {
        self.iommu_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_debug_shell(mut self, enabled: bool) -> Self {
        self.with_debug_shell = enabled;
        self
    }

    #[must_use]
    pub fn with_target_arch(mut self, arch: impl Into<String>) -> Self {
        self.target_arch = arch.into();
        self
    }

    #[must_use]
    pub fn with_extra_uefi_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.extra_uefi_search_paths = paths;
        self
    }

    #[must_use]
    pub fn with_json_logs_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.json_logs_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_kubernetes_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.kubernetes_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_kms_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.kms_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_siderolink(mut self, enabled: bool) -> Self {
        self.siderolink_enabled = enabled;
        self
    }
}

/// Architecture name of the running host in Talos terms.
#[must_use]
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        _ => "amd64",
    }
}

/// Trait for cluster back-ends.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provisioner name persisted in cluster state.
    fn name(&self) -> &'static str;

    /// Materialize a cluster from a fully built request.
    async fn create(
        &self,
        request: &ClusterRequest,
        options: &Options,
    ) -> Result<Cluster, ProviderError>;

    /// Rebuild a cluster handle from persisted state.
    async fn reflect(
        &self,
        cluster_name: &str,
        state_directory: &Path,
    ) -> Result<Cluster, ProviderError>;

    /// Launch the nodes of an existing cluster again.
    async fn start(&self, cluster: &Cluster) -> Result<(), ProviderError>;

    /// Tear down every node and the cluster network.
    async fn destroy(&self, cluster: &Cluster) -> Result<(), ProviderError>;

    /// Write node logs for post-mortem analysis. Best effort.
    async fn crash_dump(&self, cluster: &Cluster, out: &mut (dyn std::io::Write + Send));

    /// Release provider resources.
    async fn close(&self) -> Result<(), ProviderError>;

    /// Generator options the back-end requires.
    fn gen_options(&self, network: &NetworkRequest) -> Vec<GenOption>;

    /// Control plane URL as seen by nodes.
    fn in_cluster_kubernetes_control_plane_endpoint(
        &self,
        network: &NetworkRequest,
        port: u16,
    ) -> String;

    /// Control plane URL as seen from the host.
    fn external_kubernetes_control_plane_endpoint(
        &self,
        network: &NetworkRequest,
        port: u16,
    ) -> String;

    /// `host:port` machine API endpoints reachable from the host. Empty
    /// means "use the node addresses".
    fn talos_api_endpoints(&self, network: &NetworkRequest) -> Vec<String>;

    /// Selector of the primary network interface inside a node.
    fn first_interface(&self) -> IfaceSelector;

    /// Stable device path of the `index`-th disk of a node.
    fn user_disk_name(&self, index: usize) -> String;
}

/// `https://host:port`, bracketing IPv6 hosts.
#[must_use]
pub fn https_endpoint(host: std::net::IpAddr, port: u16) -> String {
    format!("https://{}", std::net::SocketAddr::new(host, port))
}

/// Device letter of the `index`-th disk: `a` for 0, `b` for 1 and so on.
pub(crate) fn disk_letter(index: usize) -> char {
    let offset = u8::try_from(index % 26).unwrap_or(0);
    char::from(b'a' + offset)
}
