//! Post-provisioning access to a running cluster.
//!
//! Machine API calls go through `talosctl` with a throwaway talosconfig
//! holding the cluster's client credentials; Kubernetes calls use a `kube`
//! client built from the kubeconfig the cluster hands out.

use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use machinery::{ClientConfig, Comments};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::exec;
use crate::providers::ProviderError;
use crate::request::{NodeRequest, SiderolinkRequest};
use crate::state::{Cluster, ClusterInfo};

const TALOSCTL: &str = "talosctl";

/// Operations the post-create driver and readiness checks need.
#[async_trait]
pub trait ClusterAccess: Send + Sync {
    /// Topology of the provisioned cluster.
    fn info(&self) -> &ClusterInfo;

    /// Bootstrap etcd on the first control-plane node. Succeeds if the
    /// cluster is already bootstrapped.
    async fn bootstrap(&self) -> Result<()>;

    /// Push each node's config through the insecure maintenance API.
    async fn apply_config(
        &self,
        nodes: &[NodeRequest],
        siderolink: Option<&SiderolinkRequest>,
        out: &mut (dyn Write + Send),
    ) -> Result<()>;

    /// Admin kubeconfig of the cluster.
    async fn kubeconfig(&self) -> Result<Vec<u8>>;

    /// Machine API server version of `node`.
    async fn machine_version(&self, node: IpAddr) -> Result<String>;

    /// Whether `service` on `node` reports healthy.
    async fn service_health(&self, node: IpAddr, service: &str) -> Result<bool>;

    /// Kubernetes client for the cluster.
    async fn kubernetes_client(&self) -> Result<Client>;
}

/// [`ClusterAccess`] backed by the `talosctl` binary.
pub struct TalosctlAccess {
    cluster: Cluster,
    talosconfig: NamedTempFile,
    force_endpoint: Option<String>,
}

impl TalosctlAccess {
    /// Build access for `cluster` using the credentials in `client_config`.
    ///
    /// # Errors
    /// Returns an error if `talosctl` is missing or the temporary
    /// talosconfig cannot be written.
    pub fn new(cluster: Cluster, client_config: &ClientConfig) -> Result<Self> {
        exec::require(TALOSCTL)?;

        let talosconfig = NamedTempFile::new().context("Failed to create temporary talosconfig")?;
        client_config
            .save(talosconfig.path())
            .context("Failed to write temporary talosconfig")?;

        Ok(Self {
            cluster,
            talosconfig,
            force_endpoint: None,
        })
    }

    /// Dial the machine API through `endpoint` instead of the talosconfig
    /// endpoints.
    #[must_use]
    pub fn with_force_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.force_endpoint = endpoint;
        self
    }

    #[must_use]
    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    fn first_control_plane(&self) -> Result<IpAddr> {
        self.cluster
            .info
            .control_planes()
            .find_map(|node| node.primary_ip())
            .context("cluster has no control plane nodes")
    }

    fn base_args(&self, node: IpAddr) -> Vec<String> {
        let mut args = vec![
            "--talosconfig".to_string(),
            self.talosconfig.path().display().to_string(),
            "-n".to_string(),
            node.to_string(),
        ];
        if let Some(endpoint) = &self.force_endpoint {
            args.push("-e".to_string());
            args.push(endpoint.clone());
        }
        args
    }

    async fn talosctl(&self, node: IpAddr, args: &[&str]) -> Result<String, ProviderError> {
        let mut full = self.base_args(node);
        full.extend(args.iter().map(ToString::to_string));
        exec::run(TALOSCTL, full).await
    }
}

/// `HEALTH` row of `talosctl service <name>` output.
#[must_use]
pub fn parse_service_health(output: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("HEALTH"))
        .any(|value| value.trim() == "OK")
}

#[async_trait]
impl ClusterAccess for TalosctlAccess {
    fn info(&self) -> &ClusterInfo {
        &self.cluster.info
    }

    async fn bootstrap(&self) -> Result<()> {
        let node = self.first_control_plane()?;
        info!(node = %node, "bootstrapping cluster");

        match self.talosctl(node, &["bootstrap"]).await {
            Ok(_) => Ok(()),
            Err(ProviderError::Command { stderr, .. })
                if stderr.contains("already bootstrapped")
                    || stderr.contains("etcd is already running") =>
            {
                warn!("Cluster appears to already be bootstrapped");
                Ok(())
            }
            Err(e) => Err(e).context("Failed to bootstrap"),
        }
    }

    async fn apply_config(
        &self,
        nodes: &[NodeRequest],
        siderolink: Option<&SiderolinkRequest>,
        out: &mut (dyn Write + Send),
    ) -> Result<()> {
        for node in nodes {
            let Some(config) = &node.config else {
                continue;
            };

            let address = siderolink
                .zip(node.uuid)
                .and_then(|(link, uuid)| link.address_of(&uuid))
                .map(IpAddr::V6)
                .or_else(|| node.ips.first().copied());
            let Some(address) = address else {
                bail!("node {} has no address to apply config to", node.name);
            };

            writeln!(out, "applying config to node {} ({address})", node.name)?;

            let mut file = NamedTempFile::new().context("Failed to create config file")?;
            file.write_all(&config.encode(Comments::Disabled)?)?;
            file.flush()?;

            let args = [
                "apply-config".to_string(),
                "--insecure".to_string(),
                "-n".to_string(),
                address.to_string(),
                "-e".to_string(),
                address.to_string(),
                "--file".to_string(),
                file.path().display().to_string(),
            ];
            exec::run(TALOSCTL, args)
                .await
                .with_context(|| format!("Failed to apply config to {}", node.name))?;
        }
        Ok(())
    }

    async fn kubeconfig(&self) -> Result<Vec<u8>> {
        let node = self.first_control_plane()?;
        let dir = tempfile::tempdir().context("Failed to create temporary directory")?;
        let path: PathBuf = dir.path().join("kubeconfig");
        let target = path.display().to_string();

        self.talosctl(node, &["kubeconfig", &target, "--force", "--merge=false"])
            .await
            .context("Failed to get kubeconfig")?;

        std::fs::read(&path).context("Failed to read fetched kubeconfig")
    }

    async fn machine_version(&self, node: IpAddr) -> Result<String> {
        let output = self.talosctl(node, &["version"]).await?;
        let Some((_, server)) = output.split_once("Server:") else {
            bail!("node {node} did not report a server version");
        };
        let tag = server
            .lines()
            .find_map(|line| line.trim().strip_prefix("Tag:"))
            .map_or_else(String::new, |tag| tag.trim().to_string());
        debug!(node = %node, version = %tag, "Machine API version");
        Ok(tag)
    }

    async fn service_health(&self, node: IpAddr, service: &str) -> Result<bool> {
        let output = self.talosctl(node, &["service", service]).await?;
        Ok(parse_service_health(&output))
    }

    async fn kubernetes_client(&self) -> Result<Client> {
        let raw = self.kubeconfig().await?;
        let kubeconfig = Kubeconfig::from_yaml(&String::from_utf8_lossy(&raw))
            .context("Failed to parse kubeconfig")?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context("Failed to load kubeconfig")?;
        Client::try_from(config).context("Failed to create Kubernetes client")
    }
}
