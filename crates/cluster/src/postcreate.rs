//! Steps run after the provider has created the cluster.
//!
//! With a client config in the bundle, the driver saves it into the user's
//! talosconfig, optionally applies configs through the maintenance API,
//! bootstraps etcd unless an init node does it, waits for the cluster to
//! become ready and finally merges the admin kubeconfig.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use machinery::clientconfig::resolve_path;
use machinery::ClientConfig;
use provision::check::{self, ClusterCheck};
use provision::{Cluster, ClusterAccess, NodeRequest, SiderolinkRequest};
use tracing::{debug, info};

use crate::kubeconfig::{self, default_kubeconfig_path, merge_into};
use crate::options::CommonOptions;
use crate::show::show_cluster;
use crate::ui;

/// Post-create driver.
pub struct PostCreate<'a> {
    options: &'a CommonOptions,
    kubeconfig_path: Option<PathBuf>,
    extra_checks: Vec<Box<dyn ClusterCheck>>,
}

impl<'a> PostCreate<'a> {
    #[must_use]
    pub fn new(options: &'a CommonOptions) -> Self {
        Self {
            options,
            kubeconfig_path: None,
            extra_checks: Vec::new(),
        }
    }

    /// Merge the kubeconfig into `path` instead of the default location.
    #[must_use]
    pub fn with_kubeconfig_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig_path = Some(path.into());
        self
    }

    /// Checks run after the readiness battery.
    #[must_use]
    pub fn with_extra_checks(mut self, checks: Vec<Box<dyn ClusterCheck>>) -> Self {
        self.extra_checks = checks;
        self
    }

    /// Run every post-create step, then print the cluster summary. Extra
    /// checks are consumed.
    ///
    /// Nothing but the summary happens when the bundle had no client
    /// config.
    ///
    /// # Errors
    /// Returns the first failing step.
    pub async fn run(
        &mut self,
        access: &dyn ClusterAccess,
        cluster: &Cluster,
        talos_config: Option<&ClientConfig>,
        nodes: &[NodeRequest],
        siderolink: Option<&SiderolinkRequest>,
    ) -> Result<()> {
        if let Some(talos_config) = talos_config {
            self.steps(access, talos_config, nodes, siderolink).await?;
        }

        show_cluster(cluster, &mut std::io::stdout())
    }

    async fn steps(
        &mut self,
        access: &dyn ClusterAccess,
        talos_config: &ClientConfig,
        nodes: &[NodeRequest],
        siderolink: Option<&SiderolinkRequest>,
    ) -> Result<()> {
        let options = self.options;

        self.save_talos_config(talos_config)?;

        if options.apply_config_enabled {
            access
                .apply_config(nodes, siderolink, &mut std::io::stdout())
                .await?;
        }

        if !options.with_init_node {
            access
                .bootstrap()
                .await
                .map_err(|e| anyhow!("bootstrap error: {e:#}"))?;
        }

        if !options.cluster_wait {
            debug!("Not waiting for the cluster, skipping readiness checks");
            return Ok(());
        }

        let mut checks = if options.skip_k8s_node_readiness_check {
            check::pre_boot_and_components()
        } else {
            check::default_cluster_checks()
        };
        checks.append(&mut self.extra_checks);

        check::wait(
            access,
            &checks,
            options.cluster_wait_timeout,
            &mut std::io::stderr(),
        )
        .await?;

        if !options.skip_kubeconfig {
            self.merge_kubeconfig(access).await?;
        }

        Ok(())
    }

    fn save_talos_config(&self, talos_config: &ClientConfig) -> Result<()> {
        let path = resolve_path(self.options.talosconfig.as_deref())?;

        let mut config = ClientConfig::open(&path).context("error opening talos config")?;
        for rename in config.merge(talos_config) {
            ui::print_info(&format!("renamed talosconfig context {rename}"));
        }
        config.save(&path)?;

        info!(path = %path.display(), "Saved talosconfig");
        Ok(())
    }

    async fn merge_kubeconfig(&self, access: &dyn ClusterAccess) -> Result<()> {
        let path = match &self.kubeconfig_path {
            Some(path) => path.clone(),
            None => default_kubeconfig_path().context("Could not determine home directory")?,
        };

        eprintln!("\nmerging kubeconfig into {:?}", path.display().to_string());

        let bytes = access.kubeconfig().await.context("error fetching kubeconfig")?;
        let mut admin = kubeconfig::parse(&bytes)?;

        if let Some(endpoint) = &self.options.force_endpoint {
            let server = forced_server(endpoint, self.options.control_plane_port);
            kubeconfig::set_server(&mut admin, &server);
        }

        for rename in merge_into(&path, &admin)? {
            ui::print_info(&rename.to_string());
        }
        Ok(())
    }
}

/// `https://<endpoint>:<port>`, bracketing IPv6 literals.
fn forced_server(endpoint: &str, port: u16) -> String {
    match endpoint.parse() {
        Ok(ip) => format!("https://{}", SocketAddr::new(ip, port)),
        Err(_) => format!("https://{endpoint}:{port}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forced_server() {
        assert_eq!(forced_server("talos.local", 6443), "https://talos.local:6443");
        assert_eq!(forced_server("10.5.0.2", 6443), "https://10.5.0.2:6443");
        assert_eq!(forced_server("fd00::2", 6443), "https://[fd00::2]:6443");
    }
}
