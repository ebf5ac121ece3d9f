//! Readiness checks run after a cluster is bootstrapped.
//!
//! A check is polled until it succeeds or the shared deadline passes.
//! Progress is reported as `waiting for <description>`, then
//! `waiting for <description>: <error>` whenever the failure changes, and
//! finally `<description>: OK`.

use std::io::Write;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams};
use tokio::time::Instant;
use tracing::debug;

use crate::access::ClusterAccess;

/// Interval between two attempts of the same check.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

const CONTROL_PLANE_COMPONENTS: [&str; 3] = [
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
];

/// A single readiness predicate.
#[async_trait]
pub trait ClusterCheck: Send + Sync {
    fn description(&self) -> String;

    /// One attempt. An error means "not ready yet".
    async fn check(&self, access: &dyn ClusterAccess) -> Result<()>;
}

/// Built-in checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    ApidReady,
    EtcdHealthy,
    KubernetesApiReachable,
    ControlPlaneStaticPods,
    NodesReport,
    NodesReady,
}

/// Checks that only need the machine API.
#[must_use]
pub fn pre_boot_sequence() -> Vec<Box<dyn ClusterCheck>> {
    vec![Box::new(Check::ApidReady), Box::new(Check::EtcdHealthy)]
}

/// Checks on the Kubernetes control plane.
#[must_use]
pub fn k8s_components_readiness() -> Vec<Box<dyn ClusterCheck>> {
    vec![
        Box::new(Check::KubernetesApiReachable),
        Box::new(Check::ControlPlaneStaticPods),
    ]
}

/// Full battery run by `create --wait`.
#[must_use]
pub fn default_cluster_checks() -> Vec<Box<dyn ClusterCheck>> {
    let mut checks = pre_boot_sequence();
    checks.push(Box::new(Check::NodesReport));
    checks.push(Box::new(Check::NodesReady));
    checks.extend(k8s_components_readiness());
    checks
}

/// Battery used when node readiness is skipped.
#[must_use]
pub fn pre_boot_and_components() -> Vec<Box<dyn ClusterCheck>> {
    let mut checks = pre_boot_sequence();
    checks.extend(k8s_components_readiness());
    checks
}

/// Whether a node carries a `Ready=True` condition.
#[must_use]
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn pod_is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        == Some("Running")
}

#[async_trait]
impl ClusterCheck for Check {
    fn description(&self) -> String {
        match self {
            Self::ApidReady => "all nodes to report apid",
            Self::EtcdHealthy => "etcd to be healthy",
            Self::KubernetesApiReachable => "kubernetes API to be reachable",
            Self::ControlPlaneStaticPods => "control plane static pods to be running",
            Self::NodesReport => "all k8s nodes to report",
            Self::NodesReady => "all k8s nodes to report ready",
        }
        .to_string()
    }

    async fn check(&self, access: &dyn ClusterAccess) -> Result<()> {
        let info = access.info();

        match self {
            Self::ApidReady => {
                for node in &info.nodes {
                    let ip = node.primary_ip().context("node without address")?;
                    access
                        .machine_version(ip)
                        .await
                        .with_context(|| format!("{}: apid not ready", node.name))?;
                }
                Ok(())
            }
            Self::EtcdHealthy => {
                for node in info.control_planes() {
                    let ip = node.primary_ip().context("node without address")?;
                    if !access.service_health(ip, "etcd").await? {
                        bail!("{}: etcd is not healthy", node.name);
                    }
                }
                Ok(())
            }
            Self::KubernetesApiReachable => {
                let client = access.kubernetes_client().await?;
                let version = client.apiserver_version().await?;
                debug!(version = %version.git_version, "Kubernetes API reachable");
                Ok(())
            }
            Self::ControlPlaneStaticPods => {
                let client = access.kubernetes_client().await?;
                let pods: Api<Pod> = Api::namespaced(client, "kube-system");
                let expected = info.control_planes().count();

                for component in CONTROL_PLANE_COMPONENTS {
                    let list = pods
                        .list(&ListParams::default().labels(&format!("k8s-app={component}")))
                        .await?;
                    let running = list.items.iter().filter(|pod| pod_is_running(pod)).count();
                    if running < expected {
                        bail!("{component}: {running} of {expected} pods running");
                    }
                }
                Ok(())
            }
            Self::NodesReport | Self::NodesReady => {
                let client = access.kubernetes_client().await?;
                let nodes: Api<Node> = Api::all(client);
                let list = nodes.list(&ListParams::default()).await?;

                let expected = info.nodes.len();
                if list.items.len() != expected {
                    bail!("expected {expected} nodes, got {}", list.items.len());
                }

                if *self == Self::NodesReady {
                    let not_ready: Vec<String> = list
                        .items
                        .iter()
                        .filter(|node| !node_is_ready(node))
                        .filter_map(|node| node.metadata.name.clone())
                        .collect();
                    if !not_ready.is_empty() {
                        bail!("nodes not ready: {}", not_ready.join(", "));
                    }
                }
                Ok(())
            }
        }
    }
}

/// Run `checks` in order until each passes, all bounded by `timeout`.
///
/// # Errors
/// Returns the last failure of the check that was pending when the
/// deadline passed.
pub async fn wait(
    access: &dyn ClusterAccess,
    checks: &[Box<dyn ClusterCheck>],
    timeout: Duration,
    reporter: &mut (dyn Write + Send),
) -> Result<()> {
    let deadline = Instant::now() + timeout;

    for check in checks {
        let description = check.description();
        writeln!(reporter, "waiting for {description}")?;

        let mut last_error = String::new();
        loop {
            match check.check(access).await {
                Ok(()) => {
                    writeln!(reporter, "{description}: OK")?;
                    break;
                }
                Err(e) => {
                    debug!(check = %description, error = %e, "Check not passing yet");
                    let message = format!("{e:#}");
                    if message != last_error {
                        writeln!(reporter, "waiting for {description}: {message}")?;
                        last_error = message;
                    }
                    if Instant::now() + POLL_INTERVAL > deadline {
                        bail!("{description}: {e:#}");
                    }
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    Ok(())
}
