//! Docker provider: every node is a privileged container on a bridge network.

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ipnet::IpNet;
use machinery::{Comments, GenOption, IfaceSelector, NetworkOption};
use tracing::{info, warn};

use super::traits::{disk_letter, https_endpoint, Options, Provider, ProviderError};
use crate::exec;
use crate::request::{ClusterRequest, NetworkRequest, NodeRequest};
use crate::state::{Cluster, ClusterInfo, NetworkInfo, NodeInfo};

/// Provisioner name.
pub const NAME: &str = "docker";

/// Machine API port published from the first control plane.
pub const APID_PORT: u16 = 50000;

const LABEL_OWNED: &str = "talos.owned=true";
const LABEL_CLUSTER: &str = "talos.cluster.name";
const LABEL_TYPE: &str = "talos.type";

const TMPFS_MOUNTS: [&str; 3] = ["/run", "/system", "/tmp"];
const VOLUME_MOUNTS: [&str; 6] = [
    "/system/state",
    "/var",
    "/etc/cni",
    "/etc/kubernetes",
    "/usr/libexec/kubernetes",
    "/opt",
];

/// Docker CLI backed provider.
#[derive(Debug, Default)]
pub struct Docker;

impl Docker {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn create_network(&self, network: &NetworkRequest, cluster: &str) -> Result<(), ProviderError> {
        info!(network = %network.name, "creating network");
        exec::run("docker", network_create_args(network, cluster)).await?;
        Ok(())
    }

    async fn create_node(
        &self,
        request: &ClusterRequest,
        node: &NodeRequest,
        options: &Options,
        publish: bool,
    ) -> Result<NodeInfo, ProviderError> {
        info!(node = %node.name, "creating node");
        let args = run_args(request, node, options, publish)?;
        let id = exec::run("docker", args).await?;

        Ok(NodeInfo {
            id,
            uuid: node.uuid,
            name: node.name.clone(),
            machine_type: node.machine_type,
            ips: node.ips.clone(),
            nano_cpus: node.nano_cpus,
            memory: node.memory,
            disk_size: 0,
        })
    }
}

/// Arguments of `docker network create` for the cluster network.
#[must_use]
pub fn network_create_args(network: &NetworkRequest, cluster: &str) -> Vec<String> {
    let mut args = vec![
        "network".to_string(),
        "create".to_string(),
        "--driver".to_string(),
        "bridge".to_string(),
        "--label".to_string(),
        LABEL_OWNED.to_string(),
        "--label".to_string(),
        format!("{LABEL_CLUSTER}={cluster}"),
        "--opt".to_string(),
        format!("com.docker.network.driver.mtu={}", network.mtu),
    ];

    let mut ipv6 = false;
    for (cidr, gateway) in network.cidrs.iter().zip(&network.gateway_addrs) {
        if matches!(cidr, IpNet::V6(_)) {
            if network.docker_disable_ipv6 {
                continue;
            }
            ipv6 = true;
        }
        args.push("--subnet".to_string());
        args.push(cidr.to_string());
        args.push("--gateway".to_string());
        args.push(gateway.to_string());
    }
    if ipv6 {
        args.push("--ipv6".to_string());
    }

    args.push(network.name.clone());
    args
}

/// Arguments of `docker run` for one node.
///
/// # Errors
/// Returns an error if the node config cannot be encoded.
pub fn run_args(
    request: &ClusterRequest,
    node: &NodeRequest,
    options: &Options,
    publish: bool,
) -> Result<Vec<String>, ProviderError> {
    let mut args: Vec<String> = [
        "run",
        "--detach",
        "--privileged",
        "--read-only",
        "--security-opt",
        "seccomp=unconfined",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        args.push(value);
    };

    push("--name", node.name.clone());
    push("--hostname", node.name.clone());
    push("--network", request.network.name.clone());
    push("--label", LABEL_OWNED.to_string());
    push("--label", format!("{LABEL_CLUSTER}={}", request.name));
    push("--label", format!("{LABEL_TYPE}={}", node.machine_type));
    push("--env", "PLATFORM=container".to_string());

    if let Some(config) = &node.config {
        let encoded = STANDARD.encode(config.encode(Comments::Disabled)?);
        push("--env", format!("USERDATA={encoded}"));
    }

    for ip in &node.ips {
        match ip {
            IpAddr::V4(_) => push("--ip", ip.to_string()),
            IpAddr::V6(_) if !request.network.docker_disable_ipv6 => push("--ip6", ip.to_string()),
            IpAddr::V6(_) => {}
        }
    }

    if node.nano_cpus > 0 {
        #[allow(clippy::cast_precision_loss)]
        let cpus = node.nano_cpus as f64 / 1e9;
        push("--cpus", format!("{cpus}"));
    }
    if node.memory > 0 {
        push("--memory", node.memory.to_string());
    }

    for path in TMPFS_MOUNTS {
        push("--tmpfs", path.to_string());
    }
    for path in VOLUME_MOUNTS {
        push("--volume", path.to_string());
    }
    for mount in &node.mounts {
        push("--mount", mount.clone());
    }

    if publish {
        let host_ip = &options.docker_ports_host_ip;
        push("--publish", format!("{host_ip}:{APID_PORT}:{APID_PORT}/tcp"));
        for port in &request.network.load_balancer_ports {
            push("--publish", format!("{host_ip}:{port}:{port}/tcp"));
        }
        for spec in &options.docker_ports {
            push("--publish", format!("{host_ip}:{spec}"));
        }
    }

    args.push(options.docker_image.clone());
    Ok(args)
}

#[async_trait]
impl Provider for Docker {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn create(
        &self,
        request: &ClusterRequest,
        options: &Options,
    ) -> Result<Cluster, ProviderError> {
        exec::require("docker")?;
        if options.docker_image.is_empty() {
            return Err(ProviderError::Config("docker image is required".to_string()));
        }

        self.create_network(&request.network, &request.name).await?;

        let first_control_plane = request.control_planes().next().map(|node| node.name.as_str());
        let mut nodes = Vec::with_capacity(request.nodes.len());
        for node in &request.nodes {
            let publish = Some(node.name.as_str()) == first_control_plane;
            nodes.push(self.create_node(request, node, options, publish).await?);
        }

        let port = request.network.load_balancer_ports.first().copied();
        let mut cluster = Cluster::new(
            NAME,
            &request.state_directory,
            ClusterInfo {
                cluster_name: request.name.clone(),
                network: NetworkInfo {
                    name: request.network.name.clone(),
                    cidrs: request.network.cidrs.clone(),
                    gateway_addrs: request.network.gateway_addrs.clone(),
                    mtu: request.network.mtu,
                },
                nodes,
                kubernetes_endpoint: port.map(|port| {
                    self.external_kubernetes_control_plane_endpoint(&request.network, port)
                }),
            },
        );
        cluster.save()?;

        Ok(cluster)
    }

    async fn reflect(
        &self,
        cluster_name: &str,
        state_directory: &Path,
    ) -> Result<Cluster, ProviderError> {
        let cluster = Cluster::load(state_directory, cluster_name)?
            .ok_or_else(|| ProviderError::NotFound(cluster_name.to_string()))?;
        if cluster.provisioner != NAME {
            return Err(ProviderError::Config(format!(
                "cluster {cluster_name:?} was created by {:?}",
                cluster.provisioner
            )));
        }
        Ok(cluster)
    }

    async fn start(&self, cluster: &Cluster) -> Result<(), ProviderError> {
        let mut args = vec!["start".to_string()];
        args.extend(cluster.info.nodes.iter().map(|node| node.name.clone()));
        exec::run("docker", args).await?;
        info!(cluster = %cluster.info.cluster_name, "started nodes");
        Ok(())
    }

    async fn destroy(&self, cluster: &Cluster) -> Result<(), ProviderError> {
        info!("destroying nodes");
        for node in &cluster.info.nodes {
            if let Err(e) = exec::run("docker", ["rm", "--force", "--volumes", node.name.as_str()]).await {
                warn!(node = %node.name, error = %e, "Failed to remove container");
            }
        }

        info!("destroying network {}", cluster.info.network.name);
        if let Err(e) = exec::run("docker", ["network", "rm", cluster.info.network.name.as_str()]).await {
            warn!(network = %cluster.info.network.name, error = %e, "Failed to remove network");
        }

        match std::fs::remove_dir_all(&cluster.state_directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::io(&cluster.state_directory, e)),
        }
    }

    async fn crash_dump(&self, cluster: &Cluster, out: &mut (dyn std::io::Write + Send)) {
        for node in &cluster.info.nodes {
            let logs = match exec::run("docker", ["logs", node.name.as_str()]).await {
                Ok(logs) => logs,
                Err(e) => format!("failed to collect logs: {e}"),
            };
            let _ = writeln!(out, "> {}\n{logs}\n", node.name);
        }
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn gen_options(&self, network: &NetworkRequest) -> Vec<GenOption> {
        if network.nameservers.is_empty() {
            return Vec::new();
        }
        vec![GenOption::NetworkOptions(vec![NetworkOption::Nameservers(
            network.nameservers.iter().map(ToString::to_string).collect(),
        )])]
    }

    fn in_cluster_kubernetes_control_plane_endpoint(
        &self,
        network: &NetworkRequest,
        port: u16,
    ) -> String {
        let host = network
            .first_node_address()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        https_endpoint(host, port)
    }

    fn external_kubernetes_control_plane_endpoint(
        &self,
        _network: &NetworkRequest,
        port: u16,
    ) -> String {
        https_endpoint(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn talos_api_endpoints(&self, _network: &NetworkRequest) -> Vec<String> {
        vec![format!("127.0.0.1:{APID_PORT}")]
    }

    fn first_interface(&self) -> IfaceSelector {
        IfaceSelector::Name("eth0".to_string())
    }

    fn user_disk_name(&self, index: usize) -> String {
        format!("/dev/sd{}", disk_letter(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::BootAssets;
    use machinery::MachineType;

    fn request() -> ClusterRequest {
        let mut node = NodeRequest::new("lab-controlplane-1", MachineType::ControlPlane);
        node.ips = vec!["10.5.0.2".parse().unwrap(), "fd74:616c:a05::2".parse().unwrap()];
        node.nano_cpus = 2_000_000_000;
        node.memory = 1024;

        ClusterRequest {
            name: "lab".to_string(),
            state_directory: "/tmp/state".into(),
            self_executable: "/usr/bin/taloslab".into(),
            network: NetworkRequest {
                name: "lab".to_string(),
                cidrs: vec![
                    "10.5.0.0/24".parse().unwrap(),
                    "fd74:616c:a05::/64".parse().unwrap(),
                ],
                gateway_addrs: vec!["10.5.0.1".parse().unwrap(), "fd74:616c:a05::1".parse().unwrap()],
                mtu: 1500,
                load_balancer_ports: vec![6443],
                ..NetworkRequest::default()
            },
            nodes: vec![node],
            siderolink: None,
            boot_assets: BootAssets::default(),
        }
    }

    #[test]
    fn test_network_args_include_both_families() {
        let request = request();
        let args = network_create_args(&request.network, &request.name).join(" ");
        assert!(args.contains("--subnet 10.5.0.0/24 --gateway 10.5.0.1"));
        assert!(args.contains("--subnet fd74:616c:a05::/64"));
        assert!(args.contains("--ipv6"));
        assert!(args.ends_with(" lab"));
    }

    #[test]
    fn test_network_args_skip_disabled_ipv6() {
        let mut request = request();
        request.network.docker_disable_ipv6 = true;
        let args = network_create_args(&request.network, &request.name).join(" ");
        assert!(!args.contains("--ipv6"));
        assert!(!args.contains("fd74"));
    }

    #[test]
    fn test_run_args_publish_first_control_plane() {
        let request = request();
        let options = Options::new()
            .with_docker_image("ghcr.io/siderolabs/talos:v1.12.0")
            .with_docker_ports(vec!["8080:80/tcp".to_string()]);
        let args = run_args(&request, &request.nodes[0], &options, true).unwrap().join(" ");

        assert!(args.contains("--publish 0.0.0.0:50000:50000/tcp"));
        assert!(args.contains("--publish 0.0.0.0:6443:6443/tcp"));
        assert!(args.contains("--publish 0.0.0.0:8080:80/tcp"));
        assert!(args.contains("--ip 10.5.0.2"));
        assert!(args.contains("--ip6 fd74:616c:a05::2"));
        assert!(args.contains("--cpus 2"));
        assert!(args.contains("--label talos.type=controlplane"));
        assert!(args.ends_with("ghcr.io/siderolabs/talos:v1.12.0"));
    }

    #[test]
    fn test_endpoints() {
        let provider = Docker::new();
        let network = request().network;
        assert_eq!(
            provider.in_cluster_kubernetes_control_plane_endpoint(&network, 6443),
            "https://10.5.0.2:6443"
        );
        assert_eq!(
            provider.external_kubernetes_control_plane_endpoint(&network, 6443),
            "https://127.0.0.1:6443"
        );
        assert_eq!(provider.talos_api_endpoints(&network), vec!["127.0.0.1:50000"]);
        assert_eq!(provider.user_disk_name(1), "/dev/sdb");
    }
}
