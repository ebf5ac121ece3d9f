//! Cluster request builder.
//!
//! [`ClusterMaker`] turns [`CommonOptions`] into a partial
//! [`ClusterRequest`]: network, node inventory with names, addresses and
//! resources, plus the generator options, patches and provision options every
//! provider shares. The provider addenda in [`docker`] and [`qemu`] then adjust
//! the nodes and contribute their own options before [`ClusterMaker::create`]
//! builds the config bundle, attaches a config to every node and hands the
//! request to the provider.
//!
//! # Example
//!
//! ```rust,ignore
//! let provider = provision::factory("docker")?;
//! let mut maker = ClusterMaker::new(provider.as_ref(), common, "v1.12.0")?;
//! maker::docker::apply(&mut maker, &docker_options)?;
//! let cluster = maker.create().await?;
//! ```

pub mod docker;
pub mod qemu;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use machinery::bundle::{Bundle, BundleOptions, InputOptions};
use machinery::generate::{DEFAULT_API_SERVER_PORT, DEFAULT_KUBE_PRISM_PORT};
use machinery::patch::{apply_to_config, load_patches};
use machinery::{
    ClientConfig, Comments, Container, Document, GenOption, MachineType, NetworkOption, Patch,
    VersionContract,
};
use provision::{Cluster, ClusterRequest, NetworkRequest, NodeRequest, Options, Provider};
use serde_yaml::{Mapping, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{CreateError, Result};
use crate::network::AddressPlan;
use crate::options::{parse_cpu_share, CommonOptions, WIREGUARD_LISTEN_PORT};
use crate::wireguard::WireguardMesh;

/// Port of the host-side JSON logs receiver.
pub const JSON_LOGS_PORT: u16 = 4003;

const MIB: u64 = 1024 * 1024;

/// Accumulates everything needed to create a cluster.
pub struct ClusterMaker<'a> {
    provider: &'a dyn Provider,
    options: CommonOptions,
    talos_version: String,
    version_contract: Option<VersionContract>,
    plan: AddressPlan,
    request: ClusterRequest,
    provision_options: Options,
    gen_options: Vec<GenOption>,
    bundle_options: BundleOptions,
    in_cluster_endpoint: Option<String>,
    config_output_dir: PathBuf,
    bundle: Option<Bundle>,
}

impl<'a> ClusterMaker<'a> {
    /// Plan the network and nodes and collect the common options.
    ///
    /// `talos_version` is the release the configs are generated for;
    /// `latest` skips the version contract.
    ///
    /// # Errors
    /// Returns an error for an unparseable Talos version, fewer than one
    /// control plane, malformed CPU shares, an invalid network or a patch
    /// that does not load.
    pub fn new(
        provider: &'a dyn Provider,
        options: CommonOptions,
        talos_version: &str,
    ) -> Result<Self> {
        let version_contract = if talos_version == "latest" {
            None
        } else {
            Some(VersionContract::parse(talos_version).map_err(|source| {
                CreateError::VersionParse {
                    version: talos_version.to_string(),
                    source,
                }
            })?)
        };

        if options.controlplanes < 1 {
            return Err(CreateError::Invalid(
                "number of controlplanes can't be less than 1".to_string(),
            ));
        }

        let plan = AddressPlan::new(
            &options.network_cidr,
            options.network_ipv4,
            options.network_ipv6,
            options.controlplanes + options.workers,
        )?;

        let request = ClusterRequest {
            name: options.cluster.name.clone(),
            state_directory: options.cluster.state_dir(),
            self_executable: std::env::current_exe()?,
            network: NetworkRequest {
                name: options.cluster.name.clone(),
                cidrs: plan.cidrs.clone(),
                gateway_addrs: plan.gateways.clone(),
                mtu: options.network_mtu,
                load_balancer_ports: vec![options.control_plane_port],
                ..NetworkRequest::default()
            },
            nodes: node_requests(&options, &plan)?,
            siderolink: None,
            boot_assets: provision::BootAssets::default(),
        };

        let mut maker = Self {
            provider,
            options,
            talos_version: talos_version.to_string(),
            version_contract,
            plan,
            request,
            provision_options: Options::new(),
            gen_options: Vec::new(),
            bundle_options: BundleOptions::new(),
            in_cluster_endpoint: None,
            config_output_dir: PathBuf::from("."),
            bundle: None,
        };

        maker.init_provision_options();
        maker.init_bundle_options()?;
        maker.init_gen_options()?;

        debug!(
            cluster = %maker.request.name,
            nodes = maker.request.nodes.len(),
            "Planned cluster request"
        );
        Ok(maker)
    }

    fn init_provision_options(&mut self) {
        let mut options = Options::new();
        if self.options.with_json_logs {
            options = options.with_json_logs_endpoint(
                SocketAddr::new(self.plan.primary_gateway(), JSON_LOGS_PORT).to_string(),
            );
        }
        self.provision_options = options.with_kubernetes_endpoint(
            self.provider.external_kubernetes_control_plane_endpoint(
                &self.request.network,
                self.options.control_plane_port,
            ),
        );
    }

    fn init_bundle_options(&mut self) -> Result<()> {
        let mut patches = load_patches(&self.options.config_patch)?;
        let control_plane = load_patches(&self.options.config_patch_control_plane)?;
        let worker = load_patches(&self.options.config_patch_worker)?;

        if self.options.with_json_logs {
            patches.push(json_logs_patch(self.plan.primary_gateway())?);
        }

        self.bundle_options = BundleOptions::new()
            .with_patches(patches)
            .with_patches_control_plane(control_plane)
            .with_patches_worker(worker);
        Ok(())
    }

    /// Everything after the provider's own generator options. The leading
    /// options are added in [`Self::generator_options`].
    fn init_gen_options(&mut self) -> Result<()> {
        let options = &self.options;
        let mut gen = Vec::new();

        for spec in &options.registry_mirrors {
            let (host, endpoint) = spec.split_once('=').ok_or_else(|| {
                CreateError::Invalid(format!("invalid registry mirror spec: {spec:?}"))
            })?;
            gen.push(GenOption::RegistryMirror {
                host: host.to_string(),
                endpoint: endpoint.to_string(),
            });
        }
        for host in &options.registry_insecure {
            gen.push(GenOption::RegistryInsecureSkipVerify(host.clone()));
        }

        if let Some(contract) = self.version_contract {
            gen.push(GenOption::VersionContract(contract));
        }

        if let Some(url) = options.custom_cni_url.as_ref().filter(|url| !url.is_empty()) {
            gen.push(GenOption::ClusterCni {
                name: "custom".to_string(),
                urls: vec![url.clone()],
            });
        }

        if options.kube_prism_port != DEFAULT_KUBE_PRISM_PORT {
            gen.push(GenOption::KubePrismPort(options.kube_prism_port));
        }
        if options.control_plane_port != DEFAULT_API_SERVER_PORT {
            gen.push(GenOption::LocalApiServerPort(options.control_plane_port));
        }
        if options.enable_kube_span {
            gen.push(GenOption::NetworkOptions(vec![NetworkOption::KubeSpan(true)]));
        }

        gen.extend(self.endpoint_list_options());
        self.gen_options = gen;
        Ok(())
    }

    /// Machine API endpoints written into the client config.
    fn endpoint_list_options(&self) -> Vec<GenOption> {
        if let Some(endpoint) = &self.options.force_endpoint {
            return vec![
                GenOption::AdditionalSubjectAltNames(vec![endpoint.clone()]),
                GenOption::EndpointList(vec![endpoint.clone()]),
            ];
        }

        if self.options.force_init_node_as_endpoint {
            return vec![GenOption::EndpointList(
                self.plan.first_ips(1).iter().map(ToString::to_string).collect(),
            )];
        }

        let endpoints = self.provider.talos_api_endpoints(&self.request.network);
        if endpoints.is_empty() {
            // client-side load balancing over the control planes
            return vec![GenOption::EndpointList(
                self.plan
                    .first_ips(self.options.controlplanes)
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            )];
        }

        vec![
            GenOption::AdditionalSubjectAltNames(
                endpoints.iter().map(|endpoint| endpoint_host(endpoint)).collect(),
            ),
            GenOption::EndpointList(endpoints),
        ]
    }

    /// Full generator option list in application order.
    #[must_use]
    pub fn generator_options(&self) -> Vec<GenOption> {
        let mut gen = vec![
            GenOption::Debug(self.options.config_debug),
            GenOption::DnsDomain(self.options.dns_domain.clone()),
            GenOption::ClusterDiscovery(self.options.enable_cluster_discovery),
        ];
        gen.extend(self.provider.gen_options(&self.request.network));
        gen.extend(self.gen_options.iter().cloned());
        gen
    }

    #[must_use]
    pub fn options(&self) -> &CommonOptions {
        &self.options
    }

    #[must_use]
    pub fn provider(&self) -> &'a dyn Provider {
        self.provider
    }

    #[must_use]
    pub fn plan(&self) -> &AddressPlan {
        &self.plan
    }

    /// Talos release the configs target.
    #[must_use]
    pub fn talos_version(&self) -> &str {
        &self.talos_version
    }

    #[must_use]
    pub fn version_contract(&self) -> Option<VersionContract> {
        self.version_contract
    }

    #[must_use]
    pub fn request(&self) -> &ClusterRequest {
        &self.request
    }

    /// Mutable access for provider addenda. Must not be used after
    /// [`Self::create`].
    pub fn request_mut(&mut self) -> &mut ClusterRequest {
        &mut self.request
    }

    #[must_use]
    pub fn provision_options(&self) -> &Options {
        &self.provision_options
    }

    pub fn provision_options_mut(&mut self) -> &mut Options {
        &mut self.provision_options
    }

    #[must_use]
    pub fn bundle_options(&self) -> &BundleOptions {
        &self.bundle_options
    }

    /// Config bundle, once [`Self::finalize`] has run.
    #[must_use]
    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    pub fn add_gen_options(&mut self, options: impl IntoIterator<Item = GenOption>) {
        self.gen_options.extend(options);
    }

    pub fn add_patches(&mut self, patches: impl IntoIterator<Item = Patch>) {
        self.bundle_options = std::mem::take(&mut self.bundle_options).with_patches(patches);
    }

    pub fn add_control_plane_patches(&mut self, patches: impl IntoIterator<Item = Patch>) {
        self.bundle_options =
            std::mem::take(&mut self.bundle_options).with_patches_control_plane(patches);
    }

    pub fn add_worker_patches(&mut self, patches: impl IntoIterator<Item = Patch>) {
        self.bundle_options = std::mem::take(&mut self.bundle_options).with_patches_worker(patches);
    }

    /// Override the control plane URL nodes use.
    pub fn set_in_cluster_endpoint(&mut self, endpoint: impl Into<String>) {
        self.in_cluster_endpoint = Some(endpoint.into());
    }

    /// Directory `--skip-injecting-config` writes configs to. Defaults to
    /// the current directory.
    #[must_use]
    pub fn with_config_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_output_dir = dir.into();
        self
    }

    /// Build the config bundle and attach a config to every node.
    ///
    /// # Errors
    /// Returns an error if the bundle cannot be generated or loaded, a patch
    /// does not apply, or the bundle lacks a client config while waiting or
    /// applying configs was requested.
    pub fn finalize(&mut self) -> Result<()> {
        let bundle_options = if let Some(dir) = &self.options.input_dir {
            self.bundle_options.clone().with_existing_configs(dir)
        } else {
            let endpoint = self.in_cluster_endpoint.clone().unwrap_or_else(|| {
                self.provider.in_cluster_kubernetes_control_plane_endpoint(
                    &self.request.network,
                    self.options.control_plane_port,
                )
            });
            info!(endpoint = %endpoint, "Generating machine configs");

            self.bundle_options.clone().with_input_options(InputOptions {
                cluster_name: self.request.name.clone(),
                endpoint,
                kubernetes_version: self
                    .options
                    .kubernetes_version
                    .trim_start_matches('v')
                    .to_string(),
                gen_options: self.generator_options(),
            })
        };

        let bundle = Bundle::new(bundle_options)?;

        if bundle.talos_config.is_none() {
            if self.options.cluster_wait {
                return Err(CreateError::Invalid(
                    "no talosconfig in the config bundle: cannot wait for cluster".to_string(),
                ));
            }
            if self.options.apply_config_enabled {
                return Err(CreateError::Invalid(
                    "no talosconfig in the config bundle: cannot apply config".to_string(),
                ));
            }
        }

        if self.options.skip_injecting_config {
            self.write_bundle(&bundle)?;
        }

        if let Some(talos_config) = &bundle.talos_config {
            self.provision_options.talos_config = Some(talos_config.clone());
        }

        self.attach_node_configs(&bundle)?;
        self.bundle = Some(bundle);
        Ok(())
    }

    fn write_bundle(&self, bundle: &Bundle) -> Result<()> {
        let mut types = vec![MachineType::ControlPlane, MachineType::Worker];
        if self.options.with_init_node {
            types.insert(0, MachineType::Init);
        }

        let dir: &Path = &self.config_output_dir;
        bundle.write(dir, Comments::All, &types)?;
        bundle.write_talos_config(dir)?;
        Ok(())
    }

    fn attach_node_configs(&mut self, bundle: &Bundle) -> Result<()> {
        let mesh = match &self.options.wireguard_cidr {
            Some(cidr) => {
                let primary: Vec<IpAddr> = self
                    .request
                    .nodes
                    .iter()
                    .filter_map(|node| node.ips.first().copied())
                    .collect();
                Some(WireguardMesh::new(
                    &primary,
                    cidr,
                    WIREGUARD_LISTEN_PORT,
                    self.options.controlplanes,
                )?)
            }
            None => None,
        };

        for node in &mut self.request.nodes {
            if self.options.skip_injecting_config {
                node.config = None;
                continue;
            }

            let mut config = bundle.config(node.machine_type).cloned().ok_or_else(|| {
                CreateError::Invalid(format!("config bundle has no {} config", node.machine_type))
            })?;

            if let (Some(mesh), Some(ip)) = (&mesh, node.ips.first()) {
                config = apply_to_config(config, &[mesh.patch_for(*ip)?])?;
            }

            node.config = Some(config);
        }

        Ok(())
    }

    /// Finalize the request and create the cluster.
    ///
    /// # Errors
    /// Returns any finalize error or the provider's failure.
    pub async fn create(&mut self) -> Result<Cluster> {
        self.finalize()?;

        info!(
            cluster = %self.request.name,
            provider = self.provider.name(),
            "Creating cluster"
        );
        let cluster = self
            .provider
            .create(&self.request, &self.provision_options)
            .await?;
        Ok(cluster)
    }

    /// Client config of the finalized bundle.
    #[must_use]
    pub fn talos_config(&self) -> Option<&ClientConfig> {
        self.bundle.as_ref().and_then(|bundle| bundle.talos_config.as_ref())
    }
}

fn node_requests(options: &CommonOptions, plan: &AddressPlan) -> Result<Vec<NodeRequest>> {
    let control_plane_cpus = parse_cpu_share(&options.control_plane_cpus)?;
    let worker_cpus = parse_cpu_share(&options.workers_cpus)?;
    let control_plane_memory = memory_bytes(options.control_plane_memory)?;
    let worker_memory = memory_bytes(options.workers_memory)?;
    let name = &options.cluster.name;

    let mut nodes = Vec::with_capacity(options.controlplanes + options.workers);

    for i in 0..options.controlplanes {
        let machine_type = if options.with_init_node && i == 0 {
            MachineType::Init
        } else {
            MachineType::ControlPlane
        };
        let mut node = new_node(options, format!("{name}-controlplane-{}", i + 1), machine_type);
        node.ips = plan.node_ips(i);
        node.memory = control_plane_memory;
        node.nano_cpus = control_plane_cpus;
        nodes.push(node);
    }

    for i in 0..options.workers {
        let mut node = new_node(options, format!("{name}-worker-{}", i + 1), MachineType::Worker);
        node.ips = plan.node_ips(options.controlplanes + i);
        node.memory = worker_memory;
        node.nano_cpus = worker_cpus;
        nodes.push(node);
    }

    Ok(nodes)
}

/// A node with a fresh UUID, named after it under `--with-uuid-hostnames`.
fn new_node(options: &CommonOptions, name: String, machine_type: MachineType) -> NodeRequest {
    let uuid = Uuid::new_v4();
    let name = if options.with_uuid_hostnames {
        format!("machine-{uuid}")
    } else {
        name
    };

    let mut node = NodeRequest::new(name, machine_type);
    node.uuid = Some(uuid);
    node
}

fn memory_bytes(mib: u64) -> Result<i64> {
    mib.checked_mul(MIB)
        .and_then(|bytes| i64::try_from(bytes).ok())
        .ok_or_else(|| CreateError::Invalid(format!("memory size {mib} MiB is too large")))
}

/// `machine.logging.destinations` pointing at the host JSON logs receiver.
fn json_logs_patch(gateway: IpAddr) -> Result<Patch> {
    let mut destination = Mapping::new();
    destination.insert(
        "endpoint".into(),
        format!("tcp://{}", SocketAddr::new(gateway, JSON_LOGS_PORT)).into(),
    );
    destination.insert("format".into(), "json_lines".into());

    let mut doc = Document::new(Mapping::new());
    doc.set(
        &["machine", "logging", "destinations"],
        Value::Sequence(vec![Value::Mapping(destination)]),
    );

    Ok(Patch::strategic(Container::new(vec![doc])?))
}

/// Host part of a `host:port` endpoint, or the whole string if it has no port.
fn endpoint_host(endpoint: &str) -> String {
    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        return addr.ip().to_string();
    }
    if let Ok(ip) = endpoint.parse::<IpAddr>() {
        return ip.to_string();
    }
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            host.trim_start_matches('[').trim_end_matches(']').to_string()
        }
        _ => endpoint.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_host() {
        assert_eq!(endpoint_host("127.0.0.1:50000"), "127.0.0.1");
        assert_eq!(endpoint_host("[fd00::2]:50000"), "fd00::2");
        assert_eq!(endpoint_host("talos.example.com:50000"), "talos.example.com");
        assert_eq!(endpoint_host("talos.example.com"), "talos.example.com");
        assert_eq!(endpoint_host("fd00::2"), "fd00::2");
    }

    #[test]
    fn test_memory_bytes() {
        assert_eq!(memory_bytes(2048).unwrap(), 2_147_483_648);
        assert!(memory_bytes(u64::MAX).is_err());
    }

    #[test]
    fn test_json_logs_patch() {
        let Patch::StrategicMerge(container) =
            json_logs_patch("10.5.0.1".parse().unwrap()).unwrap()
        else {
            panic!("expected strategic merge patch");
        };
        let destinations = container.documents()[0]
            .lookup(&["machine", "logging", "destinations"])
            .and_then(Value::as_sequence)
            .unwrap();
        assert_eq!(destinations[0]["endpoint"], Value::from("tcp://10.5.0.1:4003"));
        assert_eq!(destinations[0]["format"], Value::from("json_lines"));
    }
}
