//! Machine config generation from cluster inputs and generator options.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::clientconfig::{ClientConfig, Context};
use crate::contract::VersionContract;
use crate::document::{Container, Document};
use crate::error::{ConfigError, Result};
use crate::secrets::{CertAndKey, SecretsBundle};
use crate::types::EncryptionSpec;

/// Kubernetes release deployed when none is requested.
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.34.1";

/// Installer image used when no install image option is given.
pub const DEFAULT_INSTALLER_IMAGE: &str = "ghcr.io/siderolabs/installer:latest";

/// KubePrism port enabled by default on supported releases.
pub const DEFAULT_KUBE_PRISM_PORT: u16 = 7445;

/// Kubernetes API server port.
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

const DEFAULT_DNS_DOMAIN: &str = "cluster.local";
const DEFAULT_INSTALL_DISK: &str = "/dev/sda";
const DEFAULT_POD_SUBNET: &str = "10.244.0.0/16";
const DEFAULT_SERVICE_SUBNET: &str = "10.96.0.0/12";

static KUBERNETES_VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+(?:[-+][0-9A-Za-z.\-]+)?$").unwrap());

/// Role of a generated machine config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineType {
    Init,
    ControlPlane,
    Worker,
}

impl MachineType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::ControlPlane => "controlplane",
            Self::Worker => "worker",
        }
    }

    #[must_use]
    pub fn is_control_plane(self) -> bool {
        matches!(self, Self::Init | Self::ControlPlane)
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a network interface is picked out in the machine config.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IfaceSelector {
    /// By link name, e.g. `eth0`.
    Name(String),
    /// By kernel driver, e.g. `virtio_net`.
    Driver(String),
}

impl IfaceSelector {
    fn to_entry(&self) -> Mapping {
        let mut entry = Mapping::new();
        match self {
            Self::Name(name) => {
                entry.insert("interface".into(), name.as_str().into());
            }
            Self::Driver(driver) => {
                entry.insert(
                    "deviceSelector".into(),
                    map([("driver", driver.as_str().into())]),
                );
            }
        }
        entry
    }
}

/// Network-level generator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkOption {
    Nameservers(Vec<String>),
    Mtu(IfaceSelector, u32),
    Dhcp(IfaceSelector, bool),
    Vip(IfaceSelector, String),
    KubeSpan(bool),
}

/// Legacy system disk encryption block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemDiskEncryption {
    pub state: Option<EncryptionSpec>,
    pub ephemeral: Option<EncryptionSpec>,
}

/// A single generator option. Options are applied in order; later ones win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenOption {
    InstallImage(String),
    InstallDisk(String),
    InstallExtraKernelArgs(Vec<String>),
    Debug(bool),
    Persist(bool),
    DnsDomain(String),
    ClusterDiscovery(bool),
    NetworkOptions(Vec<NetworkOption>),
    RegistryMirror { host: String, endpoint: String },
    RegistryInsecureSkipVerify(String),
    VersionContract(VersionContract),
    ClusterCni { name: String, urls: Vec<String> },
    KubePrismPort(u16),
    LocalApiServerPort(u16),
    SystemDiskEncryption(SystemDiskEncryption),
    Sysctls(BTreeMap<String, String>),
    AdditionalSubjectAltNames(Vec<String>),
    EndpointList(Vec<String>),
    AllowSchedulingOnControlPlanes(bool),
}

#[derive(Debug, Clone)]
struct GenOptions {
    install_image: String,
    install_disk: String,
    install_extra_kernel_args: Vec<String>,
    debug: bool,
    persist: bool,
    dns_domain: String,
    discovery_enabled: bool,
    network: Vec<NetworkOption>,
    registry_mirrors: BTreeMap<String, Vec<String>>,
    registry_insecure: Vec<String>,
    contract: VersionContract,
    cni: Option<(String, Vec<String>)>,
    kube_prism_port: u16,
    local_api_server_port: u16,
    encryption: Option<SystemDiskEncryption>,
    sysctls: BTreeMap<String, String>,
    additional_sans: Vec<String>,
    endpoints: Vec<String>,
    allow_scheduling_on_control_planes: bool,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            install_image: DEFAULT_INSTALLER_IMAGE.to_string(),
            install_disk: DEFAULT_INSTALL_DISK.to_string(),
            install_extra_kernel_args: Vec::new(),
            debug: false,
            persist: true,
            dns_domain: DEFAULT_DNS_DOMAIN.to_string(),
            discovery_enabled: true,
            network: Vec::new(),
            registry_mirrors: BTreeMap::new(),
            registry_insecure: Vec::new(),
            contract: VersionContract::default(),
            cni: None,
            kube_prism_port: DEFAULT_KUBE_PRISM_PORT,
            local_api_server_port: 0,
            encryption: None,
            sysctls: BTreeMap::new(),
            additional_sans: Vec::new(),
            endpoints: Vec::new(),
            allow_scheduling_on_control_planes: false,
        }
    }
}

impl GenOptions {
    fn apply(&mut self, option: GenOption) {
        match option {
            GenOption::InstallImage(image) => self.install_image = image,
            GenOption::InstallDisk(disk) => self.install_disk = disk,
            GenOption::InstallExtraKernelArgs(args) => self.install_extra_kernel_args = args,
            GenOption::Debug(debug) => self.debug = debug,
            GenOption::Persist(persist) => self.persist = persist,
            GenOption::DnsDomain(domain) => self.dns_domain = domain,
            GenOption::ClusterDiscovery(enabled) => self.discovery_enabled = enabled,
            GenOption::NetworkOptions(opts) => self.network.extend(opts),
            GenOption::RegistryMirror { host, endpoint } => {
                self.registry_mirrors.entry(host).or_default().push(endpoint);
            }
            GenOption::RegistryInsecureSkipVerify(host) => self.registry_insecure.push(host),
            GenOption::VersionContract(contract) => self.contract = contract,
            GenOption::ClusterCni { name, urls } => self.cni = Some((name, urls)),
            GenOption::KubePrismPort(port) => self.kube_prism_port = port,
            GenOption::LocalApiServerPort(port) => self.local_api_server_port = port,
            GenOption::SystemDiskEncryption(cfg) => self.encryption = Some(cfg),
            GenOption::Sysctls(sysctls) => self.sysctls.extend(sysctls),
            GenOption::AdditionalSubjectAltNames(sans) => {
                for san in sans {
                    if !self.additional_sans.contains(&san) {
                        self.additional_sans.push(san);
                    }
                }
            }
            GenOption::EndpointList(endpoints) => self.endpoints = endpoints,
            GenOption::AllowSchedulingOnControlPlanes(allow) => {
                self.allow_scheduling_on_control_planes = allow;
            }
        }
    }
}

/// Everything needed to generate a cluster's machine configs.
#[derive(Debug, Clone)]
pub struct Input {
    cluster_name: String,
    control_plane_endpoint: String,
    kubernetes_version: String,
    secrets: SecretsBundle,
    options: GenOptions,
}

impl Input {
    /// Build generator input.
    ///
    /// # Errors
    /// Returns [`ConfigError::VersionParse`] for a malformed Kubernetes
    /// version and [`ConfigError::Invalid`] for a malformed endpoint.
    pub fn new(
        cluster_name: impl Into<String>,
        control_plane_endpoint: impl Into<String>,
        kubernetes_version: &str,
        secrets: SecretsBundle,
        options: Vec<GenOption>,
    ) -> Result<Self> {
        let kubernetes_version = kubernetes_version.trim_start_matches('v').to_string();
        if !KUBERNETES_VERSION_RE.is_match(&kubernetes_version) {
            return Err(ConfigError::VersionParse(kubernetes_version));
        }

        let control_plane_endpoint = control_plane_endpoint.into();
        url::Url::parse(&control_plane_endpoint).map_err(|e| {
            ConfigError::Invalid(format!(
                "invalid control plane endpoint {control_plane_endpoint:?}: {e}"
            ))
        })?;

        let mut opts = GenOptions::default();
        for option in options {
            opts.apply(option);
        }

        Ok(Self {
            cluster_name: cluster_name.into(),
            control_plane_endpoint,
            kubernetes_version,
            secrets,
            options: opts,
        })
    }

    #[must_use]
    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    #[must_use]
    pub fn secrets(&self) -> &SecretsBundle {
        &self.secrets
    }

    /// Generate the machine config for one role.
    ///
    /// # Errors
    /// Returns an error if the document cannot be assembled.
    pub fn config(&self, machine_type: MachineType) -> Result<Container> {
        let mut doc = Document::default();
        let opts = &self.options;

        doc.set(&["version"], "v1alpha1".into());
        doc.set(&["debug"], opts.debug.into());
        doc.set(&["persist"], opts.persist.into());

        self.machine_section(&mut doc, machine_type);
        self.cluster_section(&mut doc, machine_type)?;

        debug!(machine_type = %machine_type, cluster = %self.cluster_name, "Generated machine config");
        Container::new(vec![doc])
    }

    /// Generate the client config for this cluster.
    ///
    /// # Errors
    /// Returns an error if the admin certificate cannot be issued.
    pub fn talos_config(&self) -> Result<ClientConfig> {
        let admin = self.secrets.admin_client_cert()?;
        let endpoints = if self.options.endpoints.is_empty() {
            vec!["127.0.0.1".to_string()]
        } else {
            self.options.endpoints.clone()
        };

        let mut config = ClientConfig {
            context: self.cluster_name.clone(),
            ..ClientConfig::default()
        };
        config.contexts.insert(
            self.cluster_name.clone(),
            Context::new(
                endpoints,
                self.secrets.certs.os.crt_b64(),
                admin.crt_b64(),
                admin.key_b64(),
            ),
        );

        Ok(config)
    }

    fn machine_section(&self, doc: &mut Document, machine_type: MachineType) {
        let opts = &self.options;
        let contract = opts.contract;
        let control_plane = machine_type.is_control_plane();

        doc.set(&["machine", "type"], machine_type.as_str().into());
        doc.set(&["machine", "token"], self.secrets.trustd_token.as_str().into());
        doc.set(&["machine", "ca"], ca(&self.secrets.certs.os, control_plane));
        doc.set(&["machine", "certSANs"], strings(&opts.additional_sans));

        doc.set(
            &["machine", "kubelet", "image"],
            format!("ghcr.io/siderolabs/kubelet:v{}", self.kubernetes_version).into(),
        );
        if contract.kubelet_default_runtime_seccomp_profile_enabled() {
            doc.set(
                &["machine", "kubelet", "defaultRuntimeSeccompProfileEnabled"],
                true.into(),
            );
        }
        doc.set(
            &["machine", "kubelet", "disableManifestsDirectory"],
            true.into(),
        );

        doc.set(&["machine", "network"], Value::Mapping(self.network_section()));

        doc.set(&["machine", "install", "disk"], opts.install_disk.as_str().into());
        doc.set(&["machine", "install", "image"], opts.install_image.as_str().into());
        doc.set(&["machine", "install", "wipe"], false.into());
        if !opts.install_extra_kernel_args.is_empty() {
            doc.set(
                &["machine", "install", "extraKernelArgs"],
                strings(&opts.install_extra_kernel_args),
            );
        }

        for (host, endpoints) in &opts.registry_mirrors {
            doc.set(
                &["machine", "registries", "mirrors", host.as_str(), "endpoints"],
                strings(endpoints),
            );
        }
        for host in &opts.registry_insecure {
            doc.set(
                &[
                    "machine",
                    "registries",
                    "config",
                    host.as_str(),
                    "tls",
                    "insecureSkipVerify",
                ],
                true.into(),
            );
        }

        if !opts.sysctls.is_empty() {
            let sysctls: Mapping = opts
                .sysctls
                .iter()
                .map(|(k, v)| (Value::from(k.as_str()), Value::from(v.as_str())))
                .collect();
            doc.set(&["machine", "sysctls"], Value::Mapping(sysctls));
        }

        if let Some(encryption) = &opts.encryption {
            if let Some(state) = &encryption.state {
                doc.set(
                    &["machine", "systemDiskEncryption", "state"],
                    serde_yaml::to_value(state).unwrap_or_default(),
                );
            }
            if let Some(ephemeral) = &encryption.ephemeral {
                doc.set(
                    &["machine", "systemDiskEncryption", "ephemeral"],
                    serde_yaml::to_value(ephemeral).unwrap_or_default(),
                );
            }
        }

        doc.set(&["machine", "features", "rbac"], true.into());
        if contract.stable_hostname_enabled() {
            doc.set(&["machine", "features", "stableHostname"], true.into());
        }
        if contract.apid_ext_key_usage_check_enabled() {
            doc.set(&["machine", "features", "apidCheckExtKeyUsage"], true.into());
        }
        if contract.disk_quota_support_enabled() && control_plane {
            doc.set(&["machine", "features", "diskQuotaSupport"], true.into());
        }
        if contract.kube_prism_enabled() {
            doc.set(
                &["machine", "features", "kubePrism"],
                map([
                    ("enabled", true.into()),
                    ("port", opts.kube_prism_port.into()),
                ]),
            );
        }
        if contract.host_dns_enabled() {
            let mut host_dns = Mapping::new();
            host_dns.insert("enabled".into(), true.into());
            if contract.host_dns_forward_kube_dns_to_host() {
                host_dns.insert("forwardKubeDNSToHost".into(), true.into());
            }
            doc.set(&["machine", "features", "hostDNS"], Value::Mapping(host_dns));
        }
    }

    fn network_section(&self) -> Mapping {
        let mut network = Mapping::new();
        let mut interfaces: Vec<(IfaceSelector, Mapping)> = Vec::new();

        let mut iface = |selector: &IfaceSelector| -> usize {
            if let Some(pos) = interfaces.iter().position(|(s, _)| s == selector) {
                return pos;
            }
            interfaces.push((selector.clone(), selector.to_entry()));
            interfaces.len() - 1
        };

        let mut updates: Vec<(usize, &str, Value)> = Vec::new();
        for option in &self.options.network {
            match option {
                NetworkOption::Nameservers(servers) => {
                    network.insert("nameservers".into(), strings(servers));
                }
                NetworkOption::KubeSpan(enabled) => {
                    network.insert("kubespan".into(), map([("enabled", (*enabled).into())]));
                }
                NetworkOption::Mtu(selector, mtu) => {
                    updates.push((iface(selector), "mtu", (*mtu).into()));
                }
                NetworkOption::Dhcp(selector, enabled) => {
                    updates.push((iface(selector), "dhcp", (*enabled).into()));
                }
                NetworkOption::Vip(selector, ip) => {
                    updates.push((iface(selector), "vip", map([("ip", ip.as_str().into())])));
                }
            }
        }

        for (index, key, value) in updates {
            interfaces[index].1.insert(key.into(), value);
        }

        if !interfaces.is_empty() {
            network.insert(
                "interfaces".into(),
                Value::Sequence(
                    interfaces
                        .into_iter()
                        .map(|(_, entry)| Value::Mapping(entry))
                        .collect(),
                ),
            );
        }

        network
    }

    fn cluster_section(&self, doc: &mut Document, machine_type: MachineType) -> Result<()> {
        let opts = &self.options;
        let contract = opts.contract;
        let secrets = &self.secrets;
        let control_plane = machine_type.is_control_plane();
        let k8s = &self.kubernetes_version;

        doc.set(&["cluster", "id"], secrets.cluster_id.as_str().into());
        doc.set(&["cluster", "secret"], secrets.cluster_secret.as_str().into());
        doc.set(
            &["cluster", "controlPlane", "endpoint"],
            self.control_plane_endpoint.as_str().into(),
        );
        if control_plane && opts.local_api_server_port != 0 {
            doc.set(
                &["cluster", "controlPlane", "localAPIServerPort"],
                opts.local_api_server_port.into(),
            );
        }
        if control_plane || contract.cluster_name_for_workers() {
            doc.set(&["cluster", "clusterName"], self.cluster_name.as_str().into());
        }

        doc.set(&["cluster", "network", "dnsDomain"], opts.dns_domain.as_str().into());
        doc.set(
            &["cluster", "network", "podSubnets"],
            strings(&[DEFAULT_POD_SUBNET.to_string()]),
        );
        doc.set(
            &["cluster", "network", "serviceSubnets"],
            strings(&[DEFAULT_SERVICE_SUBNET.to_string()]),
        );
        if let Some((name, urls)) = &opts.cni {
            doc.set(
                &["cluster", "network", "cni"],
                map([("name", name.as_str().into()), ("urls", strings(urls))]),
            );
        }

        doc.set(&["cluster", "token"], secrets.bootstrap_token.as_str().into());
        doc.set(&["cluster", "ca"], ca(&secrets.certs.k8s, control_plane));

        if control_plane {
            doc.set(
                &["cluster", "secretboxEncryptionSecret"],
                secrets.secretbox_encryption_secret.as_str().into(),
            );
            doc.set(&["cluster", "aggregatorCA"], ca(&secrets.certs.k8s_aggregator, true));
            doc.set(
                &["cluster", "serviceAccount", "key"],
                base64_pem(&secrets.certs.k8s_service_account).into(),
            );

            let mut api_sans = vec![endpoint_host(&self.control_plane_endpoint)?];
            for san in &opts.additional_sans {
                if !api_sans.contains(san) {
                    api_sans.push(san.clone());
                }
            }
            doc.set(
                &["cluster", "apiServer", "image"],
                format!("registry.k8s.io/kube-apiserver:v{k8s}").into(),
            );
            doc.set(&["cluster", "apiServer", "certSANs"], strings(&api_sans));
            doc.set(&["cluster", "apiServer", "disablePodSecurityPolicy"], true.into());
            if contract.pod_security_admission_enabled() {
                doc.set(
                    &["cluster", "apiServer", "admissionControl"],
                    Value::Sequence(vec![pod_security_admission()]),
                );
            }
            if contract.api_server_audit_policy_supported() {
                doc.set(&["cluster", "apiServer", "auditPolicy"], audit_policy());
            }
            doc.set(
                &["cluster", "controllerManager", "image"],
                format!("registry.k8s.io/kube-controller-manager:v{k8s}").into(),
            );
            doc.set(
                &["cluster", "proxy", "image"],
                format!("registry.k8s.io/kube-proxy:v{k8s}").into(),
            );
            doc.set(
                &["cluster", "scheduler", "image"],
                format!("registry.k8s.io/kube-scheduler:v{k8s}").into(),
            );
            doc.set(&["cluster", "etcd", "ca"], ca(&secrets.certs.etcd, true));
        }

        doc.set(&["cluster", "discovery", "enabled"], opts.discovery_enabled.into());
        if opts.discovery_enabled {
            doc.set(
                &["cluster", "discovery", "registries", "kubernetes", "disabled"],
                contract.kubernetes_discovery_backend_disabled().into(),
            );
            doc.set(
                &["cluster", "discovery", "registries", "service"],
                Value::Mapping(Mapping::new()),
            );
        }

        if control_plane
            && opts.allow_scheduling_on_control_planes
            && contract.kubernetes_allow_scheduling_on_control_planes()
        {
            doc.set(&["cluster", "allowSchedulingOnControlPlanes"], true.into());
        }

        Ok(())
    }
}

/// Host part of a URL endpoint, without IPv6 brackets.
fn endpoint_host(endpoint: &str) -> Result<String> {
    let url = url::Url::parse(endpoint)
        .map_err(|e| ConfigError::Invalid(format!("invalid endpoint {endpoint:?}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::Invalid(format!("endpoint {endpoint:?} has no host")))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn ca(pair: &CertAndKey, with_key: bool) -> Value {
    let key = if with_key { pair.key_b64() } else { String::new() };
    map([("crt", pair.crt_b64().into()), ("key", key.into())])
}

fn base64_pem(pem: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(pem)
}

fn pod_security_admission() -> Value {
    let defaults = map([
        ("audit", "restricted".into()),
        ("audit-version", "latest".into()),
        ("enforce", "baseline".into()),
        ("enforce-version", "latest".into()),
        ("warn", "restricted".into()),
        ("warn-version", "latest".into()),
    ]);
    let exemptions = map([("namespaces", strings(&["kube-system".to_string()]))]);

    map([
        ("name", "PodSecurity".into()),
        (
            "configuration",
            map([
                ("apiVersion", "pod-security.admission.config.k8s.io/v1alpha1".into()),
                ("defaults", defaults),
                ("exemptions", exemptions),
                ("kind", "PodSecurityConfiguration".into()),
            ]),
        ),
    ])
}

fn audit_policy() -> Value {
    map([
        ("apiVersion", "audit.k8s.io/v1".into()),
        ("kind", "Policy".into()),
        (
            "rules",
            Value::Sequence(vec![map([("level", "Metadata".into())])]),
        ),
    ])
}

fn strings(items: &[String]) -> Value {
    Value::Sequence(items.iter().map(|s| Value::from(s.as_str())).collect())
}

fn map<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Mapping(
        entries
            .into_iter()
            .map(|(k, v)| (Value::from(k), v))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(options: Vec<GenOption>) -> Input {
        Input::new(
            "demo",
            "https://10.5.0.2:6443",
            DEFAULT_KUBERNETES_VERSION,
            SecretsBundle::generate().unwrap(),
            options,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_bad_kubernetes_version() {
        let err = Input::new(
            "demo",
            "https://10.5.0.2:6443",
            "one.two",
            SecretsBundle::generate().unwrap(),
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::VersionParse(_)));
    }

    #[test]
    fn test_worker_has_no_ca_keys() {
        let input = input(vec![]);
        let worker = input.config(MachineType::Worker).unwrap();
        let cp = input.config(MachineType::ControlPlane).unwrap();

        let worker_doc = worker.v1alpha1().unwrap();
        assert_eq!(worker.machine_type(), Some("worker"));
        assert_eq!(worker_doc.lookup(&["machine", "ca", "key"]).unwrap(), "");
        assert!(worker_doc.lookup(&["cluster", "etcd"]).is_none());

        let cp_doc = cp.v1alpha1().unwrap();
        assert_ne!(cp_doc.lookup(&["machine", "ca", "key"]).unwrap(), "");
        assert_eq!(cp.cluster_name(), Some("demo"));
    }

    #[test]
    fn test_sysctls_and_sans() {
        let input = input(vec![
            GenOption::Sysctls(BTreeMap::from([(
                "kernel.kexec_load_disabled".to_string(),
                "1".to_string(),
            )])),
            GenOption::AdditionalSubjectAltNames(vec!["10.5.0.50".to_string()]),
        ]);
        let cp = input.config(MachineType::ControlPlane).unwrap();
        let doc = cp.v1alpha1().unwrap();

        assert_eq!(
            doc.lookup(&["machine", "sysctls", "kernel.kexec_load_disabled"]).unwrap(),
            "1"
        );
        let sans = doc.lookup(&["cluster", "apiServer", "certSANs"]).unwrap();
        assert_eq!(sans[0], Value::from("10.5.0.2"));
        assert_eq!(sans[1], Value::from("10.5.0.50"));
    }

    #[test]
    fn test_interfaces_group_by_selector() {
        let selector = IfaceSelector::Driver("virtio_net".to_string());
        let input = input(vec![GenOption::NetworkOptions(vec![
            NetworkOption::Mtu(selector.clone(), 1440),
            NetworkOption::Vip(selector, "10.5.0.50".to_string()),
            NetworkOption::Nameservers(vec!["1.1.1.1".to_string()]),
        ])]);
        let cp = input.config(MachineType::ControlPlane).unwrap();
        let interfaces = cp
            .v1alpha1()
            .unwrap()
            .lookup(&["machine", "network", "interfaces"])
            .unwrap()
            .as_sequence()
            .unwrap()
            .clone();

        assert_eq!(interfaces.len(), 1);
        assert_eq!(interfaces[0]["deviceSelector"]["driver"], Value::from("virtio_net"));
        assert_eq!(interfaces[0]["mtu"], Value::from(1440));
        assert_eq!(interfaces[0]["vip"]["ip"], Value::from("10.5.0.50"));
    }

    #[test]
    fn test_old_contract_skips_new_features() {
        let input = input(vec![GenOption::VersionContract(VersionContract::new(1, 5))]);
        let cp = input.config(MachineType::ControlPlane).unwrap();
        let doc = cp.v1alpha1().unwrap();

        assert!(doc.lookup(&["machine", "features", "kubePrism"]).is_none());
        assert!(doc.lookup(&["machine", "features", "hostDNS"]).is_none());

        let worker = input.config(MachineType::Worker).unwrap();
        assert_eq!(worker.cluster_name(), None);
    }

    #[test]
    fn test_talos_config_context() {
        let input = input(vec![GenOption::EndpointList(vec!["10.5.0.2".to_string()])]);
        let config = input.talos_config().unwrap();

        assert_eq!(config.context, "demo");
        assert_eq!(config.contexts["demo"].endpoints, vec!["10.5.0.2".to_string()]);
        assert!(!config.contexts["demo"].crt.is_empty());
    }
}
