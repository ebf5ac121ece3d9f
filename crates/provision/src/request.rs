//! Cluster request handed to a provider.
//!
//! A [`ClusterRequest`] is fully assembled by the caller (network layout,
//! node inventory with embedded machine configs, boot assets) before it
//! reaches [`Provider::create`](crate::providers::Provider::create). Providers
//! only read it.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use ipnet::IpNet;
use machinery::{Container, MachineType};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::providers::ProviderError;

/// Offset of the first node address inside a network CIDR.
pub const NODES_OFFSET: u128 = 2;

/// Everything a provider needs to materialize a cluster.
#[derive(Debug, Clone)]
pub struct ClusterRequest {
    pub name: String,
    /// Parent directory holding `<name>/` state.
    pub state_directory: PathBuf,
    /// Absolute path of the running binary, re-executed for helper processes.
    pub self_executable: PathBuf,
    pub network: NetworkRequest,
    pub nodes: Vec<NodeRequest>,
    pub siderolink: Option<SiderolinkRequest>,
    pub boot_assets: BootAssets,
}

impl ClusterRequest {
    pub fn control_planes(&self) -> impl Iterator<Item = &NodeRequest> {
        self.nodes
            .iter()
            .filter(|node| node.machine_type.is_control_plane())
    }

    pub fn workers(&self) -> impl Iterator<Item = &NodeRequest> {
        self.nodes
            .iter()
            .filter(|node| node.machine_type == MachineType::Worker)
    }
}

/// Network shared by all nodes of a cluster.
#[derive(Debug, Clone, Default)]
pub struct NetworkRequest {
    pub name: String,
    /// IPv4 first, then optional IPv6.
    pub cidrs: Vec<IpNet>,
    /// Parallel to `cidrs`.
    pub gateway_addrs: Vec<IpAddr>,
    pub mtu: u32,
    pub nameservers: Vec<IpAddr>,
    pub no_masquerade_cidrs: Vec<IpNet>,
    pub cni: CniConfig,
    pub load_balancer_ports: Vec<u16>,
    pub dhcp_skip_hostname: bool,
    pub docker_disable_ipv6: bool,
    pub network_chaos: NetworkChaos,
}

impl NetworkRequest {
    /// First IPv4 CIDR of the network.
    #[must_use]
    pub fn ipv4_cidr(&self) -> Option<&IpNet> {
        self.cidrs.iter().find(|cidr| matches!(cidr, IpNet::V4(_)))
    }

    /// Address of the first node in the primary CIDR.
    #[must_use]
    pub fn first_node_address(&self) -> Option<IpAddr> {
        self.ipv4_cidr()
            .or_else(|| self.cidrs.first())
            .and_then(|cidr| nth_address(cidr, NODES_OFFSET))
    }
}

/// `n`-th address after the network address of `cidr`, if it still lies
/// inside the subnet.
#[must_use]
pub fn nth_address(cidr: &IpNet, n: u128) -> Option<IpAddr> {
    match cidr {
        IpNet::V4(net) => {
            let base = u128::from(u32::from(net.network()));
            let addr = base.checked_add(n)?;
            let addr = u32::try_from(addr).ok()?;
            let ip = std::net::Ipv4Addr::from(addr);
            net.contains(&ip).then_some(IpAddr::V4(ip))
        }
        IpNet::V6(net) => {
            let base = u128::from(net.network());
            let ip = Ipv6Addr::from(base.checked_add(n)?);
            net.contains(&ip).then_some(IpAddr::V6(ip))
        }
    }
}

/// CNI plugin locations used by host-side networking.
#[derive(Debug, Clone, Default)]
pub struct CniConfig {
    pub bin_path: Vec<PathBuf>,
    pub conf_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub bundle_url: String,
}

/// Network impairment parameters. Validated and carried, not realized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkChaos {
    pub enabled: bool,
    pub jitter: Duration,
    pub latency: Duration,
    pub packet_loss: f64,
    pub packet_reorder: f64,
    pub packet_corrupt: f64,
    /// Kilobits per second, 0 means unlimited.
    pub bandwidth: u64,
}

impl NetworkChaos {
    /// Whether any impairment parameter is set.
    #[must_use]
    pub fn any_set(&self) -> bool {
        !self.jitter.is_zero()
            || !self.latency.is_zero()
            || self.packet_loss != 0.0
            || self.packet_reorder != 0.0
            || self.packet_corrupt != 0.0
            || self.bandwidth != 0
    }
}

/// One node of the cluster.
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub name: String,
    pub machine_type: MachineType,
    /// Parallel to [`NetworkRequest::cidrs`].
    pub ips: Vec<IpAddr>,
    /// Bytes.
    pub memory: i64,
    pub nano_cpus: i64,
    pub disks: Vec<Disk>,
    /// `None` when the config is written to disk instead of injected.
    pub config: Option<Container>,
    pub config_injection_method: ConfigInjectionMethod,
    pub bad_rtc: bool,
    /// Extra kernel command line tokens, `key=value` or bare `key`.
    pub extra_kernel_args: Vec<String>,
    pub uuid: Option<Uuid>,
    pub quirks: Quirks,
    /// Docker `--mount` specs.
    pub mounts: Vec<String>,
}

impl NodeRequest {
    #[must_use]
    pub fn new(name: impl Into<String>, machine_type: MachineType) -> Self {
        Self {
            name: name.into(),
            machine_type,
            ips: Vec::new(),
            memory: 0,
            nano_cpus: 0,
            disks: Vec::new(),
            config: None,
            config_injection_method: ConfigInjectionMethod::default(),
            bad_rtc: false,
            extra_kernel_args: Vec::new(),
            uuid: None,
            quirks: Quirks::default(),
            mounts: Vec::new(),
        }
    }
}

/// Storage bus a virtual disk is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskDriver {
    #[default]
    Virtio,
    Ide,
    Ahci,
    Scsi,
    Nvme,
    Megaraid,
}

impl DiskDriver {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Virtio => "virtio",
            Self::Ide => "ide",
            Self::Ahci => "ahci",
            Self::Scsi => "scsi",
            Self::Nvme => "nvme",
            Self::Megaraid => "megaraid",
        }
    }
}

impl fmt::Display for DiskDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiskDriver {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "virtio" => Ok(Self::Virtio),
            "ide" => Ok(Self::Ide),
            "ahci" => Ok(Self::Ahci),
            "scsi" => Ok(Self::Scsi),
            "nvme" => Ok(Self::Nvme),
            "megaraid" => Ok(Self::Megaraid),
            other => Err(ProviderError::Config(format!(
                "unsupported disk driver {other:?}"
            ))),
        }
    }
}

/// A virtual disk attached to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Bytes.
    pub size: u64,
    pub skip_preallocate: bool,
    pub driver: DiskDriver,
    pub block_size: u32,
}

/// How a VM node receives its machine config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigInjectionMethod {
    /// Served over HTTP from the host, URL passed as `talos.config=`.
    #[default]
    Http,
    /// Attached as a config ISO labelled `metal-iso`.
    MetalIso,
}

/// Version-specific behaviour of the booted Talos release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quirks(Option<machinery::VersionContract>);

impl Quirks {
    /// Quirks for a Talos version string; unparseable versions use current
    /// defaults.
    #[must_use]
    pub fn new(talos_version: &str) -> Self {
        Self(machinery::VersionContract::parse(talos_version).ok())
    }

    /// Releases before 1.11 still enable IMA measurement by default.
    #[must_use]
    pub fn supports_ima(self) -> bool {
        self.0
            .is_some_and(|contract| contract < machinery::VersionContract::new(1, 11))
    }

    /// Kernel arguments every Talos release expects.
    #[must_use]
    pub fn default_kernel_args(self) -> Vec<String> {
        let mut args: Vec<String> = [
            "init_on_alloc=1",
            "slab_nomerge",
            "pti=on",
            "consoleblank=0",
            "nvme_core.io_timeout=4294967295",
            "printk.devkmsg=on",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        if self.supports_ima() {
            args.extend(
                ["ima_template=ima-ng", "ima_appraise=fix", "ima_hash=sha512"]
                    .into_iter()
                    .map(String::from),
            );
        }

        args
    }
}

/// SideroLink management channel endpoints shared by all nodes.
#[derive(Debug, Clone)]
pub struct SiderolinkRequest {
    pub wireguard_endpoint: String,
    pub api_endpoint: String,
    /// PEM, present when the API runs over TLS.
    pub api_cert: Option<String>,
    pub api_key: Option<String>,
    pub sink_endpoint: String,
    pub log_endpoint: String,
    pub binds: Vec<SiderolinkBind>,
}

impl SiderolinkRequest {
    /// SideroLink address bound to a node UUID.
    #[must_use]
    pub fn address_of(&self, uuid: &Uuid) -> Option<Ipv6Addr> {
        self.binds
            .iter()
            .find(|bind| &bind.uuid == uuid)
            .map(|bind| bind.addr)
    }
}

/// A node UUID and the SideroLink address assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiderolinkBind {
    pub uuid: Uuid,
    pub addr: Ipv6Addr,
}

/// Local paths of VM boot assets. Empty for containers.
#[derive(Debug, Clone, Default)]
pub struct BootAssets {
    pub kernel: Option<PathBuf>,
    pub initramfs: Option<PathBuf>,
    pub iso: Option<PathBuf>,
    pub usb: Option<PathBuf>,
    pub uki: Option<PathBuf>,
    pub disk_image: Option<PathBuf>,
    pub ipxe_script: Option<PathBuf>,
}

impl BootAssets {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kernel.is_none()
            && self.initramfs.is_none()
            && self.iso.is_none()
            && self.usb.is_none()
            && self.uki.is_none()
            && self.disk_image.is_none()
            && self.ipxe_script.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nth_address_stays_in_subnet() {
        let net: IpNet = "10.5.0.0/30".parse().unwrap();
        assert_eq!(nth_address(&net, 2), Some("10.5.0.2".parse().unwrap()));
        assert_eq!(nth_address(&net, 4), None);

        let v6: IpNet = "fd74:616c:a05::/64".parse().unwrap();
        assert_eq!(nth_address(&v6, 5), Some("fd74:616c:a05::5".parse().unwrap()));
    }

    #[test]
    fn test_first_node_address_prefers_ipv4() {
        let network = NetworkRequest {
            cidrs: vec![
                "fd74:616c:a05::/64".parse().unwrap(),
                "10.5.0.0/24".parse().unwrap(),
            ],
            ..NetworkRequest::default()
        };
        assert_eq!(
            network.first_node_address(),
            Some("10.5.0.2".parse().unwrap())
        );
    }

    #[test]
    fn test_disk_driver_parse() {
        assert_eq!("nvme".parse::<DiskDriver>().unwrap(), DiskDriver::Nvme);
        assert!("floppy".parse::<DiskDriver>().is_err());
    }

    #[test]
    fn test_quirks_ima() {
        assert!(Quirks::new("v1.10.3").supports_ima());
        assert!(!Quirks::new("v1.12.0").supports_ima());
        assert!(!Quirks::new("latest").supports_ima());
    }

    #[test]
    fn test_chaos_any_set() {
        let mut chaos = NetworkChaos::default();
        assert!(!chaos.any_set());
        chaos.bandwidth = 100;
        assert!(chaos.any_set());
    }
}
