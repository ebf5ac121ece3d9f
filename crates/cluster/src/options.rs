//! Option bundle for `cluster create`.
//!
//! Flags are split into three partitions: [`CommonOptions`] shared by both
//! providers, [`DockerOptions`] and [`QemuOptions`]. Each partition is a
//! clap `Parser` so it can be flattened into a subcommand or parsed on its
//! own.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, ValueEnum};

use crate::error::{CreateError, Result};

/// Talos release the tool generates configs for by default.
pub const DEFAULT_TALOS_VERSION: &str = "v1.12.0";

/// Default container image for docker nodes.
pub const DEFAULT_NODE_IMAGE: &str = "ghcr.io/siderolabs/talos:v1.12.0";

/// Default installer image for qemu nodes.
pub const DEFAULT_INSTALL_IMAGE: &str = "ghcr.io/siderolabs/installer:v1.12.0";

/// Default cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "talos-default";

/// Listen port of the WireGuard mesh.
pub const WIREGUARD_LISTEN_PORT: u16 = 51111;

/// `~/.talos`, falling back to `.talos` when the home directory is unknown.
#[must_use]
pub fn talos_dir() -> PathBuf {
    dirs::home_dir().map_or_else(|| PathBuf::from(".talos"), |home| home.join(".talos"))
}

/// Default parent directory of cluster state.
#[must_use]
pub fn default_state_dir() -> PathBuf {
    talos_dir().join("clusters")
}

/// Default CNI directory for qemu host networking.
#[must_use]
pub fn default_cni_dir() -> PathBuf {
    talos_dir().join("cni")
}

/// Which cluster a command operates on.
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    /// The name of the cluster
    #[arg(long, default_value = DEFAULT_CLUSTER_NAME)]
    pub name: String,

    /// Directory path to store cluster state
    #[arg(long = "state", value_name = "DIR")]
    pub state_dir: Option<PathBuf>,
}

impl ClusterArgs {
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }
}

/// Options shared by both providers.
#[derive(Parser, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct CommonOptions {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// The number of workers to create
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// The number of controlplanes to create
    #[arg(long, default_value_t = 1)]
    pub controlplanes: usize,

    /// The share of CPUs as fraction (each control plane)
    #[arg(long = "cpus", default_value = "2.0")]
    pub control_plane_cpus: String,

    /// The share of CPUs as fraction (each worker)
    #[arg(long = "cpus-workers", default_value = "2.0")]
    pub workers_cpus: String,

    /// The limit on memory usage in MB (each control plane)
    #[arg(long = "memory", default_value_t = 2048)]
    pub control_plane_memory: u64,

    /// The limit on memory usage in MB (each worker)
    #[arg(long = "memory-workers", default_value_t = 2048)]
    pub workers_memory: u64,

    /// CIDR of the cluster network (IPv4, the IPv6 ULA network is derived from it)
    #[arg(long = "cidr", default_value = "10.5.0.0/24")]
    pub network_cidr: String,

    /// MTU of the cluster network
    #[arg(long = "mtu", default_value_t = 1500)]
    pub network_mtu: u32,

    /// Enable IPv4 network in the cluster
    #[arg(long = "ipv4", default_value_t = true, action = ArgAction::Set)]
    pub network_ipv4: bool,

    /// Enable IPv6 network in the cluster
    #[arg(long = "ipv6")]
    pub network_ipv6: bool,

    /// The dns domain to use for cluster
    #[arg(long, default_value = "cluster.local")]
    pub dns_domain: String,

    /// Desired kubernetes version to run
    #[arg(long, default_value = machinery::generate::DEFAULT_KUBERNETES_VERSION)]
    pub kubernetes_version: String,

    /// The desired Talos version to generate config for (defaults to the image version)
    #[arg(long)]
    pub talos_version: Option<String>,

    /// Control plane port (load balancer and local API port)
    #[arg(long, default_value_t = machinery::generate::DEFAULT_API_SERVER_PORT)]
    pub control_plane_port: u16,

    /// KubePrism port (set to 0 to disable)
    #[arg(long = "kubeprism-port", default_value_t = machinery::generate::DEFAULT_KUBE_PRISM_PORT)]
    pub kube_prism_port: u16,

    /// Wait for the cluster to be ready before returning
    #[arg(long = "wait", default_value_t = true, action = ArgAction::Set)]
    pub cluster_wait: bool,

    /// Timeout to wait for the cluster to be ready
    #[arg(long = "wait-timeout", default_value = "20m", value_parser = parse_duration)]
    pub cluster_wait_timeout: Duration,

    /// Skip k8s node readiness checks
    #[arg(long = "skip-k8s-node-readiness-check")]
    pub skip_k8s_node_readiness_check: bool,

    /// Use endpoint instead of provider defaults
    #[arg(long = "endpoint")]
    pub force_endpoint: Option<String>,

    /// Use init node as endpoint instead of any load balancer endpoint
    #[arg(long = "init-node-as-endpoint")]
    pub force_init_node_as_endpoint: bool,

    /// Create the cluster with an init node
    #[arg(long = "with-init-node")]
    pub with_init_node: bool,

    /// Registry mirrors in format: <registry host>=<mirror URL>
    #[arg(long = "registry-mirror", value_delimiter = ',')]
    pub registry_mirrors: Vec<String>,

    /// Registry hostnames to skip TLS verification for
    #[arg(long = "registry-insecure-skip-verify", value_delimiter = ',')]
    pub registry_insecure: Vec<String>,

    /// Apply config when the node is in maintenance mode
    #[arg(long = "with-apply-config")]
    pub apply_config_enabled: bool,

    /// Skip injecting config, write config files to the current directory
    #[arg(long)]
    pub skip_injecting_config: bool,

    /// Install custom CNI from the URL
    #[arg(long = "custom-cni-url")]
    pub custom_cni_url: Option<String>,

    /// Skip merging kubeconfig from the created cluster
    #[arg(long)]
    pub skip_kubeconfig: bool,

    /// Enable cluster discovery
    #[arg(long = "with-cluster-discovery", default_value_t = true, action = ArgAction::Set)]
    pub enable_cluster_discovery: bool,

    /// Enable KubeSpan system
    #[arg(long = "with-kubespan")]
    pub enable_kube_span: bool,

    /// Enable JSON logs receiver and configure Talos to send logs there
    #[arg(long = "with-json-logs")]
    pub with_json_logs: bool,

    /// Enable debug in Talos config to send service logs to the console
    #[arg(long = "with-debug")]
    pub config_debug: bool,

    /// CIDR of the wireguard network
    #[arg(long = "wireguard-cidr")]
    pub wireguard_cidr: Option<String>,

    /// Patch generated machineconfigs (all node types), use @file to read a patch from file
    #[arg(long = "config-patch")]
    pub config_patch: Vec<String>,

    /// Patch generated machineconfigs (init and controlplane types)
    #[arg(long = "config-patch-control-plane")]
    pub config_patch_control_plane: Vec<String>,

    /// Patch generated machineconfigs (worker type)
    #[arg(long = "config-patch-worker")]
    pub config_patch_worker: Vec<String>,

    /// Use machine UUIDs as default hostnames
    #[arg(long = "with-uuid-hostnames")]
    pub with_uuid_hostnames: bool,

    /// Location of pre-generated config files
    #[arg(short = 'i', long = "input-dir")]
    pub input_dir: Option<PathBuf>,

    /// The path to the Talos configuration file to merge into
    #[arg(long, env = machinery::clientconfig::TALOSCONFIG_ENV)]
    pub talosconfig: Option<PathBuf>,

    /// Dump node logs to stderr if creation fails
    #[arg(long)]
    pub crashdump: bool,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self::parse_from(["create"])
    }
}

/// Docker provider options.
#[derive(Parser, Debug, Clone)]
pub struct DockerOptions {
    /// Host IP to forward exposed ports to
    #[arg(long = "host-ip", default_value = "0.0.0.0")]
    pub host_ip: String,

    /// Disable IPv6 in docker
    #[arg(long = "disable-ipv6")]
    pub disable_ipv6: bool,

    /// The image to use
    #[arg(long = "image", default_value = DEFAULT_NODE_IMAGE)]
    pub node_image: String,

    /// Comma-separated list of ports/protocols to expose on the first
    /// control plane: <hostPort>:<containerPort>/<protocol>
    #[arg(short = 'p', long = "exposed-ports")]
    pub ports: Option<String>,

    /// Attach a mount to every node (docker --mount syntax)
    #[arg(long = "mount")]
    pub mounts: Vec<String>,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self::parse_from(["docker"])
    }
}

/// How the SideroLink agent is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AgentMode {
    #[default]
    None,
    #[value(alias = "true")]
    Wireguard,
    /// WireGuard over the gRPC API connection.
    Tunnel,
    #[value(name = "wireguard+tls")]
    WireguardTls,
    #[value(name = "grpc-tunnel+tls")]
    TunnelTls,
}

impl AgentMode {
    #[must_use]
    pub fn is_enabled(self) -> bool {
        self != Self::None
    }

    #[must_use]
    pub fn is_tunnel(self) -> bool {
        matches!(self, Self::Tunnel | Self::TunnelTls)
    }

    /// Serve the SideroLink API over TLS.
    #[must_use]
    pub fn is_tls(self) -> bool {
        matches!(self, Self::WireguardTls | Self::TunnelTls)
    }
}

/// Qemu provider options.
#[derive(Parser, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct QemuOptions {
    /// The installer image to use
    #[arg(long = "install-image", default_value = DEFAULT_INSTALL_IMAGE)]
    pub node_install_image: String,

    /// The compressed kernel image to use (path or URL)
    #[arg(long = "vmlinuz-path")]
    pub node_vmlinuz_path: Option<String>,

    /// Initramfs image to use (path or URL)
    #[arg(long = "initrd-path")]
    pub node_initramfs_path: Option<String>,

    /// The ISO path to use for the initial boot
    #[arg(long = "iso-path")]
    pub node_iso_path: Option<String>,

    /// The USB stick image path to use for the initial boot
    #[arg(long = "usb-path")]
    pub node_usb_path: Option<String>,

    /// The UKI image path to use for the initial boot
    #[arg(long = "uki-path")]
    pub node_uki_path: Option<String>,

    /// Disk image to use
    #[arg(long = "disk-image-path")]
    pub node_disk_image_path: Option<String>,

    /// iPXE boot script (URL) to use
    #[arg(long = "ipxe-boot-script")]
    pub node_ipxe_boot_script: Option<String>,

    /// Enable bootloader to load kernel and initramfs from disk image after install
    #[arg(long = "with-bootloader", default_value_t = true, action = ArgAction::Set)]
    pub bootloader_enabled: bool,

    /// Enable UEFI on x86_64 architecture
    #[arg(long = "with-uefi", default_value_t = true, action = ArgAction::Set)]
    pub uefi_enabled: bool,

    /// Enable TPM 1.2 emulation support using swtpm
    #[arg(long = "with-tpm1_2")]
    pub tpm1_2_enabled: bool,

    /// Enable TPM 2.0 emulation support using swtpm
    #[arg(long = "with-tpm2")]
    pub tpm2_enabled: bool,

    /// Enable IOMMU support
    #[arg(long = "with-iommu")]
    pub with_iommu: bool,

    /// Drop Talos into a maintenance shell on boot
    #[arg(long = "with-debug-shell", hide = true)]
    pub debug_shell_enabled: bool,

    /// Additional search paths for UEFI firmware
    #[arg(long = "extra-uefi-search-paths", value_delimiter = ',')]
    pub extra_uefi_search_paths: Vec<PathBuf>,

    /// CIDRs to exclude from NAT
    #[arg(long = "no-masquerade-cidrs", value_delimiter = ',')]
    pub network_no_masquerade_cidrs: Vec<String>,

    /// Nameservers to use
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "8.8.8.8,1.1.1.1,2001:4860:4860::8888,2606:4700:4700::1111"
    )]
    pub nameservers: Vec<String>,

    /// Default limit on disk size in MB (each node)
    #[arg(long = "disk", default_value_t = 6 * 1024)]
    pub cluster_disk_size: u64,

    /// Disk block size
    #[arg(long = "disk-block-size", default_value_t = 512)]
    pub disk_block_size: u32,

    /// Whether disk space should be preallocated
    #[arg(long = "disk-preallocate", default_value_t = true, action = ArgAction::Set)]
    pub preallocate_disks: bool,

    /// User volumes to create for each node: <name1>:<size1>:<name2>:<size2>
    #[arg(long = "user-volumes", value_delimiter = ',')]
    pub cluster_user_volumes: Vec<String>,

    /// Number of extra disks to create for each worker
    #[arg(long = "extra-disks", default_value_t = 0)]
    pub extra_disks: usize,

    /// Size of each extra disk in MB
    #[arg(long = "extra-disks-size", default_value_t = 5 * 1024)]
    pub extra_disk_size: u64,

    /// Driver for each extra disk (virtio, ide, ahci, scsi, nvme, megaraid)
    #[arg(long = "extra-disks-drivers", value_delimiter = ',')]
    pub extra_disks_drivers: Vec<String>,

    /// Cluster architecture
    #[arg(long = "arch", default_value = provision::providers::host_arch())]
    pub target_arch: String,

    /// Search path for CNI binaries
    #[arg(long = "cni-bin-path", value_delimiter = ',')]
    pub cni_bin_path: Vec<PathBuf>,

    /// CNI config directory path
    #[arg(long = "cni-conf-dir")]
    pub cni_conf_dir: Option<PathBuf>,

    /// CNI cache directory path
    #[arg(long = "cni-cache-dir")]
    pub cni_cache_dir: Option<PathBuf>,

    /// URL to download the CNI bundle from
    #[arg(long = "cni-bundle-url", default_value = "https://github.com/siderolabs/talos/releases/download/v1.12.0/talosctl-cni-bundle-${ARCH}.tar.gz")]
    pub cni_bundle_url: String,

    /// Enable state partition encryption
    #[arg(long = "encrypt-state")]
    pub encrypt_state_partition: bool,

    /// Enable ephemeral partition encryption
    #[arg(long = "encrypt-ephemeral")]
    pub encrypt_ephemeral_partition: bool,

    /// Enable user volume encryption
    #[arg(long = "encrypt-user-volumes")]
    pub encrypt_user_volumes: bool,

    /// Encryption key types to use for disk encryption (uuid, kms, tpm)
    #[arg(long = "disk-encryption-key-types", default_value = "uuid")]
    pub disk_encryption_key_types: Vec<String>,

    /// Use a virtual IP for the controlplane endpoint
    #[arg(long = "use-vip")]
    pub use_vip: bool,

    /// Launch nodes with a bad RTC state
    #[arg(long = "bad-rtc")]
    pub bad_rtc: bool,

    /// Extra kernel args for the initial boot from vmlinuz and initramfs
    #[arg(long = "extra-boot-kernel-args")]
    pub extra_boot_kernel_args: Option<String>,

    /// Skip announcing hostname via DHCP
    #[arg(long = "disable-dhcp-hostname")]
    pub dhcp_skip_hostname: bool,

    #[command(flatten)]
    pub chaos: ChaosOptions,

    /// Inject firewall rules into the cluster, value is the default policy (accept/block)
    #[arg(long = "with-firewall")]
    pub with_firewall: Option<String>,

    /// Use the SideroLink agent as config apply mechanism
    #[arg(long = "with-siderolink", value_enum, default_value_t = AgentMode::None, num_args = 0..=1, default_missing_value = "wireguard")]
    pub with_siderolink_agent: AgentMode,

    /// Machine config injection method: http (default) or metal-iso
    #[arg(long = "config-injection-method")]
    pub config_injection_method: Option<String>,
}

impl Default for QemuOptions {
    fn default() -> Self {
        Self::parse_from(["qemu"])
    }
}

/// Network impairment flags.
#[derive(Args, Debug, Clone, Default)]
pub struct ChaosOptions {
    /// Enable network chaos parameters
    #[arg(long = "with-network-chaos")]
    pub network_chaos: bool,

    /// Jitter on the bridge interface
    #[arg(long = "with-network-jitter", value_parser = parse_duration, default_value = "0s")]
    pub jitter: Duration,

    /// Latency on the bridge interface
    #[arg(long = "with-network-latency", value_parser = parse_duration, default_value = "0s")]
    pub latency: Duration,

    /// Fraction of lost packets, e.g. 0.5
    #[arg(long = "with-network-packet-loss", default_value_t = 0.0)]
    pub packet_loss: f64,

    /// Fraction of reordered packets
    #[arg(long = "with-network-packet-reorder", default_value_t = 0.0)]
    pub packet_reorder: f64,

    /// Fraction of corrupt packets
    #[arg(long = "with-network-packet-corrupt", default_value_t = 0.0)]
    pub packet_corrupt: f64,

    /// Bandwidth restriction in kbps
    #[arg(long = "with-network-bandwidth", default_value_t = 0)]
    pub bandwidth: u64,
}

/// Parse a duration such as `1s`, `250ms`, `20m` or `1h30m`.
///
/// # Errors
/// Returns a message when the string is empty, has no unit or an unknown unit.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }
    if input == "0" {
        return Ok(Duration::ZERO);
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if digits == 0 {
            return Err(format!("invalid duration {input:?}"));
        }
        let value: f64 = rest[..digits]
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_len..];

        let part = Duration::try_from_secs_f64(value * scale)
            .map_err(|_| format!("duration {input:?} out of range"))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| format!("duration {input:?} out of range"))?;
    }

    Ok(total)
}

/// Convert a CPU share such as `2`, `0.5` or `3/2` into nano CPUs.
///
/// # Errors
/// Returns [`CreateError::NotRational`] for non-numeric input and
/// [`CreateError::TooPrecise`] when the value is finer than 10⁻⁹.
pub fn parse_cpu_share(cpus: &str) -> Result<i64> {
    const NANO: i128 = 1_000_000_000;

    let not_rational = || CreateError::NotRational(cpus.to_string());
    let trimmed = cpus.trim();

    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };

    let nano = if let Some((num, den)) = unsigned.split_once('/') {
        let num: i128 = parse_digits(num).ok_or_else(not_rational)?;
        let den: i128 = parse_digits(den).ok_or_else(not_rational)?;
        if den == 0 {
            return Err(not_rational());
        }
        let scaled = num * NANO;
        if scaled % den != 0 {
            return Err(CreateError::TooPrecise(cpus.to_string()));
        }
        scaled / den
    } else {
        let (int, frac) = unsigned.split_once('.').unwrap_or((unsigned, ""));
        if int.is_empty() && frac.is_empty() {
            return Err(not_rational());
        }
        let int: i128 = if int.is_empty() {
            0
        } else {
            parse_digits(int).ok_or_else(not_rational)?
        };
        if !frac.is_empty() && !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(not_rational());
        }

        let significant = frac.trim_end_matches('0');
        if significant.len() > 9 {
            return Err(CreateError::TooPrecise(cpus.to_string()));
        }
        let padded = format!("{significant:0<9}");
        let frac: i128 = padded.parse().map_err(|_| not_rational())?;
        int * NANO + frac
    };

    let nano = if negative { -nano } else { nano };
    i64::try_from(nano).map_err(|_| not_rational())
}

fn parse_digits(s: &str) -> Option<i128> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("20m").unwrap(), Duration::from_secs(1200));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5y").is_err());
        assert!(parse_duration("").is_err());

        let huge = format!("1{}s", "0".repeat(400));
        assert_eq!(
            parse_duration(&huge).unwrap_err(),
            format!("duration {huge:?} out of range")
        );
        assert!(parse_duration("1e300s").is_err());
        assert!(parse_duration("10000000000000000000s10000000000000000000s").is_err());
    }

    #[test]
    fn test_parse_cpu_share() {
        assert_eq!(parse_cpu_share("2.0").unwrap(), 2_000_000_000);
        assert_eq!(parse_cpu_share("0.5").unwrap(), 500_000_000);
        assert_eq!(parse_cpu_share("3/2").unwrap(), 1_500_000_000);
        assert_eq!(parse_cpu_share(".25").unwrap(), 250_000_000);
        assert_eq!(parse_cpu_share("1.0000000010").unwrap(), 1_000_000_001);
    }

    #[test]
    fn test_parse_cpu_share_errors() {
        assert!(matches!(
            parse_cpu_share("0.0000000001"),
            Err(CreateError::TooPrecise(_))
        ));
        assert!(matches!(parse_cpu_share("1/3"), Err(CreateError::TooPrecise(_))));
        assert!(matches!(parse_cpu_share("two"), Err(CreateError::NotRational(_))));
        assert!(matches!(parse_cpu_share("1.2.3"), Err(CreateError::NotRational(_))));
    }

    #[test]
    fn test_defaults() {
        let common = CommonOptions::default();
        assert_eq!(common.cluster.name, "talos-default");
        assert_eq!(common.workers, 1);
        assert_eq!(common.controlplanes, 1);
        assert!(common.network_ipv4);
        assert!(!common.network_ipv6);
        assert!(common.cluster_wait);
        assert_eq!(common.cluster_wait_timeout, Duration::from_secs(20 * 60));
        assert_eq!(common.kube_prism_port, 7445);
        assert_eq!(common.control_plane_port, 6443);

        let qemu = QemuOptions::default();
        assert_eq!(qemu.nameservers.len(), 4);
        assert_eq!(qemu.disk_encryption_key_types, vec!["uuid"]);
        assert!(qemu.bootloader_enabled);
        assert_eq!(qemu.with_siderolink_agent, AgentMode::None);

        assert_eq!(DockerOptions::default().host_ip, "0.0.0.0");
    }

    #[test]
    fn test_bool_flags_accept_values() {
        let common = CommonOptions::parse_from(["create", "--wait=false", "--ipv6"]);
        assert!(!common.cluster_wait);
        assert!(common.network_ipv6);

        let qemu = QemuOptions::parse_from(["qemu", "--with-siderolink", "tunnel"]);
        assert!(qemu.with_siderolink_agent.is_tunnel());
        let qemu = QemuOptions::parse_from(["qemu", "--with-siderolink"]);
        assert_eq!(qemu.with_siderolink_agent, AgentMode::Wireguard);
    }
}
