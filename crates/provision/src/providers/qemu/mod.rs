//! QEMU provider: every node is a virtual machine on a host bridge.
//!
//! Nodes are not children of the CLI process. For each node the provider
//! writes a [`LaunchConfig`] next to the cluster state and re-executes the
//! running binary with the hidden `qemu-launch` subcommand, which serves the
//! machine config over HTTP and keeps the VM running across reboots.
//!
//! Bridge and tap management shells out to `ip`, so creating a cluster
//! needs root.

pub mod launch;

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use async_trait::async_trait;
use ipnet::IpNet;
use machinery::{Comments, GenOption, IfaceSelector, NetworkOption};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use launch::{LaunchConfig, LaunchDisk, TpmConfig, CONFIG_URL_PLACEHOLDER};

use super::traits::{disk_letter, https_endpoint, Options, Provider, ProviderError};
use crate::exec;
use crate::request::{
    ClusterRequest, ConfigInjectionMethod, NetworkRequest, NodeRequest,
};
use crate::state::{Cluster, ClusterInfo, NetworkInfo, NodeInfo};

/// Provisioner name.
pub const NAME: &str = "qemu";

/// Hidden subcommand the provider re-executes for each node.
pub const LAUNCH_SUBCOMMAND: &str = "qemu-launch";

const UEFI_DIRS_AMD64: [&str; 6] = [
    "/usr/share/ovmf",
    "/usr/share/OVMF",
    "/usr/share/qemu",
    "/usr/share/edk2/ovmf",
    "/usr/share/ovmf/x64",
    "/usr/share/edk2-ovmf/x64",
];
const UEFI_FILES_AMD64: [(&str, &str); 3] = [
    ("OVMF_CODE_4M.fd", "OVMF_VARS_4M.fd"),
    ("OVMF_CODE.fd", "OVMF_VARS.fd"),
    ("edk2-x86_64-code.fd", "edk2-i386-vars.fd"),
];
const UEFI_DIRS_ARM64: [&str; 4] = [
    "/usr/share/qemu-efi-aarch64",
    "/usr/share/AAVMF",
    "/usr/share/qemu",
    "/usr/share/edk2/aarch64",
];
const UEFI_FILES_ARM64: [(&str, &str); 2] = [
    ("AAVMF_CODE.fd", "AAVMF_VARS.fd"),
    ("edk2-aarch64-code.fd", "edk2-arm-vars.fd"),
];

/// Guest architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    Amd64,
    Arm64,
}

impl Arch {
    /// Parse a Talos architecture name.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] for anything but `amd64` and `arm64`.
    pub fn parse(arch: &str) -> Result<Self, ProviderError> {
        match arch {
            "amd64" => Ok(Self::Amd64),
            "arm64" => Ok(Self::Arm64),
            other => Err(ProviderError::Config(format!(
                "unsupported architecture {other:?}"
            ))),
        }
    }

    #[must_use]
    pub fn qemu_executable(self) -> &'static str {
        match self {
            Self::Amd64 => "qemu-system-x86_64",
            Self::Arm64 => "qemu-system-aarch64",
        }
    }

    #[must_use]
    pub fn console(self) -> &'static str {
        match self {
            Self::Amd64 => "ttyS0",
            Self::Arm64 => "ttyAMA0",
        }
    }

    /// `-machine` value; KVM is used when the host exposes it.
    #[must_use]
    pub fn machine(self, kvm: bool, iommu: bool) -> String {
        let accel = if kvm { "kvm" } else { "tcg" };
        match self {
            Self::Amd64 if iommu => format!("q35,accel={accel},kernel-irqchip=split"),
            Self::Amd64 => format!("q35,accel={accel}"),
            Self::Arm64 => format!("virt,accel={accel},gic-version=max"),
        }
    }

    #[must_use]
    pub fn tpm_device(self) -> &'static str {
        match self {
            Self::Amd64 => "tpm-tis",
            Self::Arm64 => "tpm-tis-device",
        }
    }

    fn uefi_candidates(self) -> (&'static [&'static str], &'static [(&'static str, &'static str)]) {
        match self {
            Self::Amd64 => (&UEFI_DIRS_AMD64, &UEFI_FILES_AMD64),
            Self::Arm64 => (&UEFI_DIRS_ARM64, &UEFI_FILES_ARM64),
        }
    }

    /// Locate UEFI code and vars images, extra paths first.
    #[must_use]
    pub fn find_uefi(self, extra_search_paths: &[PathBuf]) -> Option<(PathBuf, PathBuf)> {
        let (dirs, files) = self.uefi_candidates();
        let dirs = extra_search_paths
            .iter()
            .cloned()
            .chain(dirs.iter().map(PathBuf::from));

        for dir in dirs {
            for (code, vars) in files {
                let code = dir.join(code);
                let vars = dir.join(vars);
                if code.is_file() && vars.is_file() {
                    return Some((code, vars));
                }
            }
        }
        None
    }
}

fn short_hash(input: &str) -> String {
    let digest = Sha1::digest(input.as_bytes());
    hex::encode(&digest[..4])
}

/// Linux bridge backing the cluster network.
#[must_use]
pub fn bridge_name(cluster: &str) -> String {
    format!("talos{}", short_hash(cluster))
}

/// Tap device of a node.
#[must_use]
pub fn tap_name(cluster: &str, node: &str) -> String {
    format!("tap{}", short_hash(&format!("{cluster}/{node}")))
}

/// Locally administered MAC derived from the node name.
#[must_use]
pub fn mac_address(cluster: &str, node: &str) -> String {
    let digest = Sha1::digest(format!("{cluster}/{node}").as_bytes());
    let tail: Vec<String> = digest[..5].iter().map(|b| format!("{b:02x}")).collect();
    format!("02:{}", tail.join(":"))
}

/// Static `ip=` kernel argument for the node's IPv4 address.
#[must_use]
pub fn static_ip_arg(network: &NetworkRequest, node: &NodeRequest) -> Option<String> {
    let (index, IpNet::V4(cidr)) = network
        .cidrs
        .iter()
        .enumerate()
        .find(|(_, cidr)| matches!(cidr, IpNet::V4(_)))?
    else {
        return None;
    };
    let ip = node.ips.get(index)?;
    let gateway = network.gateway_addrs.get(index)?;
    let hostname = if network.dhcp_skip_hostname {
        ""
    } else {
        node.name.as_str()
    };

    let mut arg = format!("ip={ip}::{gateway}:{}:{hostname}::off", cidr.netmask());
    for ns in network.nameservers.iter().filter(|ns| ns.is_ipv4()).take(2) {
        arg.push(':');
        arg.push_str(&ns.to_string());
    }
    Some(arg)
}

/// Kernel command line of a node before the launcher patches the config URL.
#[must_use]
pub fn kernel_cmdline(
    network: &NetworkRequest,
    node: &NodeRequest,
    arch: Arch,
    options: &Options,
) -> String {
    let mut args = node.quirks.default_kernel_args();
    args.push(format!("console={}", arch.console()));
    args.push("reboot=k".to_string());
    args.push("panic=1".to_string());
    args.push("talos.shutdown=halt".to_string());
    args.push("talos.platform=metal".to_string());

    if let Some(ip) = static_ip_arg(network, node) {
        args.push(ip);
    }

    for extra in &node.extra_kernel_args {
        if let Some(negated) = extra.strip_prefix('-') {
            args.retain(|arg| arg.split('=').next() != Some(negated));
        } else {
            args.push(extra.clone());
        }
    }

    if options.with_debug_shell {
        args.push("talos.debugshell".to_string());
    }

    if node.config.is_some() {
        match node.config_injection_method {
            ConfigInjectionMethod::Http => {
                args.push(format!("talos.config={CONFIG_URL_PLACEHOLDER}"));
            }
            ConfigInjectionMethod::MetalIso => args.push("talos.config=metal-iso".to_string()),
        }
    }

    args.join(" ")
}

/// QEMU backed provider.
#[derive(Debug, Default)]
pub struct Qemu;

impl Qemu {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn create_network(&self, request: &ClusterRequest) -> Result<(), ProviderError> {
        let bridge = bridge_name(&request.name);
        info!(bridge = %bridge, "creating network");

        ensure(exec::run("ip", ["link", "add", "name", bridge.as_str(), "type", "bridge"]).await)?;
        exec::run(
            "ip",
            ["link", "set", bridge.as_str(), "mtu", &request.network.mtu.to_string()],
        )
        .await?;

        for (cidr, gateway) in request.network.cidrs.iter().zip(&request.network.gateway_addrs) {
            let addr = format!("{gateway}/{}", cidr.prefix_len());
            ensure(exec::run("ip", ["addr", "add", addr.as_str(), "dev", bridge.as_str()]).await)?;
        }

        exec::run("ip", ["link", "set", bridge.as_str(), "up"]).await?;
        Ok(())
    }

    async fn create_tap(&self, cluster: &str, node: &str, mtu: u32) -> Result<(), ProviderError> {
        let tap = tap_name(cluster, node);
        let bridge = bridge_name(cluster);

        ensure(exec::run("ip", ["tuntap", "add", "dev", tap.as_str(), "mode", "tap"]).await)?;
        exec::run("ip", ["link", "set", tap.as_str(), "master", bridge.as_str()]).await?;
        exec::run("ip", ["link", "set", tap.as_str(), "mtu", &mtu.to_string()]).await?;
        exec::run("ip", ["link", "set", tap.as_str(), "up"]).await?;
        Ok(())
    }

    async fn create_disks(
        &self,
        cluster_dir: &Path,
        request: &ClusterRequest,
        node: &NodeRequest,
    ) -> Result<Vec<LaunchDisk>, ProviderError> {
        let mut disks = Vec::with_capacity(node.disks.len());

        for (index, disk) in node.disks.iter().enumerate() {
            let path = cluster_dir.join(format!("{}-{index}.disk", node.name));
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)
                .map_err(|e| ProviderError::io(&path, e))?;
            file.set_len(disk.size).map_err(|e| ProviderError::io(&path, e))?;

            if !disk.skip_preallocate {
                let size = disk.size.to_string();
                if let Err(e) = exec::run("fallocate", [OsArg::from("-l"), size.into(), path.clone().into()]).await {
                    warn!(disk = %path.display(), error = %e, "Preallocation failed, disk stays sparse");
                }
            }

            disks.push(LaunchDisk {
                path,
                driver: disk.driver,
                block_size: if disk.block_size == 0 { 512 } else { disk.block_size },
            });
        }

        if let (Some(first), Some(image)) = (disks.first(), &request.boot_assets.disk_image) {
            write_disk_image(&first.path, image)?;
        }

        Ok(disks)
    }

    #[allow(clippy::too_many_lines)]
    async fn create_node(
        &self,
        cluster_dir: &Path,
        request: &ClusterRequest,
        node: &NodeRequest,
        options: &Options,
    ) -> Result<NodeInfo, ProviderError> {
        info!(node = %node.name, "creating node");
        let arch = Arch::parse(&options.target_arch)?;

        self.create_tap(&request.name, &node.name, request.network.mtu).await?;
        let disks = self.create_disks(cluster_dir, request, node).await?;

        let pflash = if options.uefi_enabled {
            let (code, vars) = arch
                .find_uefi(&options.extra_uefi_search_paths)
                .ok_or_else(|| ProviderError::Config("UEFI firmware images not found".to_string()))?;
            let vars_copy = cluster_dir.join(format!("{}-flash1.img", node.name));
            std::fs::copy(&vars, &vars_copy).map_err(|e| ProviderError::io(&vars, e))?;
            vec![code, vars_copy]
        } else {
            Vec::new()
        };

        let config = node
            .config
            .as_ref()
            .map(|config| config.encode(Comments::Disabled))
            .transpose()?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());

        let extra_iso_path = match (&config, node.config_injection_method) {
            (Some(config), ConfigInjectionMethod::MetalIso) => {
                Some(create_config_iso(cluster_dir, &node.name, config).await?)
            }
            _ => None,
        };

        let tpm = (options.tpm1_2_enabled || options.tpm2_enabled).then(|| TpmConfig {
            state_dir: cluster_dir.join(format!("{}-tpm", node.name)),
            tpm2: options.tpm2_enabled,
        });
        if let Some(tpm) = &tpm {
            std::fs::create_dir_all(&tpm.state_dir).map_err(|e| ProviderError::io(&tpm.state_dir, e))?;
        }

        let gateway = request
            .network
            .gateway_addrs
            .first()
            .copied()
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let node_uuid = node.uuid.unwrap_or_else(Uuid::new_v4);
        let boot = &request.boot_assets;

        let launch = LaunchConfig {
            node_name: node.name.clone(),
            state_path: cluster_dir.to_path_buf(),
            arch,
            kvm: Path::new("/dev/kvm").exists(),
            vcpu_count: vcpu_count(node.nano_cpus),
            mem_size_mib: node.memory / 1024 / 1024,
            disks,
            kernel_path: boot.kernel.clone(),
            initrd_path: boot.initramfs.clone(),
            iso_path: boot.iso.clone(),
            usb_path: boot.usb.clone(),
            uki_path: boot.uki.clone(),
            extra_iso_path,
            pflash,
            kernel_args: kernel_cmdline(&request.network, node, arch, options),
            monitor_path: cluster_dir.join(format!("{}.monitor", node.name)),
            serial_path: cluster_dir.join(format!("{}.serial", node.name)),
            bootloader_enabled: options.bootloader_enabled,
            tpm,
            node_uuid,
            bad_rtc: node.bad_rtc,
            iommu_enabled: options.iommu_enabled,
            with_debug_shell: options.with_debug_shell,
            config,
            api_bind_address: SocketAddr::new(gateway, 0),
            tap_name: tap_name(&request.name, &node.name),
            mac: mac_address(&request.name, &node.name),
        };

        let config_path = cluster_dir.join(format!("{}.config", node.name));
        let file = File::create(&config_path).map_err(|e| ProviderError::io(&config_path, e))?;
        serde_json::to_writer(file, &launch)?;

        let pid_path = spawn_launcher(&request.self_executable, cluster_dir, &node.name)?;

        Ok(NodeInfo {
            id: pid_path.display().to_string(),
            uuid: Some(node_uuid),
            name: node.name.clone(),
            machine_type: node.machine_type,
            ips: node.ips.clone(),
            nano_cpus: node.nano_cpus,
            memory: node.memory,
            disk_size: node.disks.first().map_or(0, |disk| disk.size),
        })
    }

    async fn stop_node(&self, cluster: &Cluster, node: &NodeInfo) {
        let pid_path = cluster.path(&format!("{}.pid", node.name));
        let Ok(pid) = std::fs::read_to_string(&pid_path) else {
            debug!(node = %node.name, "No pid file, node already stopped");
            return;
        };

        if let Err(e) = exec::run("kill", ["-TERM", pid.trim()]).await {
            debug!(node = %node.name, error = %e, "Launcher already gone");
        }
        let _ = std::fs::remove_file(&pid_path);
    }
}

/// vCPUs for a nano-CPU share, rounded, minimum 1.
#[must_use]
pub fn vcpu_count(nano_cpus: i64) -> i64 {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    let count = (nano_cpus as f64 / 1e9).round() as i64;
    count.max(1)
}

/// Tolerate "already exists" failures of idempotent `ip` calls.
fn ensure(result: Result<String, ProviderError>) -> Result<(), ProviderError> {
    match result {
        Ok(_) => Ok(()),
        Err(ProviderError::Command { stderr, .. }) if stderr.contains("File exists") => Ok(()),
        Err(e) => Err(e),
    }
}

type OsArg = std::ffi::OsString;

fn write_disk_image(disk: &Path, image: &Path) -> Result<(), ProviderError> {
    info!(image = %image.display(), "writing disk image");
    let source = File::open(image).map_err(|e| ProviderError::io(image, e))?;
    let mut target = OpenOptions::new()
        .write(true)
        .open(disk)
        .map_err(|e| ProviderError::io(disk, e))?;

    if image.extension().is_some_and(|ext| ext == "zst") {
        zstd::stream::copy_decode(source, &mut target).map_err(|e| ProviderError::io(image, e))?;
    } else {
        let mut source = source;
        std::io::copy(&mut source, &mut target).map_err(|e| ProviderError::io(image, e))?;
    }
    Ok(())
}

async fn create_config_iso(cluster_dir: &Path, node: &str, config: &str) -> Result<PathBuf, ProviderError> {
    let staging = tempfile::tempdir().map_err(|e| ProviderError::io(cluster_dir, e))?;
    let config_path = staging.path().join("config.yaml");
    std::fs::write(&config_path, config).map_err(|e| ProviderError::io(&config_path, e))?;

    let iso = cluster_dir.join(format!("{node}-config.iso"));
    exec::require("xorriso")?;
    exec::run(
        "xorriso",
        [
            OsArg::from("-as"),
            "mkisofs".into(),
            "-V".into(),
            "metal-iso".into(),
            "-o".into(),
            iso.clone().into(),
            staging.path().into(),
        ],
    )
    .await?;

    Ok(iso)
}

/// Start the launcher for a node, detached, and record its pid.
fn spawn_launcher(self_executable: &Path, cluster_dir: &Path, node: &str) -> Result<PathBuf, ProviderError> {
    let config_path = cluster_dir.join(format!("{node}.config"));
    let log_path = cluster_dir.join(format!("{node}.log"));
    let pid_path = cluster_dir.join(format!("{node}.pid"));

    let stdin = File::open(&config_path).map_err(|e| ProviderError::io(&config_path, e))?;
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| ProviderError::io(&log_path, e))?;
    let log_err = log.try_clone().map_err(|e| ProviderError::io(&log_path, e))?;

    let child = Command::new(self_executable)
        .arg(LAUNCH_SUBCOMMAND)
        .current_dir(cluster_dir)
        .stdin(Stdio::from(stdin))
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .process_group(0)
        .spawn()
        .map_err(|source| ProviderError::Spawn {
            command: self_executable.display().to_string(),
            source,
        })?;

    std::fs::write(&pid_path, child.id().to_string()).map_err(|e| ProviderError::io(&pid_path, e))?;
    debug!(node = %node, pid = child.id(), "Launcher started");
    Ok(pid_path)
}

fn tail(path: &Path, max_bytes: u64) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    if len > max_bytes {
        std::io::Seek::seek(&mut file, std::io::SeekFrom::Start(len - max_bytes))?;
    }
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[async_trait]
impl Provider for Qemu {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn create(
        &self,
        request: &ClusterRequest,
        options: &Options,
    ) -> Result<Cluster, ProviderError> {
        let arch = Arch::parse(&options.target_arch)?;
        exec::require("ip")?;
        exec::require(arch.qemu_executable())?;
        if options.tpm1_2_enabled || options.tpm2_enabled {
            exec::require("swtpm")?;
        }

        let cluster_dir = request.state_directory.join(&request.name);
        std::fs::create_dir_all(&cluster_dir).map_err(|e| ProviderError::io(&cluster_dir, e))?;

        self.create_network(request).await?;

        let mut nodes = Vec::with_capacity(request.nodes.len());
        for node in &request.nodes {
            nodes.push(self.create_node(&cluster_dir, request, node, options).await?);
        }

        let port = request.network.load_balancer_ports.first().copied();
        let mut cluster = Cluster::new(
            NAME,
            &request.state_directory,
            ClusterInfo {
                cluster_name: request.name.clone(),
                network: NetworkInfo {
                    name: bridge_name(&request.name),
                    cidrs: request.network.cidrs.clone(),
                    gateway_addrs: request.network.gateway_addrs.clone(),
                    mtu: request.network.mtu,
                },
                nodes,
                kubernetes_endpoint: options.kubernetes_endpoint.clone().or_else(|| {
                    port.map(|port| {
                        self.external_kubernetes_control_plane_endpoint(&request.network, port)
                    })
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
        let name = &cluster.info.cluster_name;
        let self_executable = std::env::current_exe()
            .map_err(|e| ProviderError::io("/proc/self/exe", e))?;
        let bridge = bridge_name(name);

        ensure(exec::run("ip", ["link", "add", "name", bridge.as_str(), "type", "bridge"]).await)?;
        for (cidr, gateway) in cluster.info.network.cidrs.iter().zip(&cluster.info.network.gateway_addrs) {
            let addr = format!("{gateway}/{}", cidr.prefix_len());
            ensure(exec::run("ip", ["addr", "add", addr.as_str(), "dev", bridge.as_str()]).await)?;
        }
        exec::run("ip", ["link", "set", bridge.as_str(), "up"]).await?;

        for node in &cluster.info.nodes {
            if cluster.path(&format!("{}.pid", node.name)).exists() {
                debug!(node = %node.name, "Launcher already running");
                continue;
            }
            self.create_tap(name, &node.name, cluster.info.network.mtu).await?;
            spawn_launcher(&self_executable, &cluster.state_directory, &node.name)?;
            info!(node = %node.name, "started node");
        }
        Ok(())
    }

    async fn destroy(&self, cluster: &Cluster) -> Result<(), ProviderError> {
        let name = &cluster.info.cluster_name;

        info!("stopping VMs");
        for node in &cluster.info.nodes {
            self.stop_node(cluster, node).await;
            let tap = tap_name(name, &node.name);
            if let Err(e) = exec::run("ip", ["link", "del", tap.as_str()]).await {
                debug!(tap = %tap, error = %e, "Tap already removed");
            }
        }

        info!("removing network");
        let bridge = bridge_name(name);
        if let Err(e) = exec::run("ip", ["link", "del", bridge.as_str()]).await {
            warn!(bridge = %bridge, error = %e, "Failed to remove bridge");
        }

        info!("removing state directory");
        match std::fs::remove_dir_all(&cluster.state_directory) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProviderError::io(&cluster.state_directory, e)),
        }
    }

    async fn crash_dump(&self, cluster: &Cluster, out: &mut (dyn Write + Send)) {
        for node in &cluster.info.nodes {
            for suffix in ["log", "serial"] {
                let path = cluster.path(&format!("{}.{suffix}", node.name));
                let content = tail(&path, 64 * 1024)
                    .unwrap_or_else(|e| format!("failed to read {}: {e}", path.display()));
                let _ = writeln!(out, "> {}\n{content}\n", path.display());
            }
        }
    }

    async fn close(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    fn gen_options(&self, network: &NetworkRequest) -> Vec<GenOption> {
        let mut network_options = vec![NetworkOption::Mtu(self.first_interface(), network.mtu)];
        if !network.nameservers.is_empty() {
            network_options.push(NetworkOption::Nameservers(
                network.nameservers.iter().map(ToString::to_string).collect(),
            ));
        }

        vec![
            GenOption::InstallDisk(self.user_disk_name(0)),
            GenOption::NetworkOptions(network_options),
        ]
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
        network: &NetworkRequest,
        port: u16,
    ) -> String {
        self.in_cluster_kubernetes_control_plane_endpoint(network, port)
    }

    fn talos_api_endpoints(&self, _network: &NetworkRequest) -> Vec<String> {
        Vec::new()
    }

    fn first_interface(&self) -> IfaceSelector {
        IfaceSelector::Driver("virtio_net".to_string())
    }

    fn user_disk_name(&self, index: usize) -> String {
        format!("/dev/vd{}", disk_letter(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machinery::MachineType;

    fn network() -> NetworkRequest {
        NetworkRequest {
            name: "lab".to_string(),
            cidrs: vec!["10.5.0.0/24".parse().unwrap()],
            gateway_addrs: vec!["10.5.0.1".parse().unwrap()],
            mtu: 1500,
            nameservers: vec!["8.8.8.8".parse().unwrap(), "2001:4860:4860::8888".parse().unwrap()],
            ..NetworkRequest::default()
        }
    }

    fn node() -> NodeRequest {
        let mut node = NodeRequest::new("lab-worker-1", MachineType::Worker);
        node.ips = vec!["10.5.0.3".parse().unwrap()];
        node
    }

    #[test]
    fn test_names_are_stable_and_short() {
        assert_eq!(bridge_name("lab"), bridge_name("lab"));
        assert!(bridge_name("a-very-long-cluster-name").len() <= 15);
        assert!(tap_name("lab", "lab-worker-1").len() <= 15);
        assert_ne!(tap_name("lab", "a"), tap_name("lab", "b"));
        assert!(mac_address("lab", "a").starts_with("02:"));
        assert_eq!(mac_address("lab", "a").len(), 17);
    }

    #[test]
    fn test_static_ip_arg() {
        assert_eq!(
            static_ip_arg(&network(), &node()).unwrap(),
            "ip=10.5.0.3::10.5.0.1:255.255.255.0:lab-worker-1::off:8.8.8.8"
        );

        let mut network = network();
        network.dhcp_skip_hostname = true;
        assert!(static_ip_arg(&network, &node()).unwrap().contains(":255.255.255.0:::off"));
    }

    #[test]
    fn test_kernel_cmdline_negation_and_config() {
        let mut node = node();
        node.extra_kernel_args = vec!["-pti".to_string(), "talos.dashboard.disabled=1".to_string()];
        node.config = Some(machinery::Container::default());

        let cmdline = kernel_cmdline(&network(), &node, Arch::Amd64, &Options::new());
        assert!(!cmdline.contains("pti=on"));
        assert!(cmdline.contains("talos.dashboard.disabled=1"));
        assert!(cmdline.contains("console=ttyS0"));
        assert!(cmdline.ends_with(&format!("talos.config={CONFIG_URL_PLACEHOLDER}")));
    }

    #[test]
    fn test_vcpu_count() {
        assert_eq!(vcpu_count(500_000_000), 1);
        assert_eq!(vcpu_count(2_000_000_000), 2);
        assert_eq!(vcpu_count(2_500_000_000), 3);
        assert_eq!(vcpu_count(3_500_000_000), 4);
    }

    #[test]
    fn test_capabilities() {
        let provider = Qemu::new();
        assert_eq!(provider.user_disk_name(1), "/dev/vdb");
        assert_eq!(
            provider.first_interface(),
            IfaceSelector::Driver("virtio_net".to_string())
        );
        assert!(provider.talos_api_endpoints(&network()).is_empty());
        assert_eq!(
            provider.in_cluster_kubernetes_control_plane_endpoint(&network(), 6443),
            "https://10.5.0.2:6443"
        );
        assert!(provider
            .gen_options(&network())
            .contains(&GenOption::InstallDisk("/dev/vda".to_string())));
    }
}
