//! Per-node VM launcher.
//!
//! Runs detached from the CLI with the cluster directory as working
//! directory and a [`LaunchConfig`] on stdin. It serves the machine config
//! on the bridge gateway, starts `swtpm` when a TPM is requested and keeps
//! QEMU running: a guest reboot exits QEMU (`-no-reboot`) and the loop
//! starts it again, switching to disk boot once an installed system is
//! found. SIGTERM stops the VM and the launcher.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::Arch;
use crate::request::DiskDriver;

/// Kernel argument placeholder replaced with the config server URL.
pub const CONFIG_URL_PLACEHOLDER: &str = "{TALOS_CONFIG_URL}";

const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

/// A disk attached to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchDisk {
    pub path: PathBuf,
    pub driver: DiskDriver,
    pub block_size: u32,
}

/// Software TPM emulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpmConfig {
    pub state_dir: PathBuf,
    pub tpm2: bool,
}

impl TpmConfig {
    #[must_use]
    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("swtpm.sock")
    }
}

/// Everything the launcher needs to run one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub node_name: String,
    pub state_path: PathBuf,
    pub arch: Arch,
    pub kvm: bool,
    pub vcpu_count: i64,
    pub mem_size_mib: i64,
    pub disks: Vec<LaunchDisk>,
    pub kernel_path: Option<PathBuf>,
    pub initrd_path: Option<PathBuf>,
    pub iso_path: Option<PathBuf>,
    pub usb_path: Option<PathBuf>,
    pub uki_path: Option<PathBuf>,
    /// `metal-iso` config volume.
    pub extra_iso_path: Option<PathBuf>,
    /// UEFI code image followed by a writable vars copy.
    pub pflash: Vec<PathBuf>,
    pub kernel_args: String,
    pub monitor_path: PathBuf,
    pub serial_path: PathBuf,
    pub bootloader_enabled: bool,
    pub tpm: Option<TpmConfig>,
    pub node_uuid: Uuid,
    pub bad_rtc: bool,
    pub iommu_enabled: bool,
    pub with_debug_shell: bool,
    /// Machine config served over HTTP, if any.
    pub config: Option<String>,
    pub api_bind_address: SocketAddr,
    pub tap_name: String,
    pub mac: String,
}

fn flag(args: &mut Vec<String>, name: &str, value: impl Into<String>) {
    args.push(name.to_string());
    args.push(value.into());
}

impl LaunchConfig {
    /// Decode a launch config from the launcher's stdin.
    ///
    /// # Errors
    /// Returns an error if the input is not a valid launch config.
    pub fn read(reader: impl Read) -> Result<Self> {
        serde_json::from_reader(reader).context("Failed to decode launch config")
    }

    /// QEMU command line for the next boot.
    #[must_use]
    pub fn qemu_args(&self, boot_from_disk: bool) -> Vec<String> {
        let mut args = Vec::new();

        flag(&mut args, "-m", self.mem_size_mib.to_string());
        flag(&mut args, "-smp", format!("cpus={}", self.vcpu_count));
        flag(&mut args, "-cpu", "max");
        flag(&mut args, "-machine", self.arch.machine(self.kvm, self.iommu_enabled));
        flag(&mut args, "-display", "none");
        args.push("-no-reboot".to_string());
        flag(&mut args, "-smbios", format!("type=1,uuid={}", self.node_uuid));

        flag(
            &mut args,
            "-netdev",
            format!("tap,id=net0,ifname={},script=no,downscript=no", self.tap_name),
        );
        flag(&mut args, "-device", format!("virtio-net-pci,netdev=net0,mac={}", self.mac));
        flag(&mut args, "-device", "virtio-rng-pci");
        flag(&mut args, "-device", "virtio-balloon,deflate-on-oom=on");
        flag(
            &mut args,
            "-monitor",
            format!("unix:{},server,nowait", self.monitor_path.display()),
        );

        if self.with_debug_shell {
            flag(
                &mut args,
                "-serial",
                format!("unix:{},server,nowait", self.serial_path.display()),
            );
        } else {
            flag(&mut args, "-serial", format!("file:{}", self.serial_path.display()));
        }

        for (index, disk) in self.disks.iter().enumerate() {
            disk_args(&mut args, index, disk);
        }

        if let Some((code, vars)) = self.pflash.split_first() {
            flag(
                &mut args,
                "-drive",
                format!("file={},format=raw,if=pflash,readonly=on", code.display()),
            );
            for vars in vars {
                flag(&mut args, "-drive", format!("file={},format=raw,if=pflash", vars.display()));
            }
        }

        if let Some(tpm) = &self.tpm {
            flag(
                &mut args,
                "-chardev",
                format!("socket,id=chrtpm,path={}", tpm.socket_path().display()),
            );
            flag(&mut args, "-tpmdev", "emulator,id=tpm0,chardev=chrtpm");
            flag(&mut args, "-device", format!("{},tpmdev=tpm0", self.arch.tpm_device()));
        }

        if self.bad_rtc {
            flag(&mut args, "-rtc", "base=2011-11-11T11:11:00,clock=rt");
        }

        if self.iommu_enabled && self.arch == Arch::Amd64 {
            flag(&mut args, "-device", "intel-iommu,intremap=on,device-iotlb=on");
        }

        if let Some(iso) = &self.extra_iso_path {
            flag(
                &mut args,
                "-drive",
                format!("file={},format=raw,media=cdrom,readonly=on", iso.display()),
            );
        }

        let order = if boot_from_disk {
            "c"
        } else {
            self.boot_media_args(&mut args)
        };
        flag(&mut args, "-boot", format!("order={order},reboot-timeout=5000"));

        args
    }

    /// Append installation media and return the boot order.
    fn boot_media_args(&self, args: &mut Vec<String>) -> &'static str {
        if let (Some(kernel), Some(initrd)) = (&self.kernel_path, &self.initrd_path) {
            flag(args, "-kernel", kernel.display().to_string());
            flag(args, "-initrd", initrd.display().to_string());
            flag(args, "-append", self.kernel_args.clone());
            return "cn";
        }

        if let Some(uki) = &self.uki_path {
            flag(args, "-kernel", uki.display().to_string());
            flag(args, "-append", self.kernel_args.clone());
            return "cn";
        }

        if let Some(iso) = &self.iso_path {
            flag(args, "-cdrom", iso.display().to_string());
            return "dc";
        }

        if let Some(usb) = &self.usb_path {
            flag(args, "-device", "qemu-xhci,id=xhci");
            flag(args, "-device", "usb-storage,bus=xhci.0,drive=usbdisk,bootindex=0");
            flag(
                args,
                "-drive",
                format!("id=usbdisk,if=none,format=raw,file={}", usb.display()),
            );
            return "c";
        }

        "cn"
    }
}

fn disk_args(args: &mut Vec<String>, index: usize, disk: &LaunchDisk) {
    let path = disk.path.display();
    let sizes = format!(
        "logical_block_size={0},physical_block_size={0}",
        disk.block_size
    );

    match disk.driver {
        DiskDriver::Virtio => {
            flag(
                args,
                "-drive",
                format!("id=virtio{index},format=raw,if=none,file={path},cache=none"),
            );
            flag(args, "-device", format!("virtio-blk-pci,drive=virtio{index},{sizes}"));
        }
        DiskDriver::Ide => {
            flag(args, "-drive", format!("format=raw,if=ide,file={path},cache=none"));
        }
        DiskDriver::Ahci => {
            flag(args, "-device", format!("ahci,id=ahci{index}"));
            flag(
                args,
                "-drive",
                format!("id=ahci-disk{index},format=raw,if=none,file={path},cache=none"),
            );
            flag(args, "-device", format!("ide-hd,drive=ahci-disk{index},bus=ahci{index}.0"));
        }
        DiskDriver::Scsi => {
            flag(args, "-device", format!("virtio-scsi-pci,id=scsi{index}"));
            flag(
                args,
                "-drive",
                format!("id=scsi-disk{index},format=raw,if=none,file={path},cache=none"),
            );
            flag(
                args,
                "-device",
                format!("scsi-hd,drive=scsi-disk{index},bus=scsi{index}.0,{sizes}"),
            );
        }
        DiskDriver::Nvme => {
            flag(
                args,
                "-drive",
                format!("id=nvme{index},format=raw,if=none,file={path},cache=none"),
            );
            flag(
                args,
                "-device",
                format!("nvme,drive=nvme{index},serial=nvme{index},{sizes}"),
            );
        }
        DiskDriver::Megaraid => {
            flag(args, "-device", format!("megasas-gen2,id=megaraid{index}"));
            flag(
                args,
                "-drive",
                format!("id=megaraid-disk{index},format=raw,if=none,file={path},cache=none"),
            );
            flag(
                args,
                "-device",
                format!("scsi-hd,drive=megaraid-disk{index},bus=megaraid{index}.0,{sizes}"),
            );
        }
    }
}

/// Whether the disk carries a GPT header, i.e. Talos was installed.
#[must_use]
pub fn has_partition_table(path: &Path, block_size: u32) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut signature = [0_u8; 8];
    file.seek(SeekFrom::Start(u64::from(block_size)))
        .and_then(|_| file.read_exact(&mut signature))
        .is_ok_and(|()| &signature == GPT_SIGNATURE)
}

async fn serve_config(State(config): State<Arc<String>>) -> String {
    config.as_ref().clone()
}

/// Bind the config server and return the URL the node should fetch.
async fn start_config_server(address: SocketAddr, config: String) -> Result<String> {
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind config server on {address}"))?;
    let local = listener.local_addr().context("Failed to read config server address")?;

    let app = Router::new()
        .route("/config.yaml", get(serve_config))
        .with_state(Arc::new(config));

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Config server failed");
        }
    });

    info!(address = %local, "Serving machine config");
    Ok(format!("http://{local}/config.yaml"))
}

fn start_swtpm(tpm: &TpmConfig) -> Result<Child> {
    let mut cmd = Command::new("swtpm");
    cmd.arg("socket")
        .arg("--tpmstate")
        .arg(format!("dir={},mode=0644", tpm.state_dir.display()))
        .arg("--ctrl")
        .arg(format!("type=unixio,path={}", tpm.socket_path().display()))
        .kill_on_drop(true);
    if tpm.tpm2 {
        cmd.arg("--tpm2");
    }

    cmd.spawn().context("Failed to start swtpm")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = ctrl_c => info!("Received interrupt, stopping VM"),
        () = terminate => info!("Received SIGTERM, stopping VM"),
    }
}

/// Run a node until the launcher is signalled.
///
/// # Errors
/// Returns an error if the config server, `swtpm` or QEMU cannot be started,
/// or if QEMU exits with a failure.
pub async fn launch(mut config: LaunchConfig) -> Result<()> {
    info!(node = %config.node_name, "Starting launcher");

    if let Some(machine_config) = config.config.take() {
        let url = start_config_server(config.api_bind_address, machine_config).await?;
        config.kernel_args = config.kernel_args.replace(CONFIG_URL_PLACEHOLDER, &url);
    }

    let _swtpm = config.tpm.as_ref().map(start_swtpm).transpose()?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let boot_from_disk = config.bootloader_enabled
            && config
                .disks
                .first()
                .is_some_and(|disk| has_partition_table(&disk.path, disk.block_size));

        let args = config.qemu_args(boot_from_disk);
        info!(node = %config.node_name, boot_from_disk, "Starting VM");

        let mut child = Command::new(config.arch.qemu_executable())
            .args(&args)
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start qemu")?;

        tokio::select! {
            status = child.wait() => {
                let status = status.context("Failed to wait for qemu")?;
                if !status.success() {
                    bail!("qemu exited with {status}");
                }
                info!(node = %config.node_name, "VM exited, restarting");
            }
            () = &mut shutdown => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to stop qemu");
                }
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config() -> LaunchConfig {
        LaunchConfig {
            node_name: "lab-controlplane-1".to_string(),
            state_path: PathBuf::from("/state/lab"),
            arch: Arch::Amd64,
            kvm: true,
            vcpu_count: 2,
            mem_size_mib: 2048,
            disks: vec![
                LaunchDisk {
                    path: PathBuf::from("/state/lab/cp-0.disk"),
                    driver: DiskDriver::Virtio,
                    block_size: 512,
                },
                LaunchDisk {
                    path: PathBuf::from("/state/lab/cp-1.disk"),
                    driver: DiskDriver::Nvme,
                    block_size: 4096,
                },
            ],
            kernel_path: Some(PathBuf::from("/assets/vmlinuz")),
            initrd_path: Some(PathBuf::from("/assets/initramfs.xz")),
            iso_path: None,
            usb_path: None,
            uki_path: None,
            extra_iso_path: None,
            pflash: Vec::new(),
            kernel_args: format!("console=ttyS0 talos.config={CONFIG_URL_PLACEHOLDER}"),
            monitor_path: PathBuf::from("/state/lab/cp.monitor"),
            serial_path: PathBuf::from("/state/lab/cp.serial"),
            bootloader_enabled: true,
            tpm: None,
            node_uuid: Uuid::nil(),
            bad_rtc: false,
            iommu_enabled: false,
            with_debug_shell: false,
            config: None,
            api_bind_address: "10.5.0.1:0".parse().unwrap(),
            tap_name: "tap0".to_string(),
            mac: "02:00:00:00:00:01".to_string(),
        }
    }

    fn value_of<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        args.windows(2)
            .filter(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
            .collect()
    }

    #[test]
    fn test_kernel_boot_args() {
        let args = config().qemu_args(false);
        assert_eq!(value_of(&args, "-kernel"), vec!["/assets/vmlinuz"]);
        assert_eq!(value_of(&args, "-machine"), vec!["q35,accel=kvm"]);
        assert!(args.contains(&"-no-reboot".to_string()));
        assert!(value_of(&args, "-boot")[0].starts_with("order=cn"));
        assert!(value_of(&args, "-device")
            .contains(&"nvme,drive=nvme1,serial=nvme1,logical_block_size=4096,physical_block_size=4096"));
    }

    #[test]
    fn test_disk_boot_skips_kernel() {
        let args = config().qemu_args(true);
        assert!(value_of(&args, "-kernel").is_empty());
        assert_eq!(value_of(&args, "-boot"), vec!["order=c,reboot-timeout=5000"]);
    }

    #[test]
    fn test_optional_devices() {
        let mut config = config();
        config.bad_rtc = true;
        config.with_debug_shell = true;
        config.tpm = Some(TpmConfig {
            state_dir: PathBuf::from("/state/lab/cp-tpm"),
            tpm2: true,
        });
        config.pflash = vec![PathBuf::from("/usr/share/ovmf/OVMF_CODE.fd"), PathBuf::from("/state/lab/cp-flash1.img")];

        let args = config.qemu_args(false);
        assert_eq!(value_of(&args, "-rtc"), vec!["base=2011-11-11T11:11:00,clock=rt"]);
        assert_eq!(
            value_of(&args, "-serial"),
            vec!["unix:/state/lab/cp.serial,server,nowait"]
        );
        assert!(value_of(&args, "-device").contains(&"tpm-tis,tpmdev=tpm0"));
        assert!(value_of(&args, "-drive")
            .contains(&"file=/usr/share/ovmf/OVMF_CODE.fd,format=raw,if=pflash,readonly=on"));
    }

    #[test]
    fn test_has_partition_table() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0_u8; 512]).unwrap();
        file.write_all(GPT_SIGNATURE).unwrap();
        file.flush().unwrap();

        assert!(has_partition_table(file.path(), 512));
        assert!(!has_partition_table(file.path(), 4096));
        assert!(!has_partition_table(Path::new("/nonexistent"), 512));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let encoded = serde_json::to_vec(&config()).unwrap();
        let decoded = LaunchConfig::read(encoded.as_slice()).unwrap();
        assert_eq!(decoded.disks, config().disks);
        assert_eq!(decoded.arch, Arch::Amd64);
    }
}
