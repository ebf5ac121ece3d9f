//! Qemu addendum of the request builder.
//!
//! Adds the VM specifics on top of the common request: disk layout and user
//! volumes, firewall and SideroLink patches, disk encryption, the virtual IP,
//! boot assets, host networking and per-node boot settings.

use std::collections::BTreeMap;
use std::path::Path;

use machinery::types::DefaultAction;
use machinery::{GenOption, NetworkOption, VersionContract};
use provision::providers::https_endpoint;
use provision::{CniConfig, ConfigInjectionMethod, NetworkChaos, NodeRequest, Quirks};
use tracing::{debug, info};

use super::ClusterMaker;
use crate::assets::{AssetCache, AssetPaths};
use crate::disks::{DiskInputs, DiskPlan};
use crate::encryption::EncryptionKeys;
use crate::error::{CreateError, Result};
use crate::firewall::FirewallInputs;
use crate::network::{parse_cidrs, parse_nameservers};
use crate::options::{default_cni_dir, ChaosOptions, CommonOptions, QemuOptions, DEFAULT_TALOS_VERSION};
use crate::siderolink::Siderolink;
use crate::ui;

/// Talos release of the installer image, unless set explicitly.
#[must_use]
pub fn talos_version(common: &CommonOptions, qemu: &QemuOptions) -> String {
    if let Some(version) = common.talos_version.as_ref().filter(|v| !v.is_empty()) {
        return version.clone();
    }

    match qemu.node_install_image.rsplit_once(':') {
        Some((_, tag)) if VersionContract::parse(tag).is_ok() => tag.to_string(),
        _ => DEFAULT_TALOS_VERSION.to_string(),
    }
}

/// Network impairment parameters, rejected unless chaos is enabled.
///
/// # Errors
/// Returns [`CreateError::Usage`] when any parameter is set without
/// `--with-network-chaos`.
pub fn network_chaos(chaos: &ChaosOptions) -> Result<NetworkChaos> {
    let params = NetworkChaos {
        enabled: chaos.network_chaos,
        jitter: chaos.jitter,
        latency: chaos.latency,
        packet_loss: chaos.packet_loss,
        packet_reorder: chaos.packet_reorder,
        packet_corrupt: chaos.packet_corrupt,
        bandwidth: chaos.bandwidth,
    };

    if !params.enabled && params.any_set() {
        return Err(CreateError::usage(
            "network chaos flags can only be used with --with-network-chaos",
        ));
    }
    Ok(params)
}

/// Parse `--config-injection-method`.
///
/// # Errors
/// Returns [`CreateError::Invalid`] for unknown methods.
pub fn config_injection_method(method: Option<&str>) -> Result<ConfigInjectionMethod> {
    match method.unwrap_or_default() {
        "" | "default" | "http" => Ok(ConfigInjectionMethod::Http),
        "metal-iso" => Ok(ConfigInjectionMethod::MetalIso),
        other => Err(CreateError::Invalid(format!(
            "unknown config injection method {other:?}"
        ))),
    }
}

/// Contribute the qemu options to `maker`, downloading boot assets.
///
/// # Errors
/// Returns an error for invalid flag values or combinations, or when a boot
/// asset cannot be fetched.
pub async fn apply(maker: &mut ClusterMaker<'_>, qemu: &QemuOptions) -> Result<()> {
    let chaos = network_chaos(&qemu.chaos)?;
    let provider = maker.provider();
    let gateway = maker.plan().primary_gateway();

    let encryption = if qemu.encrypt_state_partition
        || qemu.encrypt_ephemeral_partition
        || qemu.encrypt_user_volumes
    {
        Some(EncryptionKeys::new(
            &qemu.disk_encryption_key_types,
            gateway,
            maker.version_contract(),
        )?)
    } else {
        None
    };

    let disks = DiskPlan::new(
        &DiskInputs {
            primary_size_mib: qemu.cluster_disk_size,
            block_size: qemu.disk_block_size,
            preallocate: qemu.preallocate_disks,
            user_volumes: qemu.cluster_user_volumes.clone(),
            extra_disks: qemu.extra_disks,
            extra_disk_size_mib: qemu.extra_disk_size,
            extra_disk_drivers: qemu.extra_disks_drivers.clone(),
            target_arch: qemu.target_arch.clone(),
            user_volume_encryption: encryption
                .as_ref()
                .filter(|_| qemu.encrypt_user_volumes)
                .map(EncryptionKeys::spec),
        },
        |index| provider.user_disk_name(index),
    )?;

    let options = std::mem::take(maker.provision_options_mut());
    *maker.provision_options_mut() = options
        .with_bootloader(qemu.bootloader_enabled)
        .with_uefi(qemu.uefi_enabled)
        .with_tpm1_2(qemu.tpm1_2_enabled)
        .with_tpm2(qemu.tpm2_enabled)
        .with_debug_shell(qemu.debug_shell_enabled)
        .with_iommu(qemu.with_iommu)
        .with_extra_uefi_search_paths(qemu.extra_uefi_search_paths.clone())
        .with_target_arch(qemu.target_arch.clone())
        .with_siderolink(qemu.with_siderolink_agent.is_enabled());

    if let Some(action) = qemu.with_firewall.as_deref().filter(|a| !a.is_empty()) {
        add_firewall(maker, action.parse()?)?;
    }

    let tunnel = qemu.with_siderolink_agent.is_tunnel();
    let mut siderolink = if qemu.with_siderolink_agent.is_enabled() {
        let wg_host = maker
            .request()
            .network
            .gateway_addrs
            .first()
            .copied()
            .ok_or_else(|| CreateError::Invalid("cluster network has no gateway".to_string()))?;
        Siderolink::enabled(wg_host, qemu.with_siderolink_agent.is_tls())?
    } else {
        Siderolink::disabled()
    };
    maker.add_patches(siderolink.config_patches(tunnel)?);

    if maker.options().input_dir.is_none() {
        add_generated_config_options(maker, qemu, &disks, encryption.as_ref())?;
    }

    ui::print_step("validating CIDR and reserving IPs");

    let assets = AssetCache::new(AssetCache::default_dir())
        .resolve_all(&AssetPaths {
            kernel: qemu.node_vmlinuz_path.clone(),
            initramfs: qemu.node_initramfs_path.clone(),
            iso: qemu.node_iso_path.clone(),
            usb: qemu.node_usb_path.clone(),
            uki: qemu.node_uki_path.clone(),
            disk_image: qemu.node_disk_image_path.clone(),
            ipxe_script: qemu.node_ipxe_boot_script.clone(),
        })
        .await?;

    let nameservers = parse_nameservers(&qemu.nameservers)?;
    let no_masquerade_cidrs = parse_cidrs(&qemu.network_no_masquerade_cidrs)?;
    let cni = cni_config(qemu, &default_cni_dir());

    let mut extra_kernel_args: Vec<String> = qemu
        .extra_boot_kernel_args
        .as_deref()
        .map(|args| args.split_whitespace().map(String::from).collect())
        .unwrap_or_default();
    siderolink.set_kernel_args(&mut extra_kernel_args, tunnel)?;

    let injection = config_injection_method(qemu.config_injection_method.as_deref())?;
    let quirks = Quirks::new(maker.talos_version());

    let request = maker.request_mut();
    request.network.nameservers = nameservers;
    request.network.no_masquerade_cidrs = no_masquerade_cidrs;
    request.network.cni = cni;
    request.network.dhcp_skip_hostname = qemu.dhcp_skip_hostname;
    request.network.network_chaos = chaos;
    request.boot_assets = assets;

    for node in &mut request.nodes {
        if let Some(uuid) = node.uuid {
            siderolink.define_ipv6(uuid);
        }
        node.disks = disks.disks_for(node.machine_type);
        node.config_injection_method = injection;
        node.bad_rtc = qemu.bad_rtc;
        node.extra_kernel_args.clone_from(&extra_kernel_args);
        node.quirks = quirks;
    }
    request.siderolink = siderolink.request();

    info!(
        nodes = request.nodes.len(),
        siderolink = siderolink.is_enabled(),
        "Applied qemu options"
    );
    Ok(())
}

fn add_firewall(maker: &mut ClusterMaker<'_>, default_action: DefaultAction) -> Result<()> {
    let control_plane_ips = maker
        .request()
        .control_planes()
        .flat_map(|node| node.ips.iter().copied())
        .collect();

    let patches = FirewallInputs {
        default_action,
        cidrs: maker.plan().cidrs.clone(),
        gateways: maker.plan().gateways.clone(),
        control_plane_ips,
        api_server_port: maker.options().control_plane_port,
    }
    .build()?;

    maker.add_control_plane_patches([patches.control_plane]);
    maker.add_worker_patches([patches.worker]);
    debug!(?default_action, "Added firewall patches");
    Ok(())
}

/// Options that only make sense for generated configs.
fn add_generated_config_options(
    maker: &mut ClusterMaker<'_>,
    qemu: &QemuOptions,
    disks: &DiskPlan,
    encryption: Option<&EncryptionKeys>,
) -> Result<()> {
    maker.add_gen_options([GenOption::InstallImage(qemu.node_install_image.clone())]);

    if let Some(patch) = disks.user_volume_patch()? {
        maker.add_patches([patch]);
    }

    if let Some(keys) = encryption {
        if let Some(option) =
            keys.system_disk_option(qemu.encrypt_state_partition, qemu.encrypt_ephemeral_partition)
        {
            maker.add_gen_options([option]);
        }
        if let Some(listen) = &keys.kms_listen {
            maker.provision_options_mut().kms_endpoint = Some(listen.clone());
        }
    }

    if qemu.use_vip {
        let vip = maker.plan().vip()?;
        let endpoint = https_endpoint(vip, maker.options().control_plane_port);
        let iface = maker.provider().first_interface();

        maker.add_gen_options([GenOption::NetworkOptions(vec![NetworkOption::Vip(
            iface,
            vip.to_string(),
        )])]);
        maker.set_in_cluster_endpoint(endpoint.clone());
        maker.provision_options_mut().kubernetes_endpoint = Some(endpoint);
    }

    if !qemu.bootloader_enabled {
        // kexec would bypass the disabled bootloader
        maker.add_gen_options([GenOption::Sysctls(BTreeMap::from([(
            "kernel.kexec_load_disabled".to_string(),
            "1".to_string(),
        )]))]);
    }

    Ok(())
}

fn cni_config(qemu: &QemuOptions, cni_dir: &Path) -> CniConfig {
    let bin_path = if qemu.cni_bin_path.is_empty() {
        vec![cni_dir.join("bin")]
    } else {
        qemu.cni_bin_path.clone()
    };

    CniConfig {
        bin_path,
        conf_dir: qemu
            .cni_conf_dir
            .clone()
            .unwrap_or_else(|| cni_dir.join("conf")),
        cache_dir: qemu
            .cni_cache_dir
            .clone()
            .unwrap_or_else(|| cni_dir.join("cache")),
        bundle_url: qemu.cni_bundle_url.replace("${ARCH}", &qemu.target_arch),
    }
}

/// `socat` commands attaching to each node's serial console.
#[must_use]
pub fn debug_shell_commands(state_dir: &Path, cluster_name: &str, nodes: &[NodeRequest]) -> Vec<String> {
    nodes
        .iter()
        .map(|node| {
            let socket = state_dir.join(cluster_name).join(format!("{}.serial", node.name));
            format!("socat - UNIX-CONNECT:{}", socket.display())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use machinery::MachineType;

    use super::*;

    #[test]
    fn test_talos_version_from_installer_tag() {
        let qemu = QemuOptions {
            node_install_image: "ghcr.io/siderolabs/installer:v1.10.4".to_string(),
            ..QemuOptions::default()
        };
        assert_eq!(talos_version(&CommonOptions::default(), &qemu), "v1.10.4");
    }

    #[test]
    fn test_network_chaos_requires_master_flag() {
        let err = network_chaos(&ChaosOptions {
            jitter: Duration::from_secs(1),
            ..ChaosOptions::default()
        })
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(
            err.to_string(),
            "network chaos flags can only be used with --with-network-chaos"
        );

        let chaos = network_chaos(&ChaosOptions {
            network_chaos: true,
            packet_loss: 0.1,
            ..ChaosOptions::default()
        })
        .unwrap();
        assert!(chaos.enabled);
        assert!(chaos.any_set());
    }

    #[test]
    fn test_config_injection_method() {
        assert_eq!(config_injection_method(None).unwrap(), ConfigInjectionMethod::Http);
        assert_eq!(
            config_injection_method(Some("default")).unwrap(),
            ConfigInjectionMethod::Http
        );
        assert_eq!(
            config_injection_method(Some("metal-iso")).unwrap(),
            ConfigInjectionMethod::MetalIso
        );
        assert!(config_injection_method(Some("floppy")).is_err());
    }

    #[test]
    fn test_cni_defaults() {
        let qemu = QemuOptions {
            target_arch: "arm64".to_string(),
            ..QemuOptions::default()
        };
        let cni = cni_config(&qemu, Path::new("/home/user/.talos/cni"));

        assert_eq!(cni.bin_path, vec![Path::new("/home/user/.talos/cni/bin")]);
        assert_eq!(cni.conf_dir, Path::new("/home/user/.talos/cni/conf"));
        assert_eq!(cni.cache_dir, Path::new("/home/user/.talos/cni/cache"));
        assert!(cni.bundle_url.ends_with("talosctl-cni-bundle-arm64.tar.gz"));
    }

    #[test]
    fn test_debug_shell_commands() {
        let nodes = vec![NodeRequest::new("dev-controlplane-1", MachineType::ControlPlane)];
        assert_eq!(
            debug_shell_commands(Path::new("/state"), "dev", &nodes),
            ["socat - UNIX-CONNECT:/state/dev/dev-controlplane-1.serial"]
        );
    }
}
