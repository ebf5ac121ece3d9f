//! Qemu addendum tests: disks, firewall, SideroLink, VIP and boot settings.

mod common;

use clap::Parser;
use machinery::{GenOption, IfaceSelector, MachineType, NetworkOption};
use provision::ConfigInjectionMethod;
use talos_cluster::maker::{self, ClusterMaker};
use talos_cluster::options::{QemuOptions, DEFAULT_INSTALL_IMAGE};
use talos_cluster::siderolink::KERNEL_PARAM_CONFIG_INLINE;

use common::{options, FakeProvider};

fn qemu(args: &[&str]) -> QemuOptions {
    QemuOptions::parse_from(std::iter::once("qemu").chain(args.iter().copied()))
}

async fn build<'a>(
    provider: &'a FakeProvider,
    common: &[&str],
    qemu_args: &[&str],
) -> talos_cluster::Result<ClusterMaker<'a>> {
    let qemu = qemu(qemu_args);
    let mut maker = ClusterMaker::new(provider, options(common), "v1.12.0")?;
    maker::qemu::apply(&mut maker, &qemu).await?;
    Ok(maker)
}

mod defaults_tests {
    use super::*;

    #[tokio::test]
    async fn test_default_request() {
        let provider = FakeProvider::default();
        let maker = build(&provider, &[], &[]).await.unwrap();
        let request = maker.request();

        assert!(request.siderolink.is_none());
        assert!(request.boot_assets.is_empty());
        assert!(request.network.cni.bin_path[0].ends_with("cni/bin"));
        assert!(!request.network.cni.bundle_url.contains("${ARCH}"));

        for node in &request.nodes {
            assert_eq!(node.disks.len(), 1);
            assert_eq!(node.disks[0].size, 6 * 1024 * 1024 * 1024);
            assert_eq!(node.config_injection_method, ConfigInjectionMethod::Http);
            assert!(node.extra_kernel_args.is_empty());
        }

        assert!(maker
            .generator_options()
            .contains(&GenOption::InstallImage(DEFAULT_INSTALL_IMAGE.to_string())));
        assert!(maker.provision_options().bootloader_enabled);
    }

    #[test]
    fn test_talos_version_from_installer_tag() {
        let common = options(&[]);
        let qemu_options = qemu(&["--install-image", "ghcr.io/siderolabs/installer:v1.10.3"]);
        assert_eq!(maker::qemu::talos_version(&common, &qemu_options), "v1.10.3");

        let common = options(&["--talos-version", "v1.11.0"]);
        assert_eq!(maker::qemu::talos_version(&common, &qemu(&[])), "v1.11.0");
    }

    #[tokio::test]
    async fn test_input_dir_skips_generated_options() {
        let provider = FakeProvider::default();
        let maker = build(&provider, &["--input-dir", "/nonexistent"], &[])
            .await
            .unwrap();

        assert!(!maker
            .generator_options()
            .iter()
            .any(|o| matches!(o, GenOption::InstallImage(_))));
    }

    #[tokio::test]
    async fn test_bootloader_disabled_blocks_kexec() {
        let provider = FakeProvider::default();
        let maker = build(&provider, &[], &["--with-bootloader=false"])
            .await
            .unwrap();

        let sysctls = maker
            .generator_options()
            .into_iter()
            .find_map(|o| match o {
                GenOption::Sysctls(sysctls) => Some(sysctls),
                _ => None,
            })
            .unwrap();
        assert_eq!(sysctls["kernel.kexec_load_disabled"], "1");
        assert!(!maker.provision_options().bootloader_enabled);
    }
}

mod validation_tests {
    use super::*;

    #[tokio::test]
    async fn test_chaos_flags_need_chaos() {
        let provider = FakeProvider::default();
        let err = build(&provider, &[], &["--with-network-latency", "50ms"])
            .await
            .err()
            .unwrap();

        assert_eq!(
            err.to_string(),
            "network chaos flags can only be used with --with-network-chaos"
        );
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_chaos_enabled() {
        let provider = FakeProvider::default();
        let maker = build(
            &provider,
            &[],
            &["--with-network-chaos", "--with-network-packet-loss", "0.1"],
        )
        .await
        .unwrap();

        let chaos = &maker.request().network.network_chaos;
        assert!(chaos.enabled);
        assert!((chaos.packet_loss - 0.1).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unknown_injection_method() {
        let provider = FakeProvider::default();
        let err = build(&provider, &[], &["--config-injection-method", "floppy"])
            .await
            .err()
            .unwrap();

        assert_eq!(err.to_string(), "unknown config injection method \"floppy\"");
    }

    #[tokio::test]
    async fn test_bad_nameserver() {
        let provider = FakeProvider::default();
        let err = build(&provider, &[], &["--nameservers", "dns.example.com"])
            .await
            .err()
            .unwrap();

        assert!(err.to_string().contains("dns.example.com"));
    }
}

mod disk_tests {
    use super::*;

    #[tokio::test]
    async fn test_extra_disks_only_on_workers() {
        let provider = FakeProvider::default();
        let maker = build(
            &provider,
            &[],
            &["--extra-disks", "2", "--extra-disks-size", "1024"],
        )
        .await
        .unwrap();

        for node in &maker.request().nodes {
            let expected = if node.machine_type == MachineType::Worker { 3 } else { 1 };
            assert_eq!(node.disks.len(), expected, "{}", node.name);
        }
    }

    #[tokio::test]
    async fn test_user_volumes_patch_configs() {
        let provider = FakeProvider::default();
        let mut maker = build(&provider, &[], &["--user-volumes", "data:1GiB"])
            .await
            .unwrap();
        maker.finalize().unwrap();

        for node in &maker.request().nodes {
            assert_eq!(node.disks.len(), 2);
            let config = node.config.as_ref().unwrap();
            assert_eq!(config.by_kind("UserVolumeConfig").count(), 1);
        }
    }
}

mod patch_tests {
    use super::*;

    #[tokio::test]
    async fn test_firewall_documents() {
        let provider = FakeProvider::default();
        let mut maker = build(&provider, &[], &["--with-firewall", "block"])
            .await
            .unwrap();
        maker.finalize().unwrap();

        for node in &maker.request().nodes {
            let config = node.config.as_ref().unwrap();
            assert_eq!(config.by_kind("NetworkDefaultActionConfig").count(), 1);
            assert!(config.by_kind("NetworkRuleConfig").count() > 0);
        }
    }

    #[tokio::test]
    async fn test_invalid_firewall_action() {
        let provider = FakeProvider::default();
        let err = build(&provider, &[], &["--with-firewall", "drop"])
            .await
            .err()
            .unwrap();

        assert!(err.to_string().contains("drop"));
    }

    #[tokio::test]
    async fn test_vip_endpoint() {
        let provider = FakeProvider::default();
        let mut maker = build(&provider, &["--controlplanes", "3"], &["--use-vip"])
            .await
            .unwrap();

        assert!(maker
            .generator_options()
            .contains(&GenOption::NetworkOptions(vec![NetworkOption::Vip(
                IfaceSelector::Name("eth0".to_string()),
                "10.5.0.50".to_string(),
            )])));
        assert_eq!(
            maker.provision_options().kubernetes_endpoint.as_deref(),
            Some("https://10.5.0.50:6443")
        );

        maker.finalize().unwrap();
        let config = maker.request().nodes[0].config.as_ref().unwrap();
        let endpoint = config
            .v1alpha1()
            .and_then(|doc| doc.lookup(&["cluster", "controlPlane", "endpoint"]))
            .and_then(serde_yaml::Value::as_str);
        assert_eq!(endpoint, Some("https://10.5.0.50:6443"));
    }
}

mod siderolink_tests {
    use super::*;

    #[tokio::test]
    async fn test_siderolink_request_and_kernel_args() {
        let provider = FakeProvider::default();
        let maker = build(&provider, &["--with-uuid-hostnames"], &["--with-siderolink"])
            .await
            .unwrap();
        let request = maker.request();

        let siderolink = request.siderolink.as_ref().unwrap();
        assert_eq!(siderolink.binds.len(), request.nodes.len());
        assert!(siderolink.api_cert.is_none());
        assert!(maker.provision_options().siderolink_enabled);

        for node in &request.nodes {
            assert!(siderolink.binds.iter().any(|b| Some(b.uuid) == node.uuid));
            assert!(node
                .extra_kernel_args
                .iter()
                .any(|arg| arg.starts_with(&format!("{KERNEL_PARAM_CONFIG_INLINE}="))));
        }
    }

    #[tokio::test]
    async fn test_siderolink_tls_carries_certificate() {
        let provider = FakeProvider::default();
        let maker = build(&provider, &[], &["--with-siderolink", "wireguard+tls"])
            .await
            .unwrap();

        let siderolink = maker.request().siderolink.as_ref().unwrap();
        assert!(siderolink.api_cert.is_some());
    }

    #[tokio::test]
    async fn test_conflicting_kernel_args() {
        let provider = FakeProvider::default();
        let err = build(
            &provider,
            &[],
            &[
                "--with-siderolink",
                "--extra-boot-kernel-args",
                "console=ttyS0 siderolink.api=grpc://10.5.0.1:4000",
            ],
        )
        .await
        .err()
        .unwrap();

        assert_eq!(err.exit_code(), 2);
    }
}
