//! Provider behaviour that does not need docker or qemu installed.

use std::path::PathBuf;

use machinery::MachineType;
use pretty_assertions::assert_eq;
use provision::providers::qemu::{self, Arch, LaunchConfig};
use provision::providers::{factory, Options};
use provision::{Cluster, ClusterInfo, ClusterRequest, NetworkInfo, NetworkRequest, NodeInfo, NodeRequest};

fn network() -> NetworkRequest {
    NetworkRequest {
        name: "lab".to_string(),
        cidrs: vec!["10.5.0.0/24".parse().unwrap()],
        gateway_addrs: vec!["10.5.0.1".parse().unwrap()],
        mtu: 1500,
        load_balancer_ports: vec![6443],
        ..NetworkRequest::default()
    }
}

fn info(name: &str) -> ClusterInfo {
    ClusterInfo {
        cluster_name: name.to_string(),
        network: NetworkInfo {
            name: name.to_string(),
            cidrs: vec!["10.5.0.0/24".parse().unwrap()],
            gateway_addrs: vec!["10.5.0.1".parse().unwrap()],
            mtu: 1500,
        },
        nodes: vec![NodeInfo {
            id: "1".to_string(),
            uuid: None,
            name: format!("{name}-controlplane-1"),
            machine_type: MachineType::ControlPlane,
            ips: vec!["10.5.0.2".parse().unwrap()],
            nano_cpus: 2_000_000_000,
            memory: 2 << 30,
            disk_size: 6 << 30,
        }],
        kubernetes_endpoint: None,
    }
}

mod reflect_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_reflect_loads_state() {
        let dir = tempfile::tempdir().unwrap();
        Cluster::new("qemu", dir.path(), info("lab")).save().unwrap();

        let provider = factory("qemu").unwrap();
        let cluster = provider.reflect("lab", dir.path()).await.unwrap();
        assert_eq!(cluster.info, info("lab"));
        assert_eq!(cluster.state_directory, dir.path().join("lab"));
    }

    #[tokio::test]
    async fn test_reflect_rejects_other_provisioner() {
        let dir = tempfile::tempdir().unwrap();
        Cluster::new("qemu", dir.path(), info("lab")).save().unwrap();

        let provider = factory("docker").unwrap();
        assert!(provider.reflect("lab", dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_reflect_missing_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let provider = factory("docker").unwrap();
        let err = provider.reflect("nope", dir.path()).await.unwrap_err();
        assert_eq!(err.to_string(), "cluster \"nope\" not found");
    }

    #[tokio::test]
    async fn test_qemu_destroy_without_processes_removes_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = Cluster::new("qemu", dir.path(), info("gone"));
        cluster.save().unwrap();

        let provider = factory("qemu").unwrap();
        // `ip link del` fails without root; destroy still cleans up state.
        provider.destroy(&cluster).await.unwrap();
        assert!(!dir.path().join("gone").exists());
    }
}

mod endpoint_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_docker_endpoints() {
        let provider = factory("docker").unwrap();
        assert_eq!(
            provider.external_kubernetes_control_plane_endpoint(&network(), 6443),
            "https://127.0.0.1:6443"
        );
        assert_eq!(
            provider.in_cluster_kubernetes_control_plane_endpoint(&network(), 6443),
            "https://10.5.0.2:6443"
        );
        assert_eq!(provider.talos_api_endpoints(&network()), vec!["127.0.0.1:50000"]);
        assert_eq!(provider.user_disk_name(0), "/dev/sda");
    }

    #[test]
    fn test_qemu_endpoints() {
        let provider = factory("qemu").unwrap();
        assert_eq!(
            provider.external_kubernetes_control_plane_endpoint(&network(), 6443),
            "https://10.5.0.2:6443"
        );
        assert!(provider.talos_api_endpoints(&network()).is_empty());
        assert_eq!(provider.user_disk_name(2), "/dev/vdc");
    }
}

mod qemu_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use provision::ConfigInjectionMethod;

    #[test]
    fn test_metal_iso_cmdline() {
        let mut node = NodeRequest::new("lab-worker-1", MachineType::Worker);
        node.ips = vec!["10.5.0.3".parse().unwrap()];
        node.config = Some(machinery::Container::default());
        node.config_injection_method = ConfigInjectionMethod::MetalIso;

        let options = Options::new().with_debug_shell(true);
        let cmdline = qemu::kernel_cmdline(&network(), &node, Arch::Arm64, &options);

        assert!(cmdline.contains("console=ttyAMA0"));
        assert!(cmdline.contains("talos.debugshell"));
        assert!(cmdline.ends_with("talos.config=metal-iso"));
        assert!(!cmdline.contains(qemu::CONFIG_URL_PLACEHOLDER));
    }

    #[test]
    fn test_cmdline_without_config() {
        let mut node = NodeRequest::new("lab-worker-1", MachineType::Worker);
        node.ips = vec!["10.5.0.3".parse().unwrap()];

        let cmdline = qemu::kernel_cmdline(&network(), &node, Arch::Amd64, &Options::new());
        assert!(!cmdline.contains("talos.config="));
        assert!(cmdline.contains("talos.platform=metal"));
    }

    #[test]
    fn test_arch_parse() {
        assert_eq!(Arch::parse("amd64").unwrap(), Arch::Amd64);
        assert_eq!(Arch::parse("arm64").unwrap().qemu_executable(), "qemu-system-aarch64");
        assert!(Arch::parse("riscv64").is_err());
    }

    #[test]
    fn test_find_uefi_prefers_extra_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("OVMF_CODE.fd"), b"code").unwrap();
        std::fs::write(dir.path().join("OVMF_VARS.fd"), b"vars").unwrap();

        let (code, vars) = Arch::Amd64
            .find_uefi(&[PathBuf::from(dir.path())])
            .unwrap();
        assert_eq!(code, dir.path().join("OVMF_CODE.fd"));
        assert_eq!(vars, dir.path().join("OVMF_VARS.fd"));
    }

    #[test]
    fn test_launch_config_rejects_garbage() {
        assert!(LaunchConfig::read(&b"not json"[..]).is_err());
    }

    #[test]
    fn test_request_role_filters() {
        let request = ClusterRequest {
            name: "lab".to_string(),
            state_directory: PathBuf::from("/tmp"),
            self_executable: PathBuf::from("/usr/bin/taloslab"),
            network: network(),
            nodes: vec![
                NodeRequest::new("lab-controlplane-1", MachineType::ControlPlane),
                NodeRequest::new("lab-worker-1", MachineType::Worker),
                NodeRequest::new("lab-worker-2", MachineType::Worker),
            ],
            siderolink: None,
            boot_assets: provision::BootAssets::default(),
        };
        assert_eq!(request.control_planes().count(), 1);
        assert_eq!(request.workers().count(), 2);
    }
}
