//! Bundle generation and patch layering tests.

use machinery::bundle::{Bundle, BundleOptions, InputOptions};
use machinery::document::Comments;
use machinery::generate::{MachineType, DEFAULT_KUBERNETES_VERSION};
use machinery::patch::load_patches;
use machinery::ConfigError;
use pretty_assertions::assert_eq;

fn input() -> InputOptions {
    InputOptions {
        cluster_name: "test-cluster".to_string(),
        endpoint: "https://10.5.0.2:6443".to_string(),
        kubernetes_version: DEFAULT_KUBERNETES_VERSION.to_string(),
        gen_options: vec![],
    }
}

mod layering_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_general_and_role_patches() {
        let bundle = Bundle::new(
            BundleOptions::new()
                .with_input_options(input())
                .with_patches(
                    load_patches(&[
                        r#"[{"op":"add","path":"/machine/network/hostname","value":"test-hostname"}]"#,
                    ])
                    .unwrap(),
                )
                .with_patches_control_plane(
                    load_patches(&[
                        r#"[{"op":"add","path":"/machine/kubelet/image","value":"test-control"}]"#,
                    ])
                    .unwrap(),
                )
                .with_patches_worker(
                    load_patches(&[
                        r#"[{"op":"add","path":"/machine/kubelet/image","value":"test-worker"}]"#,
                    ])
                    .unwrap(),
                ),
        )
        .unwrap();

        let worker = bundle.worker.v1alpha1().unwrap();
        let control_plane = bundle.control_plane.v1alpha1().unwrap();
        let init = bundle.init.as_ref().unwrap().v1alpha1().unwrap();

        assert_eq!(
            worker.lookup(&["machine", "network", "hostname"]).unwrap(),
            "test-hostname"
        );
        assert_eq!(
            worker.lookup(&["machine", "kubelet", "image"]).unwrap(),
            "test-worker"
        );
        assert_eq!(
            control_plane.lookup(&["machine", "kubelet", "image"]).unwrap(),
            "test-control"
        );
        assert_eq!(
            init.lookup(&["machine", "kubelet", "image"]).unwrap(),
            "test-control"
        );
    }

    #[test]
    fn test_strategic_sidecars_append_after_json_patches() {
        let bundle = Bundle::new(
            BundleOptions::new()
                .with_input_options(input())
                .with_patches(
                    load_patches(&[
                        r#"[{"op":"add","path":"/machine/network/hostname","value":"h"}]"#,
                        "apiVersion: v1alpha1\nkind: EventSinkConfig\nendpoint: '[fdae::1]:4002'\n",
                    ])
                    .unwrap(),
                ),
        )
        .unwrap();

        assert_eq!(bundle.worker.len(), 2);
        assert_eq!(bundle.worker.by_kind("EventSinkConfig").count(), 1);
    }

    #[test]
    fn test_json_patch_after_sidecar_fails() {
        let err = Bundle::new(
            BundleOptions::new()
                .with_input_options(input())
                .with_patches(
                    load_patches(&[
                        "apiVersion: v1alpha1\nkind: EventSinkConfig\nendpoint: '[fdae::1]:4002'\n",
                        r#"[{"op":"add","path":"/machine/network/hostname","value":"h"}]"#,
                    ])
                    .unwrap(),
                ),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Json6902MultiDoc));
    }
}

mod source_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_input_and_existing_are_exclusive() {
        let err = Bundle::new(
            BundleOptions::new()
                .with_input_options(input())
                .with_existing_configs("/tmp"),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_write_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = Bundle::new(BundleOptions::new().with_input_options(input())).unwrap();

        bundle
            .write(
                dir.path(),
                Comments::All,
                &[MachineType::ControlPlane, MachineType::Worker],
            )
            .unwrap();
        bundle.write_talos_config(dir.path()).unwrap();

        let reloaded =
            Bundle::new(BundleOptions::new().with_existing_configs(dir.path())).unwrap();

        assert!(reloaded.init.is_none());
        assert_eq!(reloaded.control_plane, bundle.control_plane);
        assert_eq!(reloaded.worker, bundle.worker);
        assert_eq!(reloaded.talos_config, bundle.talos_config);
    }

    #[test]
    fn test_missing_existing_config() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Bundle::new(BundleOptions::new().with_existing_configs(dir.path())).is_err());
    }
}
