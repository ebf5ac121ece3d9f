//! Client config path resolution and save/merge cycle tests.

use std::path::{Path, PathBuf};

use machinery::clientconfig::{resolve_path, ClientConfig, TALOSCONFIG_ENV};
use serial_test::serial;

mod resolution_tests {
    use super::*;

    #[test]
    #[serial]
    fn test_flag_wins_over_env() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::set_var(TALOSCONFIG_ENV, "/from/env");
        }

        let path = resolve_path(Some(Path::new("/from/flag"))).unwrap();
        assert_eq!(path, PathBuf::from("/from/flag"));

        unsafe {
            std::env::remove_var(TALOSCONFIG_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_env_wins_over_default() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::set_var(TALOSCONFIG_ENV, "/from/env");
        }

        let path = resolve_path(None).unwrap();
        assert_eq!(path, PathBuf::from("/from/env"));

        unsafe {
            std::env::remove_var(TALOSCONFIG_ENV);
        }
    }

    #[test]
    #[serial]
    fn test_default_under_home() {
        // SAFETY: This test runs serially via #[serial] to avoid env var races
        unsafe {
            std::env::remove_var(TALOSCONFIG_ENV);
        }

        let path = resolve_path(None).unwrap();
        assert!(path.ends_with(".talos/config"));
    }
}

mod merge_cycle_tests {
    use super::*;

    #[test]
    fn test_repeated_saves_keep_all_contexts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let bundle = ClientConfig::from_bytes(
            b"context: lab\ncontexts:\n  lab:\n    endpoints: [10.5.0.2]\n    ca: Y2E=\n",
        )
        .unwrap();

        for expected in ["lab", "lab-1", "lab-2"] {
            let mut target = ClientConfig::open(&path).unwrap();
            target.merge(&bundle);
            target.save(&path).unwrap();

            let saved = ClientConfig::open(&path).unwrap();
            assert_eq!(saved.context, expected);
        }

        let saved = ClientConfig::open(&path).unwrap();
        assert_eq!(saved.contexts.len(), 3);
    }
}
