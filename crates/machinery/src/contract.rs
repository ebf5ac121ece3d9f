//! Version contract gating generator defaults by Talos release.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ConfigError;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v?(\d+)\.(\d+)(?:\.\d+)?(?:[-+].*)?$").unwrap());

/// Talos release contract (`major.minor`) used to pick config defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionContract {
    pub major: u32,
    pub minor: u32,
}

/// Contract of the newest release this tool knows about.
pub const TALOS_VERSION_CURRENT: VersionContract = VersionContract::new(1, 12);

impl VersionContract {
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse a contract out of a version string such as `v1.8.3`.
    ///
    /// # Errors
    /// Returns [`ConfigError::VersionParse`] if the string does not start
    /// with a `major.minor` pair.
    pub fn parse(version: &str) -> Result<Self, ConfigError> {
        let caps = VERSION_RE
            .captures(version.trim())
            .ok_or_else(|| ConfigError::VersionParse(version.to_string()))?;

        let major = caps[1]
            .parse()
            .map_err(|_| ConfigError::VersionParse(version.to_string()))?;
        let minor = caps[2]
            .parse()
            .map_err(|_| ConfigError::VersionParse(version.to_string()))?;

        Ok(Self { major, minor })
    }

    fn at_least(self, major: u32, minor: u32) -> bool {
        self >= Self::new(major, minor)
    }

    #[must_use]
    pub fn pod_security_admission_enabled(self) -> bool {
        self.at_least(1, 1)
    }

    #[must_use]
    pub fn stable_hostname_enabled(self) -> bool {
        self.at_least(1, 2)
    }

    #[must_use]
    pub fn kubelet_default_runtime_seccomp_profile_enabled(self) -> bool {
        self.at_least(1, 2)
    }

    #[must_use]
    pub fn kubernetes_allow_scheduling_on_control_planes(self) -> bool {
        self.at_least(1, 2)
    }

    #[must_use]
    pub fn apid_ext_key_usage_check_enabled(self) -> bool {
        self.at_least(1, 3)
    }

    #[must_use]
    pub fn api_server_audit_policy_supported(self) -> bool {
        self.at_least(1, 3)
    }

    #[must_use]
    pub fn kubernetes_discovery_backend_disabled(self) -> bool {
        self.at_least(1, 5)
    }

    #[must_use]
    pub fn disk_quota_support_enabled(self) -> bool {
        self.at_least(1, 5)
    }

    #[must_use]
    pub fn kube_prism_enabled(self) -> bool {
        self.at_least(1, 6)
    }

    #[must_use]
    pub fn host_dns_enabled(self) -> bool {
        self.at_least(1, 7)
    }

    #[must_use]
    pub fn host_dns_forward_kube_dns_to_host(self) -> bool {
        self.at_least(1, 8)
    }

    /// TPM-backed disk encryption checks the secure boot state on enrollment.
    #[must_use]
    pub fn secure_boot_enroll_enforcement_supported(self) -> bool {
        self.at_least(1, 8)
    }

    #[must_use]
    pub fn cluster_name_for_workers(self) -> bool {
        self.at_least(1, 8)
    }
}

impl Default for VersionContract {
    fn default() -> Self {
        TALOS_VERSION_CURRENT
    }
}

impl FromStr for VersionContract {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        assert_eq!(VersionContract::parse("v1.7").unwrap(), VersionContract::new(1, 7));
        assert_eq!(VersionContract::parse("1.8.3").unwrap(), VersionContract::new(1, 8));
        assert_eq!(
            VersionContract::parse("v1.10.0-alpha.1").unwrap(),
            VersionContract::new(1, 10)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            VersionContract::parse("latest"),
            Err(ConfigError::VersionParse(_))
        ));
        assert!(VersionContract::parse("v1").is_err());
        assert!(VersionContract::parse("").is_err());
    }

    #[test]
    fn test_feature_gates() {
        let old = VersionContract::new(1, 7);
        assert!(old.kube_prism_enabled());
        assert!(old.host_dns_enabled());
        assert!(!old.secure_boot_enroll_enforcement_supported());
        assert!(!old.host_dns_forward_kube_dns_to_host());

        assert!(TALOS_VERSION_CURRENT.secure_boot_enroll_enforcement_supported());
        assert!(VersionContract::new(2, 0) > TALOS_VERSION_CURRENT);
    }
}
