//! Disk encryption keys and the system disk encryption generator option.

use std::net::{IpAddr, SocketAddr};

use machinery::generate::SystemDiskEncryption;
use machinery::types::{EncryptionKey, EncryptionSpec, KmsKey, TpmKey};
use machinery::{GenOption, VersionContract};
use serde_yaml::Mapping;

use crate::error::{CreateError, Result};

/// Port of the host-side KMS endpoint.
pub const KMS_PORT: u16 = 4050;

/// Encryption keys built from `--disk-encryption-key-types`.
#[derive(Debug, Clone, PartialEq)]
pub struct EncryptionKeys {
    pub keys: Vec<EncryptionKey>,
    /// Address the provider serves KMS on, when a `kms` key is used.
    pub kms_listen: Option<String>,
}

impl EncryptionKeys {
    /// Build one key per type, slot numbers following list order.
    ///
    /// # Errors
    /// Returns [`CreateError::Invalid`] for unknown key types or an empty list.
    pub fn new(
        key_types: &[String],
        gateway: IpAddr,
        contract: Option<VersionContract>,
    ) -> Result<Self> {
        let mut keys = Vec::new();
        let mut kms_listen = None;

        for (slot, key_type) in key_types.iter().enumerate() {
            let slot = u32::try_from(slot).map_err(|_| CreateError::Invalid("too many keys".into()))?;
            let key = match key_type.as_str() {
                "uuid" => EncryptionKey {
                    slot,
                    node_id: Some(Mapping::new()),
                    ..EncryptionKey::default()
                },
                "kms" => {
                    kms_listen = Some(format!("0.0.0.0:{KMS_PORT}"));
                    EncryptionKey {
                        slot,
                        kms: Some(KmsKey {
                            endpoint: format!("grpc://{}", SocketAddr::new(gateway, KMS_PORT)),
                        }),
                        ..EncryptionKey::default()
                    }
                }
                "tpm" => {
                    // Contracts default to current when the version is "latest".
                    let enforce = contract
                        .map_or(true, VersionContract::secure_boot_enroll_enforcement_supported);
                    EncryptionKey {
                        slot,
                        tpm: Some(TpmKey {
                            check_secureboot_status_on_enroll: enforce.then_some(true),
                        }),
                        ..EncryptionKey::default()
                    }
                }
                other => {
                    return Err(CreateError::Invalid(format!("unknown key type {other:?}")));
                }
            };
            keys.push(key);
        }

        if keys.is_empty() {
            return Err(CreateError::Invalid(
                "no disk encryption key types enabled".to_string(),
            ));
        }

        Ok(Self { keys, kms_listen })
    }

    #[must_use]
    pub fn spec(&self) -> EncryptionSpec {
        EncryptionSpec::luks2(self.keys.clone())
    }

    /// `machine.systemDiskEncryption` for the selected partitions, if any.
    #[must_use]
    pub fn system_disk_option(&self, state: bool, ephemeral: bool) -> Option<GenOption> {
        if !state && !ephemeral {
            return None;
        }
        Some(GenOption::SystemDiskEncryption(SystemDiskEncryption {
            state: state.then(|| self.spec()),
            ephemeral: ephemeral.then(|| self.spec()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> IpAddr {
        "10.5.0.1".parse().unwrap()
    }

    #[test]
    fn test_key_slots_follow_order() {
        let keys = EncryptionKeys::new(
            &["uuid".into(), "kms".into(), "tpm".into()],
            gateway(),
            Some(VersionContract::new(1, 7)),
        )
        .unwrap();

        assert_eq!(keys.keys.len(), 3);
        assert!(keys.keys[0].node_id.is_some());
        assert_eq!(keys.keys[1].slot, 1);
        assert_eq!(
            keys.keys[1].kms.as_ref().unwrap().endpoint,
            "grpc://10.5.0.1:4050"
        );
        assert_eq!(keys.kms_listen.as_deref(), Some("0.0.0.0:4050"));
        assert_eq!(
            keys.keys[2].tpm.as_ref().unwrap().check_secureboot_status_on_enroll,
            None
        );
    }

    #[test]
    fn test_tpm_enforcement_on_recent_contracts() {
        let keys =
            EncryptionKeys::new(&["tpm".into()], gateway(), Some(VersionContract::new(1, 8))).unwrap();
        assert_eq!(
            keys.keys[0].tpm.as_ref().unwrap().check_secureboot_status_on_enroll,
            Some(true)
        );
    }

    #[test]
    fn test_key_type_errors() {
        let err = EncryptionKeys::new(&["static".into()], gateway(), None).unwrap_err();
        assert_eq!(err.to_string(), "unknown key type \"static\"");

        let err = EncryptionKeys::new(&[], gateway(), None).unwrap_err();
        assert_eq!(err.to_string(), "no disk encryption key types enabled");
    }

    #[test]
    fn test_system_disk_option() {
        let keys = EncryptionKeys::new(&["uuid".into()], gateway(), None).unwrap();
        assert!(keys.system_disk_option(false, false).is_none());

        let Some(GenOption::SystemDiskEncryption(config)) = keys.system_disk_option(true, false)
        else {
            panic!("expected system disk encryption");
        };
        assert!(config.state.is_some());
        assert!(config.ephemeral.is_none());
    }
}
