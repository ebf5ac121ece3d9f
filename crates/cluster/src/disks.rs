//! VM disk layout and user volume documents.
//!
//! Every node gets the primary system disk followed by one disk per
//! `--user-volumes` entry. Workers additionally get `--extra-disks`.
//! User volumes select their disk through the provider's stable disk name,
//! so the user volume disks always directly follow the primary disk.

use machinery::types::{
    DiskSelector, EncryptionSpec, ProvisioningSpec, SidecarDocument, UserVolumeConfig,
};
use machinery::{Container, MachineType, Patch};
use provision::{Disk, DiskDriver};

use crate::error::{CreateError, Result};

const MIB: u64 = 1024 * 1024;

/// Room for the GPT and partition alignment, reserved once per partition
/// plus once per disk.
pub const GPT_ALIGNMENT: u64 = 2 * MIB;

/// Inputs of the disk planner. Sizes are MiB.
#[derive(Debug, Clone)]
pub struct DiskInputs {
    pub primary_size_mib: u64,
    pub block_size: u32,
    pub preallocate: bool,
    /// `name:size[:name:size...]` per disk.
    pub user_volumes: Vec<String>,
    pub extra_disks: usize,
    pub extra_disk_size_mib: u64,
    pub extra_disk_drivers: Vec<String>,
    pub target_arch: String,
    pub user_volume_encryption: Option<EncryptionSpec>,
}

/// Planned disks and the user volume documents that use them.
#[derive(Debug, Clone)]
pub struct DiskPlan {
    shared: Vec<Disk>,
    worker_extra: Vec<Disk>,
    user_volumes: Vec<UserVolumeConfig>,
}

impl DiskPlan {
    /// Lay out the disks of every node.
    ///
    /// `user_disk_name` maps a disk index (0 is the primary disk) to the
    /// stable device path the provider exposes for it.
    ///
    /// # Errors
    /// Returns [`CreateError::MalformedUserVolume`] for a volume list with an
    /// odd number of tokens or an unparseable size, and
    /// [`CreateError::Invalid`] for an unknown extra disk driver.
    pub fn new(inputs: &DiskInputs, user_disk_name: impl Fn(usize) -> String) -> Result<Self> {
        let skip_preallocate = !inputs.preallocate;

        let mut shared = vec![Disk {
            size: inputs.primary_size_mib * MIB,
            skip_preallocate,
            driver: DiskDriver::Virtio,
            block_size: inputs.block_size,
        }];
        let mut user_volumes = Vec::new();

        for (disk_id, spec) in inputs.user_volumes.iter().enumerate() {
            let tokens: Vec<&str> = spec.split(':').collect();
            if tokens.len() % 2 != 0 {
                return Err(CreateError::MalformedUserVolume(spec.clone()));
            }

            let selector = format!("'{}' in disk.symlinks", user_disk_name(disk_id + 1));
            let mut disk_size = 0;

            for pair in tokens.chunks(2) {
                let (name, size) = (pair[0], pair[1]);
                let bytes = parse_byte_size(size)
                    .ok_or_else(|| CreateError::MalformedUserVolume(format!("{name}: {size:?}")))?;
                disk_size += bytes;

                user_volumes.push(UserVolumeConfig {
                    name: name.to_string(),
                    provisioning: ProvisioningSpec {
                        disk_selector: DiskSelector {
                            expression: selector.clone(),
                        },
                        min_size: size.to_string(),
                        max_size: size.to_string(),
                    },
                    encryption: inputs.user_volume_encryption.clone(),
                });
            }

            let partitions = tokens.len() as u64 / 2;
            shared.push(Disk {
                size: disk_size + GPT_ALIGNMENT * (partitions + 1),
                skip_preallocate,
                driver: DiskDriver::Ide,
                block_size: inputs.block_size,
            });
        }

        let default_driver = if inputs.target_arch == "arm64" {
            // no IDE bus on arm64 machines
            DiskDriver::Virtio
        } else {
            DiskDriver::Ide
        };

        let worker_extra = (0..inputs.extra_disks)
            .map(|i| {
                let driver = match inputs.extra_disk_drivers.get(i) {
                    Some(driver) => driver
                        .parse::<DiskDriver>()
                        .map_err(|e| CreateError::Invalid(e.to_string()))?,
                    None => default_driver,
                };
                Ok(Disk {
                    size: inputs.extra_disk_size_mib * MIB,
                    skip_preallocate,
                    driver,
                    block_size: 0,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            shared,
            worker_extra,
            user_volumes,
        })
    }

    /// Disks attached to a node of the given type.
    #[must_use]
    pub fn disks_for(&self, machine_type: MachineType) -> Vec<Disk> {
        let mut disks = self.shared.clone();
        if machine_type == MachineType::Worker {
            disks.extend(self.worker_extra.iter().cloned());
        }
        disks
    }

    #[must_use]
    pub fn user_volumes(&self) -> &[UserVolumeConfig] {
        &self.user_volumes
    }

    /// Strategic merge patch declaring every user volume, if any were requested.
    ///
    /// # Errors
    /// Returns an error if two volumes share a name.
    pub fn user_volume_patch(&self) -> Result<Option<Patch>> {
        if self.user_volumes.is_empty() {
            return Ok(None);
        }

        let documents = self
            .user_volumes
            .iter()
            .map(SidecarDocument::to_document)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let container = Container::new(documents).map_err(|e| {
            CreateError::Invalid(format!("failed to create user volumes container: {e}"))
        })?;

        Ok(Some(Patch::strategic(container)))
    }
}

/// Parse a byte size such as `1GiB`, `500MB`, `100 MiB` or `4096`.
///
/// Decimal suffixes (`KB`, `MB`...) are powers of 1000, binary ones
/// (`KiB`, `MiB`...) powers of 1024.
#[must_use]
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let input = input.trim();
    let split = input
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(input.len());
    let (number, unit) = input.split_at(split);

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "t" | "tb" => 1_000_000_000_000,
        "ki" | "kib" => 1 << 10,
        "mi" | "mib" => 1 << 20,
        "gi" | "gib" => 1 << 30,
        "ti" | "tib" => 1 << 40,
        _ => return None,
    };

    if let Ok(whole) = number.parse::<u64>() {
        return whole.checked_mul(multiplier);
    }

    let value: f64 = number.parse().ok()?;
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let bytes = (value * multiplier as f64).round() as u64;
    (value.is_finite() && value >= 0.0).then_some(bytes)
}
