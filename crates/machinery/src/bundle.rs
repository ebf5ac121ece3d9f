//! Config bundle: the init, controlplane and worker configs plus client config.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::clientconfig::ClientConfig;
use crate::document::{Comments, Container};
use crate::error::{ConfigError, Result};
use crate::generate::{GenOption, Input, MachineType};
use crate::patch::{apply_to_config, Patch};
use crate::secrets::SecretsBundle;

/// File name of the client config inside a bundle directory.
pub const TALOSCONFIG_FILE: &str = "talosconfig";

/// Inputs for generating a bundle from scratch.
#[derive(Debug, Clone)]
pub struct InputOptions {
    pub cluster_name: String,
    pub endpoint: String,
    pub kubernetes_version: String,
    pub gen_options: Vec<GenOption>,
}

/// How to build a [`Bundle`].
#[derive(Debug, Clone, Default)]
pub struct BundleOptions {
    input: Option<InputOptions>,
    existing_configs: Option<PathBuf>,
    patches: Vec<Patch>,
    patches_control_plane: Vec<Patch>,
    patches_worker: Vec<Patch>,
}

impl BundleOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_input_options(mut self, input: InputOptions) -> Self {
        self.input = Some(input);
        self
    }

    /// Load configs from a directory instead of generating them.
    #[must_use]
    pub fn with_existing_configs(mut self, dir: impl Into<PathBuf>) -> Self {
        self.existing_configs = Some(dir.into());
        self
    }

    /// Patches applied to every machine type.
    #[must_use]
    pub fn with_patches(mut self, patches: impl IntoIterator<Item = Patch>) -> Self {
        self.patches.extend(patches);
        self
    }

    /// Patches applied to init and controlplane configs.
    #[must_use]
    pub fn with_patches_control_plane(mut self, patches: impl IntoIterator<Item = Patch>) -> Self {
        self.patches_control_plane.extend(patches);
        self
    }

    #[must_use]
    pub fn with_patches_worker(mut self, patches: impl IntoIterator<Item = Patch>) -> Self {
        self.patches_worker.extend(patches);
        self
    }

    #[must_use]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    #[must_use]
    pub fn patches_control_plane(&self) -> &[Patch] {
        &self.patches_control_plane
    }

    #[must_use]
    pub fn patches_worker(&self) -> &[Patch] {
        &self.patches_worker
    }
}

/// The three machine configs of a cluster and its client config.
#[derive(Debug, Clone)]
pub struct Bundle {
    pub init: Option<Container>,
    pub control_plane: Container,
    pub worker: Container,
    pub talos_config: Option<ClientConfig>,
}

impl Bundle {
    /// Build a bundle and apply its patches.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when both or neither of input
    /// options and existing configs are given, or any generation, load or
    /// patch failure.
    pub fn new(opts: BundleOptions) -> Result<Self> {
        let mut bundle = match (&opts.input, &opts.existing_configs) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(
                    "input options can't be used together with existing configs".to_string(),
                ))
            }
            (None, None) => {
                return Err(ConfigError::Invalid(
                    "either input options or existing configs are required".to_string(),
                ))
            }
            (Some(input), None) => Self::generate(input)?,
            (None, Some(dir)) => Self::load(dir)?,
        };

        bundle.apply_patches(&opts)?;
        Ok(bundle)
    }

    fn generate(input: &InputOptions) -> Result<Self> {
        let secrets = SecretsBundle::generate()?;
        let input = Input::new(
            input.cluster_name.clone(),
            input.endpoint.clone(),
            &input.kubernetes_version,
            secrets,
            input.gen_options.clone(),
        )?;

        Ok(Self {
            init: Some(input.config(MachineType::Init)?),
            control_plane: input.config(MachineType::ControlPlane)?,
            worker: input.config(MachineType::Worker)?,
            talos_config: Some(input.talos_config()?),
        })
    }

    fn load(dir: &Path) -> Result<Self> {
        let read = |name: &str| -> Result<Option<Vec<u8>>> {
            let path = dir.join(name);
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(ConfigError::io(path, e)),
            }
        };
        let required = |name: &str| -> Result<Container> {
            let bytes = read(name)?.ok_or_else(|| {
                ConfigError::Invalid(format!("{} is missing", dir.join(name).display()))
            })?;
            Container::parse(&bytes)
        };

        let bundle = Self {
            init: read(&file_name(MachineType::Init))?
                .map(|bytes| Container::parse(&bytes))
                .transpose()?,
            control_plane: required(&file_name(MachineType::ControlPlane))?,
            worker: required(&file_name(MachineType::Worker))?,
            talos_config: read(TALOSCONFIG_FILE)?
                .map(|bytes| ClientConfig::from_bytes(&bytes))
                .transpose()?,
        };

        info!(dir = %dir.display(), "Loaded existing machine configs");
        Ok(bundle)
    }

    fn apply_patches(&mut self, opts: &BundleOptions) -> Result<()> {
        let control_plane: Vec<Patch> = opts
            .patches
            .iter()
            .chain(&opts.patches_control_plane)
            .cloned()
            .collect();
        let worker: Vec<Patch> = opts
            .patches
            .iter()
            .chain(&opts.patches_worker)
            .cloned()
            .collect();

        if let Some(init) = self.init.take() {
            self.init = Some(apply_to_config(init, &control_plane)?);
        }
        self.control_plane = apply_to_config(std::mem::take(&mut self.control_plane), &control_plane)?;
        self.worker = apply_to_config(std::mem::take(&mut self.worker), &worker)?;

        Ok(())
    }

    #[must_use]
    pub fn config(&self, machine_type: MachineType) -> Option<&Container> {
        match machine_type {
            MachineType::Init => self.init.as_ref(),
            MachineType::ControlPlane => Some(&self.control_plane),
            MachineType::Worker => Some(&self.worker),
        }
    }

    /// Encode one machine type's config.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if the bundle has no config of that type.
    pub fn serialize(&self, machine_type: MachineType, comments: Comments) -> Result<Vec<u8>> {
        self.config(machine_type)
            .ok_or_else(|| ConfigError::Invalid(format!("bundle has no {machine_type} config")))?
            .encode(comments)
    }

    /// Write `<type>.yaml` for each requested machine type into `dir`.
    ///
    /// # Errors
    /// Returns an error if a config is missing or a file cannot be written.
    pub fn write(&self, dir: &Path, comments: Comments, types: &[MachineType]) -> Result<()> {
        for machine_type in types {
            let path = dir.join(file_name(*machine_type));
            let bytes = self.serialize(*machine_type, comments)?;
            std::fs::write(&path, bytes).map_err(|e| ConfigError::io(&path, e))?;
            info!(path = %path.display(), "Created machine config");
        }
        Ok(())
    }

    /// Write the client config as `talosconfig` into `dir`, if present.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn write_talos_config(&self, dir: &Path) -> Result<()> {
        if let Some(config) = &self.talos_config {
            let path = dir.join(TALOSCONFIG_FILE);
            std::fs::write(&path, config.to_bytes()?).map_err(|e| ConfigError::io(&path, e))?;
            info!(path = %path.display(), "Created client config");
        }
        Ok(())
    }
}

/// `init.yaml`, `controlplane.yaml` or `worker.yaml`.
#[must_use]
pub fn file_name(machine_type: MachineType) -> String {
    format!("{machine_type}.yaml")
}
