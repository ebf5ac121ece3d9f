//! `machineconfig gen` and `machineconfig patch`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use machinery::bundle::{file_name, TALOSCONFIG_FILE};
use machinery::generate::DEFAULT_KUBERNETES_VERSION;
use machinery::patch::{apply, load_patches, Representation};
use machinery::{
    Bundle, BundleOptions, Comments, GenOption, InputOptions, MachineType, VersionContract,
};

use crate::options::DEFAULT_TALOS_VERSION;
use crate::ui;

/// Generate and patch machine configs
#[derive(Args)]
pub struct MachineConfigCommand {
    #[command(subcommand)]
    action: MachineConfigAction,
}

#[derive(Subcommand)]
enum MachineConfigAction {
    /// Generate controlplane, worker and talosconfig files
    Gen(GenArgs),

    /// Apply patches to a machine config file
    Patch(PatchArgs),
}

impl MachineConfigCommand {
    pub async fn run(&self) -> Result<()> {
        match &self.action {
            MachineConfigAction::Gen(args) => args.run(),
            MachineConfigAction::Patch(args) => args.run(),
        }
    }
}

#[derive(Args, Debug)]
struct GenArgs {
    /// Cluster name
    cluster_name: String,

    /// Cluster endpoint URL, e.g. https://10.5.0.2:6443
    endpoint: String,

    /// Desired Kubernetes version
    #[arg(long, default_value = DEFAULT_KUBERNETES_VERSION)]
    kubernetes_version: String,

    /// Talos version to generate configs for
    #[arg(long, default_value = DEFAULT_TALOS_VERSION)]
    talos_version: String,

    /// Installer image written into the install section
    #[arg(long)]
    install_image: Option<String>,

    /// DNS domain of the cluster
    #[arg(long, default_value = "cluster.local")]
    dns_domain: String,

    /// Patch applied to every generated config (literal or @file)
    #[arg(long)]
    config_patch: Vec<String>,

    /// Patch applied to control plane configs (literal or @file)
    #[arg(long)]
    config_patch_control_plane: Vec<String>,

    /// Patch applied to worker configs (literal or @file)
    #[arg(long)]
    config_patch_worker: Vec<String>,

    /// Destination directory
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Emit a header comment in front of each document
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    with_docs: bool,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,
}

impl GenArgs {
    fn run(&self) -> Result<()> {
        let contract = VersionContract::parse(&self.talos_version)
            .with_context(|| format!("error parsing Talos version {:?}", self.talos_version))?;

        let mut gen_options = vec![
            GenOption::VersionContract(contract),
            GenOption::DnsDomain(self.dns_domain.clone()),
        ];
        if let Some(image) = &self.install_image {
            gen_options.push(GenOption::InstallImage(image.clone()));
        }

        let options = BundleOptions::new()
            .with_input_options(InputOptions {
                cluster_name: self.cluster_name.clone(),
                endpoint: self.endpoint.clone(),
                kubernetes_version: self.kubernetes_version.trim_start_matches('v').to_string(),
                gen_options,
            })
            .with_patches(load_patches(&self.config_patch)?)
            .with_patches_control_plane(load_patches(&self.config_patch_control_plane)?)
            .with_patches_worker(load_patches(&self.config_patch_worker)?);

        let bundle = Bundle::new(options)?;

        let types = [MachineType::ControlPlane, MachineType::Worker];
        self.check_existing(&types)?;

        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create {}", self.output_dir.display())
        })?;

        let comments = if self.with_docs {
            Comments::All
        } else {
            Comments::Disabled
        };
        bundle.write(&self.output_dir, comments, &types)?;
        bundle.write_talos_config(&self.output_dir)?;

        ui::print_success(&format!(
            "generated configs for {:?} in {}",
            self.cluster_name,
            self.output_dir.display()
        ));
        Ok(())
    }

    fn check_existing(&self, types: &[MachineType]) -> Result<()> {
        if self.force {
            return Ok(());
        }

        let names = types
            .iter()
            .map(|t| file_name(*t))
            .chain(std::iter::once(TALOSCONFIG_FILE.to_string()));
        for name in names {
            let path = self.output_dir.join(name);
            if path.exists() {
                bail!("{} already exists, use --force to overwrite", path.display());
            }
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
struct PatchArgs {
    /// Machine config file to patch
    input: PathBuf,

    /// Patch to apply (literal or @file)
    #[arg(short, long = "patch", required = true)]
    patches: Vec<String>,

    /// Write the result here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl PatchArgs {
    fn run(&self) -> Result<()> {
        let patched = patch_file(&self.input, &self.patches)?;

        match &self.output {
            Some(path) => std::fs::write(path, patched)
                .with_context(|| format!("failed to write {}", path.display())),
            None => {
                use std::io::Write;
                std::io::stdout().write_all(&patched)?;
                Ok(())
            }
        }
    }
}

/// Read `input` and apply `patches` in order.
fn patch_file(input: &Path, patches: &[String]) -> Result<Vec<u8>> {
    let bytes =
        std::fs::read(input).with_context(|| format!("failed to read {}", input.display()))?;
    let patches = load_patches(patches)?;
    Ok(apply(Representation::Bytes(bytes), &patches)?.into_bytes()?)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_patch_file() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("worker.yaml");
        std::fs::write(
            &input,
            "version: v1alpha1\nmachine:\n  type: worker\ncluster:\n  clusterName: dev\n",
        )
        .unwrap();

        let patched = patch_file(
            &input,
            &["machine:\n  network:\n    hostname: node-1\n".to_string()],
        )
        .unwrap();
        let patched = String::from_utf8(patched).unwrap();

        assert!(patched.contains("hostname: node-1"));
        assert!(patched.contains("clusterName: dev"));
    }

    #[test]
    fn test_patch_file_missing_input() {
        let dir = TempDir::new().unwrap();
        let err = patch_file(&dir.path().join("nope.yaml"), &["{}".to_string()]).unwrap_err();
        assert!(err.to_string().contains("failed to read"));
    }
}
