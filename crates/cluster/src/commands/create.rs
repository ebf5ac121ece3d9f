//! `cluster create` for both providers.

use anyhow::Result;
use clap::{Args, Subcommand};
use provision::{factory, Cluster, Provider, TalosctlAccess};
use tracing::{debug, warn};

use crate::maker::{self, ClusterMaker};
use crate::options::{CommonOptions, DockerOptions, QemuOptions};
use crate::postcreate::PostCreate;
use crate::show::show_cluster;
use crate::ui;

/// Create a local Talos cluster
#[derive(Args)]
pub struct CreateCommand {
    #[command(subcommand)]
    provider: CreateProvider,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum CreateProvider {
    /// Create a cluster of Talos containers
    Docker {
        #[command(flatten)]
        common: CommonOptions,

        #[command(flatten)]
        docker: DockerOptions,
    },

    /// Create a cluster of Talos virtual machines
    Qemu {
        #[command(flatten)]
        common: CommonOptions,

        #[command(flatten)]
        qemu: QemuOptions,
    },
}

impl CreateCommand {
    pub async fn run(&self) -> Result<()> {
        match &self.provider {
            CreateProvider::Docker { common, docker } => create_docker(common, docker).await,
            CreateProvider::Qemu { common, qemu } => create_qemu(common, qemu).await,
        }
    }
}

async fn create_docker(common: &CommonOptions, docker: &DockerOptions) -> Result<()> {
    let provider = factory(provision::providers::docker::NAME)?;

    let talos_version = maker::docker::talos_version(common, docker);
    let mut maker = ClusterMaker::new(provider.as_ref(), common.clone(), &talos_version)?;
    maker::docker::apply(&mut maker, docker)?;

    let result = create_and_wait(&mut maker, false).await;
    finish(provider.as_ref(), common, result).await
}

async fn create_qemu(common: &CommonOptions, qemu: &QemuOptions) -> Result<()> {
    let provider = factory(provision::providers::qemu::NAME)?;

    let talos_version = maker::qemu::talos_version(common, qemu);
    let mut maker = ClusterMaker::new(provider.as_ref(), common.clone(), &talos_version)?;
    maker::qemu::apply(&mut maker, qemu).await?;

    let result = create_and_wait(&mut maker, qemu.debug_shell_enabled).await;
    finish(provider.as_ref(), common, result).await
}

/// Create the cluster, then run the post-create steps.
async fn create_and_wait(maker: &mut ClusterMaker<'_>, debug_shell: bool) -> Result<()> {
    ui::print_step(&format!("creating cluster {:?}", maker.options().cluster.name));

    let cluster = maker.create().await?;

    if debug_shell {
        print_debug_shell(maker);
        return Ok(());
    }

    post_create(maker, &cluster).await
}

async fn post_create(maker: &ClusterMaker<'_>, cluster: &Cluster) -> Result<()> {
    let options = maker.options();

    let Some(talos_config) = maker.talos_config() else {
        debug!("No client config in the bundle, skipping post-create steps");
        return show_cluster(cluster, &mut std::io::stdout());
    };

    let access = TalosctlAccess::new(cluster.clone(), talos_config)?
        .with_force_endpoint(options.force_endpoint.clone());

    let request = maker.request();
    PostCreate::new(options)
        .run(
            &access,
            cluster,
            Some(talos_config),
            &request.nodes,
            request.siderolink.as_ref(),
        )
        .await
}

fn print_debug_shell(maker: &ClusterMaker<'_>) {
    let request = maker.request();
    println!("You can now connect to debug shell on any node using these commands:");
    println!();
    for command in maker::qemu::debug_shell_commands(
        &request.state_directory,
        &request.name,
        &request.nodes,
    ) {
        println!("{command}");
    }
}

/// Crash-dump on failure when asked to, then release the provider.
async fn finish(provider: &dyn Provider, common: &CommonOptions, result: Result<()>) -> Result<()> {
    if result.is_err() && common.crashdump {
        crash_dump(provider, common).await;
    }

    if let Err(e) = provider.close().await {
        warn!(error = %e, "Failed to release provider resources");
    }

    result
}

async fn crash_dump(provider: &dyn Provider, common: &CommonOptions) {
    let args = &common.cluster;
    match provider.reflect(&args.name, &args.state_dir()).await {
        Ok(cluster) => {
            ui::print_warning("cluster creation failed, dumping node logs");
            provider.crash_dump(&cluster, &mut std::io::stderr()).await;
        }
        Err(e) => warn!(error = %e, "Crash dump skipped, cluster state unavailable"),
    }
}
