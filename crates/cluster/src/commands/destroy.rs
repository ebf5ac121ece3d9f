//! `cluster destroy`.

use anyhow::Result;
use clap::Args;
use tracing::info;

use crate::options::ClusterArgs;
use crate::ui;

/// Destroy a local Talos cluster
#[derive(Args)]
pub struct DestroyCommand {
    #[command(flatten)]
    cluster: ClusterArgs,
}

impl DestroyCommand {
    pub async fn run(&self) -> Result<()> {
        let (provider, cluster) = super::reflect(&self.cluster).await?;

        ui::print_step(&format!("destroying cluster {:?}", self.cluster.name));
        info!(provisioner = provider.name(), "Destroying cluster");

        let result = provider.destroy(&cluster).await;
        provider.close().await?;
        result?;

        ui::print_success(&format!("cluster {:?} destroyed", self.cluster.name));
        Ok(())
    }
}
