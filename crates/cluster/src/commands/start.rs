//! `cluster start`: boot the nodes of a stopped cluster again.

use anyhow::Result;
use clap::Args;

use crate::options::ClusterArgs;
use crate::ui;

/// Start the nodes of an existing local Talos cluster
#[derive(Args)]
pub struct StartCommand {
    #[command(flatten)]
    cluster: ClusterArgs,
}

impl StartCommand {
    pub async fn run(&self) -> Result<()> {
        let (provider, cluster) = super::reflect(&self.cluster).await?;

        ui::print_step(&format!("starting cluster {:?}", self.cluster.name));
        let result = provider.start(&cluster).await;
        provider.close().await?;
        result?;

        ui::print_success(&format!("cluster {:?} started", self.cluster.name));
        Ok(())
    }
}
