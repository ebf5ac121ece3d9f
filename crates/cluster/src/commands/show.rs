//! `cluster show`.

use anyhow::Result;
use clap::Args;

use crate::options::ClusterArgs;
use crate::show::show_cluster;

/// Show information about a local Talos cluster
#[derive(Args)]
pub struct ShowCommand {
    #[command(flatten)]
    cluster: ClusterArgs,
}

impl ShowCommand {
    pub async fn run(&self) -> Result<()> {
        let (provider, cluster) = super::reflect(&self.cluster).await?;
        provider.close().await?;

        show_cluster(&cluster, &mut std::io::stdout())
    }
}
