//! CLI subcommands.

pub mod create;
pub mod destroy;
pub mod launch;
pub mod machineconfig;
pub mod show;
pub mod start;

use anyhow::{anyhow, Result};
use provision::{factory, Cluster, Provider};

use crate::options::ClusterArgs;

/// Provider recorded in the cluster's state and the reflected cluster.
///
/// # Errors
/// Returns an error if the cluster has no state or its provisioner is
/// unknown.
pub(crate) async fn reflect(args: &ClusterArgs) -> Result<(Box<dyn Provider>, Cluster)> {
    let state_dir = args.state_dir();
    let state = Cluster::load(&state_dir, &args.name)?.ok_or_else(|| {
        anyhow!(
            "cluster {:?} not found in {}",
            args.name,
            state_dir.display()
        )
    })?;

    let provider = factory(&state.provisioner)?;
    let cluster = provider.reflect(&args.name, &state_dir).await?;
    Ok((provider, cluster))
}
