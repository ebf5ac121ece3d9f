//! Cluster back-ends.
//!
//! Each provider realizes a [`ClusterRequest`](crate::request::ClusterRequest)
//! on a local runtime and persists enough state to find the cluster again.

pub mod docker;
pub mod qemu;
mod traits;

pub use docker::Docker;
pub use qemu::Qemu;
pub use traits::{host_arch, https_endpoint, Options, Provider, ProviderError};

/// Look up a provider by provisioner name.
///
/// # Errors
/// Returns [`ProviderError::UnsupportedProvisioner`] for unknown names.
pub fn factory(name: &str) -> Result<Box<dyn Provider>, ProviderError> {
    match name {
        docker::NAME => Ok(Box::new(Docker::new())),
        qemu::NAME => Ok(Box::new(Qemu::new())),
        other => Err(ProviderError::UnsupportedProvisioner(other.to_string())),
    }
}
