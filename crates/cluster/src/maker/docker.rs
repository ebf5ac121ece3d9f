//! Docker addendum of the request builder.

use machinery::VersionContract;
use tracing::debug;

use super::ClusterMaker;
use crate::error::Result;
use crate::options::{CommonOptions, DockerOptions, DEFAULT_TALOS_VERSION};

/// Talos release of the node image.
///
/// An explicit `--talos-version` wins. Otherwise the image tag is used when
/// it parses as a version, and the tool's own release when it does not.
#[must_use]
pub fn talos_version(common: &CommonOptions, docker: &DockerOptions) -> String {
    if let Some(version) = common.talos_version.as_ref().filter(|v| !v.is_empty()) {
        return version.clone();
    }

    match docker.node_image.rsplit_once(':') {
        Some((_, tag)) if VersionContract::parse(tag).is_ok() => tag.to_string(),
        _ => DEFAULT_TALOS_VERSION.to_string(),
    }
}

/// Contribute the Docker options to `maker`.
///
/// # Errors
/// Currently infallible; the signature matches the qemu addendum.
pub fn apply(maker: &mut ClusterMaker<'_>, docker: &DockerOptions) -> Result<()> {
    let ports: Vec<String> = docker
        .ports
        .as_deref()
        .map(|ports| {
            ports
                .split(',')
                .map(str::trim)
                .filter(|port| !port.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let options = std::mem::take(maker.provision_options_mut());
    *maker.provision_options_mut() = options
        .with_docker_ports_host_ip(docker.host_ip.clone())
        .with_docker_image(docker.node_image.clone())
        .with_docker_ports(ports);

    let request = maker.request_mut();
    request.network.docker_disable_ipv6 = docker.disable_ipv6;
    for node in &mut request.nodes {
        node.mounts.clone_from(&docker.mounts);
    }

    debug!(
        image = %docker.node_image,
        mounts = docker.mounts.len(),
        "Applied docker options"
    );
    Ok(())
}
