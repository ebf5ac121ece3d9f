//! Provisioning back-ends for local Talos clusters.
//!
//! This crate materializes a fully built [`ClusterRequest`] on a back-end:
//!
//! - [`providers::Docker`] runs every node as a privileged container,
//! - [`providers::Qemu`] runs every node as a VM on a host bridge,
//! - [`state`] persists what was created so later commands can find it,
//! - [`access`] and [`check`] drive a running cluster after creation.
//!
//! # Example
//!
//! ```rust,ignore
//! use provision::providers::{factory, Options};
//!
//! let provider = factory("docker")?;
//! let cluster = provider.create(&request, &Options::new()).await?;
//! println!("{} nodes", cluster.info.nodes.len());
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod access;
pub mod check;
mod exec;
pub mod providers;
pub mod request;
pub mod state;

pub use access::{ClusterAccess, TalosctlAccess};
pub use check::{ClusterCheck, Check};
pub use providers::{factory, Options, Provider, ProviderError};
pub use request::{
    BootAssets, CniConfig, ClusterRequest, ConfigInjectionMethod, Disk, DiskDriver, NetworkChaos,
    NetworkRequest, NodeRequest, Quirks, SiderolinkBind, SiderolinkRequest,
};
pub use state::{Cluster, ClusterInfo, NetworkInfo, NodeInfo};
