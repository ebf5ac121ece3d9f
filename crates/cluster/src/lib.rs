//! Local Talos cluster lifecycle.
//!
//! This crate turns `cluster create` flags into a [`provision::ClusterRequest`]
//! plus a machine config bundle and drives a provider through creation:
//!
//! - [`network`], [`disks`], [`firewall`], [`wireguard`] and [`siderolink`]
//!   plan the pieces of the request,
//! - [`maker`] assembles them, with docker and qemu addenda,
//! - [`postcreate`] bootstraps and waits for the cluster, then merges the
//!   client configs,
//! - [`commands`] exposes it all as a CLI.
//!
//! # Example
//!
//! ```rust,ignore
//! use provision::factory;
//! use talos_cluster::maker::ClusterMaker;
//! use talos_cluster::options::CommonOptions;
//!
//! let provider = factory("docker")?;
//! let mut maker = ClusterMaker::new(provider.as_ref(), CommonOptions::default(), "v1.12.0")?;
//! let cluster = maker.create().await?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod assets;
pub mod commands;
pub mod disks;
pub mod encryption;
pub mod error;
pub mod firewall;
pub mod kubeconfig;
pub mod maker;
pub mod network;
pub mod options;
pub mod postcreate;
pub mod retry;
pub mod show;
pub mod siderolink;
pub mod ui;
pub mod wireguard;

pub use error::{CreateError, Result};
pub use maker::ClusterMaker;
pub use postcreate::PostCreate;
