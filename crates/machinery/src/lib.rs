//! Machine configuration stack for Talos clusters.
//!
//! This crate generates, patches and serializes the layered machine
//! configuration of a cluster:
//!
//! - [`generate`] turns cluster inputs plus generator options into
//!   `v1alpha1` documents for each machine type,
//! - [`patch`] loads JSON6902 and strategic-merge patches and applies them,
//! - [`bundle`] ties both together into init/controlplane/worker configs,
//! - [`clientconfig`] manages the `talosconfig` file clients use.
//!
//! # Example
//!
//! ```rust,ignore
//! use machinery::bundle::{Bundle, BundleOptions, InputOptions};
//! use machinery::patch::load_patches;
//!
//! let bundle = Bundle::new(
//!     BundleOptions::new()
//!         .with_input_options(InputOptions {
//!             cluster_name: "demo".into(),
//!             endpoint: "https://10.5.0.2:6443".into(),
//!             kubernetes_version: "1.34.1".into(),
//!             gen_options: vec![],
//!         })
//!         .with_patches(load_patches(&["@patch.yaml"])?),
//! )?;
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bundle;
pub mod clientconfig;
pub mod contract;
pub mod document;
pub mod error;
pub mod generate;
pub mod merge;
pub mod patch;
pub mod secrets;
pub mod types;

pub use bundle::{Bundle, BundleOptions, InputOptions};
pub use clientconfig::ClientConfig;
pub use contract::VersionContract;
pub use document::{Comments, Container, Document};
pub use error::ConfigError;
pub use generate::{GenOption, IfaceSelector, MachineType, NetworkOption};
pub use patch::Patch;
