//! Kubeconfig merging.
//!
//! The cluster's admin kubeconfig is merged into the user's kubeconfig:
//! - entries identical to existing ones are skipped,
//! - conflicting clusters, users and contexts get the lowest free `-N`
//!   suffix, and contexts follow their renamed cluster and user,
//! - the new context can be made current.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kube::config::{Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext};
use serde::Serialize;
use tracing::info;

/// Environment variable listing kubeconfig files.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Get the default kubeconfig path: the first `KUBECONFIG` entry, else
/// `~/.kube/config`.
#[must_use]
pub fn default_kubeconfig_path() -> Option<PathBuf> {
    if let Some(paths) = std::env::var_os(KUBECONFIG_ENV) {
        if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    dirs::home_dir().map(|h| h.join(".kube").join("config"))
}

/// Kind of a renamed kubeconfig entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Cluster,
    User,
    Context,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cluster => "cluster",
            Self::User => "user",
            Self::Context => "context",
        })
    }
}

/// An entry renamed during merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub component: Component,
    pub from: String,
    pub to: String,
}

impl fmt::Display for Rename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "renamed {} {:?} -> {:?}", self.component, self.from, self.to)
    }
}

trait Named: Clone + Serialize {
    fn name(&self) -> &str;
    fn set_name(&mut self, name: String);
}

macro_rules! impl_named {
    ($($ty:ty),*) => {
        $(impl Named for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn set_name(&mut self, name: String) {
                self.name = name;
            }
        })*
    };
}

impl_named!(NamedCluster, NamedAuthInfo, NamedContext);

// Credentials are secret types without `PartialEq`; compare the serialized form.
fn same<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_yaml::to_value(a), serde_yaml::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Add `incoming` to `existing` and return its final name.
fn merge_named<T: Named>(
    existing: &mut Vec<T>,
    incoming: &T,
    component: Component,
    renames: &mut Vec<Rename>,
) -> String {
    let name = incoming.name().to_string();

    match existing.iter().find(|entry| entry.name() == name) {
        None => {
            existing.push(incoming.clone());
            name
        }
        Some(current) if same(current, incoming) => name,
        Some(_) => {
            let renamed = (1..)
                .map(|n| format!("{name}-{n}"))
                .find(|candidate| !existing.iter().any(|entry| entry.name() == candidate))
                .unwrap_or_default();

            let mut entry = incoming.clone();
            entry.set_name(renamed.clone());
            existing.push(entry);

            renames.push(Rename {
                component,
                from: name,
                to: renamed.clone(),
            });
            renamed
        }
    }
}

/// Parse a kubeconfig. Blank input is an empty kubeconfig.
///
/// # Errors
/// Returns an error if `bytes` is not a kubeconfig.
pub fn parse(bytes: &[u8]) -> Result<Kubeconfig> {
    let text = std::str::from_utf8(bytes).context("kubeconfig is not valid UTF-8")?;
    if text.trim().is_empty() {
        return Ok(Kubeconfig::default());
    }
    Kubeconfig::from_yaml(text).context("error parsing kubeconfig")
}

/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load(path: &Path) -> Result<Kubeconfig> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("error loading existing kubeconfig {}", path.display()))?;
    parse(&bytes)
}

/// Write `kubeconfig` to `path` atomically, creating the parent directory.
///
/// # Errors
/// Returns an error if any filesystem step fails.
pub fn write(kubeconfig: &Kubeconfig, path: &Path) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let yaml = serde_yaml::to_string(kubeconfig).context("error serializing kubeconfig")?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;
    tmp.write_all(yaml.as_bytes())?;
    tmp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write kubeconfig to {}", path.display()))?;
    Ok(())
}

/// Point every cluster at `server`.
pub fn set_server(kubeconfig: &mut Kubeconfig, server: &str) {
    for cluster in kubeconfig.clusters.iter_mut().filter_map(|c| c.cluster.as_mut()) {
        cluster.server = Some(server.to_string());
    }
}

/// Merge `other` into `existing`, renaming conflicting entries.
///
/// With `activate`, `other`'s current context becomes current under its
/// final name.
pub fn merge(existing: &mut Kubeconfig, other: &Kubeconfig, activate: bool) -> Vec<Rename> {
    let mut renames = Vec::new();

    let clusters: HashMap<String, String> = other
        .clusters
        .iter()
        .map(|cluster| {
            let name =
                merge_named(&mut existing.clusters, cluster, Component::Cluster, &mut renames);
            (cluster.name.clone(), name)
        })
        .collect();

    let users: HashMap<String, String> = other
        .auth_infos
        .iter()
        .map(|user| {
            let name = merge_named(&mut existing.auth_infos, user, Component::User, &mut renames);
            (user.name.clone(), name)
        })
        .collect();

    let mut contexts = HashMap::new();
    for context in &other.contexts {
        let mut context = context.clone();
        if let Some(entry) = context.context.as_mut() {
            if let Some(cluster) = clusters.get(&entry.cluster) {
                entry.cluster.clone_from(cluster);
            }
            if let Some(user) = entry.user.as_ref().and_then(|u| users.get(u)) {
                entry.user = Some(user.clone());
            }
        }

        let name = merge_named(
            &mut existing.contexts,
            &context,
            Component::Context,
            &mut renames,
        );
        contexts.insert(context.name, name);
    }

    if activate {
        if let Some(current) = other.current_context.as_ref().filter(|c| !c.is_empty()) {
            existing.current_context =
                Some(contexts.get(current).cloned().unwrap_or_else(|| current.clone()));
        }
    }

    renames
}

/// Merge `incoming` into the kubeconfig at `path`, activating its context.
/// An absent file is created with `incoming` as is.
///
/// # Errors
/// Returns an error if the existing kubeconfig cannot be read or the result
/// cannot be written.
pub fn merge_into(path: &Path, incoming: &Kubeconfig) -> Result<Vec<Rename>> {
    if !path.exists() {
        write(incoming, path)?;
        info!(path = %path.display(), "Created kubeconfig");
        return Ok(Vec::new());
    }

    let mut existing = load(path)?;
    let renames = merge(&mut existing, incoming, true);
    write(&existing, path).context("error merging kubeconfig")?;

    info!(
        path = %path.display(),
        context = existing.current_context.as_deref().unwrap_or_default(),
        "Merged kubeconfig"
    );
    Ok(renames)
}
