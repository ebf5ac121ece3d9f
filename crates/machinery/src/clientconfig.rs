//! Client configuration (`talosconfig`) load, merge and atomic save.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

/// Environment variable overriding the client config location.
pub const TALOSCONFIG_ENV: &str = "TALOSCONFIG";

/// A set of named contexts plus the active one.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub contexts: BTreeMap<String, Context>,
}

/// Connection details for one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nodes: Vec<String>,
    /// Base64 PEM of the OS CA.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ca: String,
    /// Base64 PEM of the client certificate.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub crt: String,
    /// Base64 PEM of the client key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    /// Pre-endpoints single address, upgraded on load.
    #[serde(default, skip_serializing)]
    target: Option<String>,
}

impl Context {
    #[must_use]
    pub fn new(endpoints: Vec<String>, ca: String, crt: String, key: String) -> Self {
        Self {
            endpoints,
            ca,
            crt,
            key,
            ..Self::default()
        }
    }
}

/// A context renamed during merge to avoid clobbering an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rename {
    pub from: String,
    pub to: String,
}

impl fmt::Display for Rename {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.from, self.to)
    }
}

impl ClientConfig {
    /// Decode from YAML, upgrading legacy `target` fields to `endpoints`.
    ///
    /// # Errors
    /// Returns an error on invalid YAML.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        let mut config: Self = serde_yaml::from_slice(bytes)?;
        for context in config.contexts.values_mut() {
            if let Some(target) = context.target.take() {
                if context.endpoints.is_empty() && !target.is_empty() {
                    context.endpoints = vec![target];
                }
            }
        }

        Ok(config)
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_yaml::to_string(self)?.into_bytes())
    }

    /// Read the config at `path`, or an empty one if the file is absent.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn open(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Client config not found, starting empty");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::io(path, e)),
        }
    }

    /// Merge `other` into `self`.
    ///
    /// Colliding context names get the lowest free `-N` suffix. The active
    /// context becomes `other`'s active context under its final name.
    pub fn merge(&mut self, other: &Self) -> Vec<Rename> {
        let mut renames = Vec::new();
        let mut active = other.context.clone();

        for (name, context) in &other.contexts {
            let mut final_name = name.clone();
            if self.contexts.contains_key(name) {
                final_name = (1..)
                    .map(|n| format!("{name}-{n}"))
                    .find(|candidate| !self.contexts.contains_key(candidate))
                    .unwrap_or_default();
                renames.push(Rename {
                    from: name.clone(),
                    to: final_name.clone(),
                });
            }

            if *name == other.context {
                active.clone_from(&final_name);
            }
            self.contexts.insert(final_name, context.clone());
        }

        if !active.is_empty() {
            self.context = active;
        }

        renames
    }

    /// Write to `path` atomically: the parent directory is created with mode
    /// 0700 and the file lands via rename with mode 0600.
    ///
    /// # Errors
    /// Returns an error if any filesystem step fails.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        create_private_dir(dir)?;

        let bytes = self.to_bytes()?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| ConfigError::io(dir, e))?;
        tmp.write_all(&bytes).map_err(|e| ConfigError::io(tmp.path(), e))?;
        set_mode(tmp.path(), 0o600)?;
        tmp.persist(path)
            .map_err(|e| ConfigError::io(path, e.error))?;

        info!(path = %path.display(), "Saved client config");
        Ok(())
    }
}

/// `~/.talos/config`.
///
/// # Errors
/// Returns an error if the home directory cannot be determined.
pub fn default_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".talos").join("config"))
        .ok_or_else(|| ConfigError::Invalid("could not determine home directory".to_string()))
}

/// Resolve the config path: explicit flag, then `TALOSCONFIG`, then the default.
///
/// # Errors
/// Returns an error if the default path is needed but cannot be determined.
pub fn resolve_path(flag: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = flag.filter(|p| !p.as_os_str().is_empty()) {
        return Ok(path.to_path_buf());
    }
    if let Some(env) = std::env::var_os(TALOSCONFIG_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(env));
    }
    default_path()
}

fn create_private_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| ConfigError::io(dir, e))?;
    set_mode(dir, 0o700)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| ConfigError::io(path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_config(name: &str) -> ClientConfig {
        let mut contexts = BTreeMap::new();
        contexts.insert(
            name.to_string(),
            Context::new(
                vec!["10.5.0.2".to_string()],
                "Y2E=".to_string(),
                "Y3J0".to_string(),
                "a2V5".to_string(),
            ),
        );
        ClientConfig {
            context: name.to_string(),
            contexts,
        }
    }

    #[test]
    fn test_merge_into_empty_reproduces_bundle() {
        let mut target = ClientConfig::default();
        let bundle = bundle_config("demo");

        let renames = target.merge(&bundle);

        assert!(renames.is_empty());
        assert_eq!(target, bundle);
    }

    #[test]
    fn test_merge_collisions_pick_lowest_suffix() {
        let mut target = ClientConfig::default();
        let bundle = bundle_config("demo");

        target.merge(&bundle);
        let first = target.merge(&bundle);
        let second = target.merge(&bundle);

        assert_eq!(first[0].to, "demo-1");
        assert_eq!(second[0].to, "demo-2");
        assert_eq!(target.context, "demo-2");
        assert_eq!(target.contexts.len(), 3);
        assert_eq!(first[0].to_string(), "\"demo\" -> \"demo-1\"");
    }

    #[test]
    fn test_legacy_target_upgrades() {
        let yaml = "context: old\ncontexts:\n  old:\n    target: 1.2.3.4\n    ca: Y2E=\n";
        let config = ClientConfig::from_bytes(yaml.as_bytes()).unwrap();

        assert_eq!(config.contexts["old"].endpoints, vec!["1.2.3.4".to_string()]);
        let out = String::from_utf8(config.to_bytes().unwrap()).unwrap();
        assert!(!out.contains("target"));
    }

    #[test]
    fn test_open_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::open(&dir.path().join("nope")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("talos").join("config");
        bundle_config("demo").save(&path).unwrap();

        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        let dir_mode = std::fs::metadata(path.parent().unwrap())
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(file_mode, 0o600);
        assert_eq!(dir_mode, 0o700);
        assert_eq!(ClientConfig::open(&path).unwrap(), bundle_config("demo"));
    }
}
