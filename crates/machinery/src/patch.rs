//! Config patch loading and application.
//!
//! A patch is either an RFC 6902 operation list or a strategic-merge
//! document set. Sequences decode as JSON6902 (JSON is valid YAML, so both
//! syntaxes go through the same decoder), mappings as strategic merge.
//!
//! Application keeps the configuration in whichever representation the
//! previous patch left it in: JSON6902 works on the encoded bytes, strategic
//! merge on the parsed container. Conversion only happens when two adjacent
//! patches disagree.

use std::path::Path;

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::document::{Comments, Container, Document};
use crate::error::{ConfigError, Result};
use crate::merge::merge;

/// A decoded configuration patch.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    /// RFC 6902 operations, applied to the single v1alpha1 document.
    Json6902(json_patch::Patch),
    /// Documents merged into the config by identity.
    StrategicMerge(Container),
}

impl Patch {
    /// Wrap an already-built container as a strategic merge patch.
    #[must_use]
    pub fn strategic(container: Container) -> Self {
        Self::StrategicMerge(container)
    }
}

/// Decode a single patch from raw bytes.
///
/// # Errors
/// Returns [`ConfigError::PatchLoad`] when the input is neither a valid
/// operation list nor a set of mapping documents.
pub fn load_patch(input: &[u8]) -> Result<Patch> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_slice(input) {
        let value = Value::deserialize(de).map_err(|e| ConfigError::PatchLoad(e.to_string()))?;
        if !value.is_null() {
            docs.push(value);
        }
    }

    if docs.is_empty() {
        return Err(ConfigError::PatchLoad("patch is empty".to_string()));
    }

    if let [ops @ Value::Sequence(_)] = docs.as_slice() {
        let json =
            serde_json::to_value(ops).map_err(|e| ConfigError::PatchLoad(e.to_string()))?;
        let ops: json_patch::Patch = serde_json::from_value(json)
            .map_err(|e| ConfigError::PatchLoad(format!("invalid JSON6902 patch: {e}")))?;
        return Ok(Patch::Json6902(ops));
    }

    let documents = docs
        .into_iter()
        .map(Document::from_value)
        .collect::<Result<Vec<_>>>()
        .map_err(|e| ConfigError::PatchLoad(e.to_string()))?;
    let container = Container::new(documents).map_err(|e| ConfigError::PatchLoad(e.to_string()))?;

    Ok(Patch::StrategicMerge(container))
}

/// Decode a list of patch arguments.
///
/// Arguments starting with `@` name a file to read; anything else is the
/// literal patch text.
///
/// # Errors
/// Returns an error if a referenced file cannot be read or a patch fails to
/// decode.
pub fn load_patches<S: AsRef<str>>(args: &[S]) -> Result<Vec<Patch>> {
    args.iter()
        .map(|arg| {
            let arg = arg.as_ref();
            match arg.strip_prefix('@') {
                Some(file) => {
                    let path = Path::new(file);
                    let bytes = std::fs::read(path).map_err(|e| ConfigError::io(path, e))?;
                    debug!(path = %path.display(), "Loaded patch file");
                    load_patch(&bytes).map_err(|e| match e {
                        ConfigError::PatchLoad(msg) => {
                            ConfigError::PatchLoad(format!("{}: {msg}", path.display()))
                        }
                        other => other,
                    })
                }
                None => load_patch(arg.as_bytes()),
            }
        })
        .collect()
}

/// A machine config in one of its two working representations.
#[derive(Debug, Clone, PartialEq)]
pub enum Representation {
    Bytes(Vec<u8>),
    Config(Container),
}

impl Representation {
    /// # Errors
    /// Returns an error if the bytes do not decode.
    pub fn into_config(self) -> Result<Container> {
        match self {
            Self::Bytes(bytes) => Container::parse(&bytes),
            Self::Config(config) => Ok(config),
        }
    }

    /// # Errors
    /// Returns an error if the config cannot be encoded.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            Self::Config(config) => config.encode(Comments::Disabled),
        }
    }
}

/// Apply patches in order, switching representation only when needed.
///
/// # Errors
/// Returns [`ConfigError::Json6902MultiDoc`] when an operation list meets a
/// multi-document config, or the underlying patch failure.
pub fn apply(input: Representation, patches: &[Patch]) -> Result<Representation> {
    let mut current = input;

    for patch in patches {
        current = match patch {
            Patch::Json6902(ops) => Representation::Bytes(apply_json6902(&current.into_bytes()?, ops)?),
            Patch::StrategicMerge(documents) => {
                let mut config = current.into_config()?;
                merge(&mut config, documents)?;
                Representation::Config(config)
            }
        };
    }

    Ok(current)
}

/// Apply patches to a parsed container and return the parsed result.
///
/// # Errors
/// See [`apply`].
pub fn apply_to_config(config: Container, patches: &[Patch]) -> Result<Container> {
    if patches.is_empty() {
        return Ok(config);
    }
    apply(Representation::Config(config), patches)?.into_config()
}

fn apply_json6902(bytes: &[u8], ops: &json_patch::Patch) -> Result<Vec<u8>> {
    let container = Container::parse(bytes)?;
    if container.is_multi_doc() {
        return Err(ConfigError::Json6902MultiDoc);
    }

    let mapping = container
        .documents()
        .first()
        .map(|doc| doc.mapping().clone())
        .unwrap_or_default();

    let mut json = serde_json::to_value(&mapping)?;
    json_patch::patch(&mut json, &ops.0)?;

    let patched: Value = serde_yaml::to_value(&json)?;
    Container::new(vec![Document::from_value(patched)?])?.encode(Comments::Disabled)
}
