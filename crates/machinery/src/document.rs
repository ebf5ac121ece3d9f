//! Multi-document machine configuration containers.
//!
//! A machine config is a stream of YAML documents. The first is usually the
//! `v1alpha1` machine config (identified by the absence of a `kind` key);
//! the rest are typed sidecar documents carrying `apiVersion`, `kind` and an
//! optional `name`.

use std::fmt;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::error::{ConfigError, Result};

/// Comment policy applied when encoding a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Comments {
    /// Emit a header comment in front of each document.
    #[default]
    All,
    /// Emit bare YAML.
    Disabled,
}

/// Identity used to match documents during merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentId {
    pub kind: String,
    pub name: Option<String>,
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", self.kind, name),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Kind reported for the legacy machine config document.
pub const V1ALPHA1: &str = "v1alpha1";

/// A single configuration document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document(Mapping);

impl Document {
    #[must_use]
    pub fn new(mapping: Mapping) -> Self {
        Self(mapping)
    }

    /// Wrap a YAML value, which must be a mapping.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for scalars and sequences.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Mapping(mapping) => Ok(Self(mapping)),
            other => Err(ConfigError::Invalid(format!(
                "config document must be a mapping, got {}",
                type_name(&other)
            ))),
        }
    }

    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.0.get("kind").and_then(Value::as_str)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    #[must_use]
    pub fn is_v1alpha1(&self) -> bool {
        self.kind().is_none()
    }

    #[must_use]
    pub fn id(&self) -> DocumentId {
        DocumentId {
            kind: self.kind().unwrap_or(V1ALPHA1).to_string(),
            name: self.name().map(str::to_string),
        }
    }

    #[must_use]
    pub fn mapping(&self) -> &Mapping {
        &self.0
    }

    pub fn mapping_mut(&mut self) -> &mut Mapping {
        &mut self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Mapping(self.0)
    }

    /// Look up a nested value by mapping keys.
    #[must_use]
    pub fn lookup(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.0.get(*first)?;
        for key in rest {
            current = current.as_mapping()?.get(*key)?;
        }
        Some(current)
    }

    /// Set a nested value, creating intermediate mappings as needed.
    ///
    /// Non-mapping values found along the path are replaced.
    pub fn set(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut current = &mut self.0;
        for key in parents {
            let entry = current
                .entry(Value::from(*key))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            if !entry.is_mapping() {
                *entry = Value::Mapping(Mapping::new());
            }
            match entry {
                Value::Mapping(next) => current = next,
                _ => return,
            }
        }

        current.insert(Value::from(*last), value);
    }

    fn header(&self) -> String {
        match self.kind() {
            None => "# Machine configuration (v1alpha1).".to_string(),
            Some(kind) => match self.name() {
                Some(name) => format!("# {kind} document {name:?}."),
                None => format!("# {kind} document."),
            },
        }
    }
}

/// An ordered set of configuration documents.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Container {
    documents: Vec<Document>,
}

impl Container {
    /// Build a container, rejecting duplicate document identities.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if two documents share an identity.
    pub fn new(documents: Vec<Document>) -> Result<Self> {
        let mut container = Self::default();
        for doc in documents {
            container.push(doc)?;
        }
        Ok(container)
    }

    /// Decode a `---` separated YAML stream. Empty documents are skipped.
    ///
    /// # Errors
    /// Returns an error on invalid YAML or on non-mapping documents.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let mut documents = Vec::new();
        for de in serde_yaml::Deserializer::from_slice(bytes) {
            let value = Value::deserialize(de)?;
            if value.is_null() {
                continue;
            }
            documents.push(Document::from_value(value)?);
        }
        Self::new(documents)
    }

    /// Encode back to a YAML stream.
    ///
    /// # Errors
    /// Returns an error if a document cannot be serialized.
    pub fn encode(&self, comments: Comments) -> Result<Vec<u8>> {
        let mut out = String::new();
        for (i, doc) in self.documents.iter().enumerate() {
            if i > 0 {
                out.push_str("---\n");
            }
            if comments == Comments::All {
                out.push_str(&doc.header());
                out.push('\n');
            }
            out.push_str(&serde_yaml::to_string(doc.mapping())?);
        }
        Ok(out.into_bytes())
    }

    /// Append a document.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] if a document with the same identity exists.
    pub fn push(&mut self, doc: Document) -> Result<()> {
        let id = doc.id();
        if self.get(&id).is_some() {
            return Err(ConfigError::Invalid(format!("duplicate document: {id}")));
        }
        self.documents.push(doc);
        Ok(())
    }

    #[must_use]
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub(crate) fn documents_mut(&mut self) -> &mut Vec<Document> {
        &mut self.documents
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    #[must_use]
    pub fn is_multi_doc(&self) -> bool {
        self.documents.len() > 1
    }

    #[must_use]
    pub fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.iter().find(|doc| &doc.id() == id)
    }

    /// All documents of the given kind.
    pub fn by_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents.iter().filter(move |doc| doc.kind() == Some(kind))
    }

    #[must_use]
    pub fn v1alpha1(&self) -> Option<&Document> {
        self.documents.iter().find(|doc| doc.is_v1alpha1())
    }

    pub fn v1alpha1_mut(&mut self) -> Option<&mut Document> {
        self.documents.iter_mut().find(|doc| doc.is_v1alpha1())
    }

    /// `machine.type` of the v1alpha1 document.
    #[must_use]
    pub fn machine_type(&self) -> Option<&str> {
        self.v1alpha1()?
            .lookup(&["machine", "type"])
            .and_then(Value::as_str)
    }

    /// `cluster.clusterName` of the v1alpha1 document.
    #[must_use]
    pub fn cluster_name(&self) -> Option<&str> {
        self.v1alpha1()?
            .lookup(&["cluster", "clusterName"])
            .and_then(Value::as_str)
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "sequence",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
