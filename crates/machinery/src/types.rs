//! Typed sidecar documents emitted alongside the v1alpha1 machine config.

use serde::ser::{Serialize, Serializer};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::document::Document;
use crate::error::{ConfigError, Result};

/// API version stamped on every sidecar document.
pub const API_VERSION: &str = "v1alpha1";

/// A sidecar document kind.
pub trait SidecarDocument: Serialize {
    /// Value of the `kind` field.
    const KIND: &'static str;

    /// Render as a document with `apiVersion` and `kind` leading the spec fields.
    ///
    /// # Errors
    /// Returns an error if the spec does not serialize to a mapping.
    fn to_document(&self) -> Result<Document> {
        let Value::Mapping(spec) = serde_yaml::to_value(self)? else {
            return Err(ConfigError::Invalid(format!(
                "{} must serialize to a mapping",
                Self::KIND
            )));
        };

        let mut mapping = Mapping::new();
        mapping.insert("apiVersion".into(), API_VERSION.into());
        mapping.insert("kind".into(), Self::KIND.into());
        for (key, value) in spec {
            mapping.insert(key, value);
        }

        Ok(Document::new(mapping))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SideroLinkConfig {
    pub api_url: String,
}

impl SidecarDocument for SideroLinkConfig {
    const KIND: &'static str = "SideroLinkConfig";
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct EventSinkConfig {
    pub endpoint: String,
}

impl SidecarDocument for EventSinkConfig {
    const KIND: &'static str = "EventSinkConfig";
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct KmsgLogConfig {
    pub name: String,
    pub url: String,
}

impl SidecarDocument for KmsgLogConfig {
    const KIND: &'static str = "KmsgLogConfig";
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct TrustedRootsConfig {
    pub name: String,
    pub certificates: String,
}

impl SidecarDocument for TrustedRootsConfig {
    const KIND: &'static str = "TrustedRootsConfig";
}

/// Default ingress policy for the host firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultAction {
    Accept,
    Block,
}

impl std::str::FromStr for DefaultAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "accept" => Ok(Self::Accept),
            "block" => Ok(Self::Block),
            other => Err(ConfigError::Invalid(format!(
                "unknown default action {other:?}, expected accept or block"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct NetworkDefaultActionConfig {
    pub ingress: DefaultAction,
}

impl SidecarDocument for NetworkDefaultActionConfig {
    const KIND: &'static str = "NetworkDefaultActionConfig";
}

/// Transport protocol matched by a firewall rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// A port or inclusive port range; serialized as `6443` or `"2379-2380"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub lo: u16,
    pub hi: u16,
}

impl PortRange {
    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self { lo: port, hi: port }
    }

    #[must_use]
    pub const fn range(lo: u16, hi: u16) -> Self {
        Self { lo, hi }
    }
}

impl Serialize for PortRange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if self.lo == self.hi {
            serializer.serialize_u16(self.lo)
        } else {
            serializer.serialize_str(&format!("{}-{}", self.lo, self.hi))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PortSelector {
    pub ports: Vec<PortRange>,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IngressRule {
    pub subnet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub except: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRuleConfig {
    pub name: String,
    pub port_selector: PortSelector,
    pub ingress: Vec<IngressRule>,
}

impl SidecarDocument for NetworkRuleConfig {
    const KIND: &'static str = "NetworkRuleConfig";
}

/// One LUKS key slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionKey {
    pub slot: u32,
    #[serde(rename = "nodeID", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<Mapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms: Option<KmsKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpm: Option<TpmKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct KmsKey {
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TpmKey {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_secureboot_status_on_enroll: Option<bool>,
}

/// Encryption settings for a partition or volume.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, Deserialize)]
pub struct EncryptionSpec {
    pub provider: String,
    pub keys: Vec<EncryptionKey>,
}

impl EncryptionSpec {
    #[must_use]
    pub fn luks2(keys: Vec<EncryptionKey>) -> Self {
        Self {
            provider: "luks2".to_string(),
            keys,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DiskSelector {
    #[serde(rename = "match")]
    pub expression: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningSpec {
    pub disk_selector: DiskSelector,
    pub min_size: String,
    pub max_size: String,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UserVolumeConfig {
    pub name: String,
    pub provisioning: ProvisioningSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionSpec>,
}

impl SidecarDocument for UserVolumeConfig {
    const KIND: &'static str = "UserVolumeConfig";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_fields_lead() {
        let doc = EventSinkConfig {
            endpoint: "[fdae::2]:4002".to_string(),
        }
        .to_document()
        .unwrap();

        let keys: Vec<_> = doc.mapping().keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, ["apiVersion", "kind", "endpoint"]);
        assert_eq!(doc.kind(), Some("EventSinkConfig"));
    }

    #[test]
    fn test_port_ranges_serialize() {
        let rule = NetworkRuleConfig {
            name: "etcd-ingress".to_string(),
            port_selector: PortSelector {
                ports: vec![PortRange::range(2379, 2380), PortRange::single(6443)],
                protocol: Protocol::Tcp,
            },
            ingress: vec![IngressRule {
                subnet: "10.5.0.2/32".to_string(),
                except: None,
            }],
        }
        .to_document()
        .unwrap();

        let ports = rule.lookup(&["portSelector", "ports"]).unwrap();
        assert_eq!(ports[0], Value::from("2379-2380"));
        assert_eq!(ports[1], Value::from(6443));
        assert_eq!(rule.lookup(&["portSelector", "protocol"]).unwrap(), "tcp");
    }

    #[test]
    fn test_default_action_parse() {
        assert_eq!("block".parse::<DefaultAction>().unwrap(), DefaultAction::Block);
        assert!("drop".parse::<DefaultAction>().is_err());
    }
}
