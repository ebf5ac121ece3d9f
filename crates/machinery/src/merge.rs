//! Strategic merge of configuration documents.
//!
//! Mappings merge recursively and scalars from the patch win. Lists append,
//! except lists of network devices which merge item-wise on their selector
//! key, and a few subnet lists which are replaced wholesale. A mapping
//! carrying `$patch: delete` removes the matching key (or document).

use serde_yaml::{Mapping, Value};

use crate::document::Container;
use crate::error::Result;

const PATCH_DIRECTIVE: &str = "$patch";
const DELETE: &str = "delete";

const REPLACE_PATHS: &[&[&str]] = &[
    &["cluster", "network", "podSubnets"],
    &["cluster", "network", "serviceSubnets"],
];

const LIST_MERGE_KEYS: &[&str] = &["interface", "deviceSelector"];

/// Merge every document of `patch` into `config`.
///
/// Documents are matched by identity; unmatched patch documents are
/// appended in order.
///
/// # Errors
/// Propagates container invariant violations.
pub fn merge(config: &mut Container, patch: &Container) -> Result<()> {
    for doc in patch.documents() {
        let id = doc.id();

        if is_delete(doc.mapping()) {
            config.documents_mut().retain(|existing| existing.id() != id);
            continue;
        }

        if let Some(existing) = config
            .documents_mut()
            .iter_mut()
            .find(|existing| existing.id() == id)
        {
            let mut path = Vec::new();
            merge_mapping(existing.mapping_mut(), doc.mapping(), &mut path);
        } else {
            let mut fresh = doc.clone();
            strip_directives(fresh.mapping_mut());
            config.push(fresh)?;
        }
    }

    Ok(())
}

fn is_delete(mapping: &Mapping) -> bool {
    mapping.get(PATCH_DIRECTIVE).and_then(Value::as_str) == Some(DELETE)
}

fn merge_mapping(left: &mut Mapping, right: &Mapping, path: &mut Vec<String>) {
    for (key, value) in right {
        if key.as_str() == Some(PATCH_DIRECTIVE) {
            continue;
        }

        if value.as_mapping().is_some_and(is_delete) {
            left.remove(key);
            continue;
        }

        path.push(key.as_str().unwrap_or_default().to_string());
        match left.get_mut(key) {
            Some(existing) => merge_value(existing, value, path),
            None => {
                let mut fresh = value.clone();
                if let Value::Mapping(m) = &mut fresh {
                    strip_directives(m);
                }
                left.insert(key.clone(), fresh);
            }
        }
        path.pop();
    }
}

fn merge_value(left: &mut Value, right: &Value, path: &mut Vec<String>) {
    if right.is_null() {
        return;
    }

    if let (Value::Mapping(l), Value::Mapping(r)) = (&mut *left, right) {
        merge_mapping(l, r, path);
        return;
    }

    if let (Value::Sequence(l), Value::Sequence(r)) = (&mut *left, right) {
        if !is_replace_path(path) {
            merge_sequence(l, r, path);
            return;
        }
    }

    *left = right.clone();
}

fn merge_sequence(left: &mut Vec<Value>, right: &[Value], path: &mut Vec<String>) {
    for item in right {
        let existing = list_merge_key(item).and_then(|(key, selector)| {
            left.iter_mut()
                .find(|candidate| list_merge_key(candidate) == Some((key, selector)))
        });

        match existing {
            Some(existing) => merge_value(existing, item, path),
            None => left.push(item.clone()),
        }
    }
}

fn list_merge_key(item: &Value) -> Option<(&'static str, &Value)> {
    let mapping = item.as_mapping()?;
    LIST_MERGE_KEYS
        .iter()
        .find_map(|key| mapping.get(*key).map(|value| (*key, value)))
}

fn is_replace_path(path: &[String]) -> bool {
    REPLACE_PATHS.iter().any(|candidate| {
        candidate.len() == path.len()
            && candidate
                .iter()
                .zip(path)
                .all(|(expected, actual)| actual.as_str() == *expected)
    })
}

fn strip_directives(mapping: &mut Mapping) {
    mapping.remove(PATCH_DIRECTIVE);
    for (_, value) in mapping.iter_mut() {
        if let Value::Mapping(inner) = value {
            strip_directives(inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Container {
        Container::parse(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn test_merge_nested_mappings() {
        let mut config = parse("machine:\n  type: worker\n  kubelet:\n    image: a\n");
        merge(&mut config, &parse("machine:\n  kubelet:\n    image: b\n")).unwrap();

        let doc = config.v1alpha1().unwrap();
        assert_eq!(doc.lookup(&["machine", "kubelet", "image"]).unwrap(), "b");
        assert_eq!(doc.lookup(&["machine", "type"]).unwrap(), "worker");
    }

    #[test]
    fn test_lists_append() {
        let mut config = parse("machine:\n  certSANs: [a]\n");
        merge(&mut config, &parse("machine:\n  certSANs: [b]\n")).unwrap();

        let sans = config.v1alpha1().unwrap().lookup(&["machine", "certSANs"]).unwrap();
        assert_eq!(sans.as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn test_subnet_lists_replace() {
        let mut config = parse("cluster:\n  network:\n    podSubnets: [10.244.0.0/16]\n");
        merge(
            &mut config,
            &parse("cluster:\n  network:\n    podSubnets: [10.100.0.0/16]\n"),
        )
        .unwrap();

        let subnets = config
            .v1alpha1()
            .unwrap()
            .lookup(&["cluster", "network", "podSubnets"])
            .unwrap();
        assert_eq!(subnets.as_sequence().unwrap(), &vec![Value::from("10.100.0.0/16")]);
    }

    #[test]
    fn test_interfaces_merge_by_name() {
        let mut config = parse(
            "machine:\n  network:\n    interfaces:\n      - interface: eth0\n        mtu: 1500\n",
        );
        merge(
            &mut config,
            &parse(
                "machine:\n  network:\n    interfaces:\n      - interface: eth0\n        dhcp: true\n      - interface: wg0\n        mtu: 1420\n",
            ),
        )
        .unwrap();

        let interfaces = config
            .v1alpha1()
            .unwrap()
            .lookup(&["machine", "network", "interfaces"])
            .unwrap()
            .as_sequence()
            .unwrap()
            .clone();
        assert_eq!(interfaces.len(), 2);
        assert_eq!(interfaces[0]["mtu"], Value::from(1500));
        assert_eq!(interfaces[0]["dhcp"], Value::from(true));
    }

    #[test]
    fn test_delete_directive() {
        let mut config = parse("machine:\n  kubelet:\n    image: a\n  type: worker\n");
        merge(&mut config, &parse("machine:\n  kubelet:\n    $patch: delete\n")).unwrap();

        assert!(config.v1alpha1().unwrap().lookup(&["machine", "kubelet"]).is_none());
    }

    #[test]
    fn test_sidecar_documents_match_by_identity() {
        let mut config = parse(
            "machine:\n  type: worker\n---\napiVersion: v1alpha1\nkind: EventSinkConfig\nendpoint: a\n",
        );
        merge(
            &mut config,
            &parse(
                "apiVersion: v1alpha1\nkind: EventSinkConfig\nendpoint: b\n---\napiVersion: v1alpha1\nkind: KmsgLogConfig\nname: k\nurl: tcp://x\n",
            ),
        )
        .unwrap();

        assert_eq!(config.len(), 3);
        let sink = config.by_kind("EventSinkConfig").next().unwrap();
        assert_eq!(sink.lookup(&["endpoint"]).unwrap(), "b");
    }
}
