//! Full-mesh WireGuard overlay between cluster nodes.
//!
//! Every node gets a `wg0` interface peering with every other node. Workers
//! dial control planes; control planes listen on a fixed port.

use std::net::IpAddr;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipnet::IpNet;
use machinery::{Container, Document, Patch};
use provision::request::{nth_address, NODES_OFFSET};
use rand::rngs::OsRng;
use serde::Serialize;
use serde_yaml::{Mapping, Value};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::error::{CreateError, Result};

const INTERFACE: &str = "wg0";
const MTU: u32 = 1500;
const KEEPALIVE: &str = "5s";

/// One node of the mesh.
#[derive(Debug, Clone)]
struct MeshNode {
    node_ip: IpAddr,
    wireguard_ip: IpAddr,
    private_key: String,
    public_key: String,
}

/// Per-node WireGuard configuration for a whole cluster.
#[derive(Debug, Clone)]
pub struct WireguardMesh {
    cidr: IpNet,
    listen_port: u16,
    control_planes: usize,
    nodes: Vec<MeshNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PeerSpec {
    public_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint: Option<String>,
    persistent_keepalive_interval: &'static str,
    #[serde(rename = "allowedIPs")]
    allowed_ips: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireguardSpec {
    private_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    listen_port: Option<u16>,
    peers: Vec<PeerSpec>,
}

impl WireguardMesh {
    /// Generate keys and overlay addresses for `node_ips`, control planes
    /// first.
    ///
    /// # Errors
    /// Returns [`CreateError::InvalidCidr`] if `cidr` does not parse or is
    /// too small for the node count.
    pub fn new(
        node_ips: &[IpAddr],
        cidr: &str,
        listen_port: u16,
        control_planes: usize,
    ) -> Result<Self> {
        let cidr: IpNet = cidr.parse().map_err(|e| {
            CreateError::InvalidCidr(format!("error parsing wireguard CIDR {cidr:?}: {e}"))
        })?;

        let nodes = node_ips
            .iter()
            .enumerate()
            .map(|(i, node_ip)| {
                let wireguard_ip = nth_address(&cidr, NODES_OFFSET + i as u128).ok_or_else(|| {
                    CreateError::InvalidCidr(format!("wireguard network {cidr} is too small"))
                })?;
                let secret = StaticSecret::random_from_rng(OsRng);
                let public = PublicKey::from(&secret);

                Ok(MeshNode {
                    node_ip: *node_ip,
                    wireguard_ip,
                    private_key: STANDARD.encode(secret.to_bytes()),
                    public_key: STANDARD.encode(public.as_bytes()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cidr,
            listen_port,
            control_planes,
            nodes,
        })
    }

    /// Overlay address of the node at `node_ip`.
    #[must_use]
    pub fn wireguard_ip(&self, node_ip: IpAddr) -> Option<IpAddr> {
        self.position(node_ip).map(|i| self.nodes[i].wireguard_ip)
    }

    fn position(&self, node_ip: IpAddr) -> Option<usize> {
        self.nodes.iter().position(|node| node.node_ip == node_ip)
    }

    /// Strategic merge patch adding `wg0` to the node at `node_ip`.
    ///
    /// # Errors
    /// Returns [`CreateError::Invalid`] for an address outside the mesh.
    pub fn patch_for(&self, node_ip: IpAddr) -> Result<Patch> {
        let index = self.position(node_ip).ok_or_else(|| {
            CreateError::Invalid(format!("node {node_ip} is not part of the wireguard mesh"))
        })?;
        let node = &self.nodes[index];

        let peers = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(i, peer)| PeerSpec {
                public_key: peer.public_key.clone(),
                endpoint: (i < self.control_planes)
                    .then(|| std::net::SocketAddr::new(peer.node_ip, self.listen_port).to_string()),
                persistent_keepalive_interval: KEEPALIVE,
                allowed_ips: vec![IpNet::from(peer.wireguard_ip).to_string()],
            })
            .collect();

        let wireguard = WireguardSpec {
            private_key: node.private_key.clone(),
            listen_port: (index < self.control_planes).then_some(self.listen_port),
            peers,
        };

        let mut device = Mapping::new();
        device.insert("interface".into(), INTERFACE.into());
        device.insert("mtu".into(), MTU.into());
        device.insert(
            "addresses".into(),
            Value::Sequence(vec![format!(
                "{}/{}",
                node.wireguard_ip,
                self.cidr.prefix_len()
            )
            .into()]),
        );
        device.insert(
            "wireguard".into(),
            serde_yaml::to_value(wireguard).map_err(machinery::ConfigError::from)?,
        );

        let mut doc = Document::new(Mapping::new());
        doc.set(
            &["machine", "network", "interfaces"],
            Value::Sequence(vec![Value::Mapping(device)]),
        );

        Ok(Patch::strategic(Container::new(vec![doc])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(count: u8) -> Vec<IpAddr> {
        (0..count)
            .map(|i| IpAddr::from([10, 5, 0, 2 + i]))
            .collect()
    }

    fn interface(mesh: &WireguardMesh, ip: IpAddr) -> Value {
        let Patch::StrategicMerge(container) = mesh.patch_for(ip).unwrap() else {
            panic!("expected strategic merge patch");
        };
        container.documents()[0]
            .lookup(&["machine", "network", "interfaces"])
            .and_then(Value::as_sequence)
            .unwrap()[0]
            .clone()
    }

    #[test]
    fn test_overlay_addresses() {
        let mesh = WireguardMesh::new(&ips(3), "192.168.100.0/24", 51111, 1).unwrap();
        assert_eq!(
            mesh.wireguard_ip(IpAddr::from([10, 5, 0, 4])),
            Some(IpAddr::from([192, 168, 100, 4]))
        );

        let wg0 = interface(&mesh, IpAddr::from([10, 5, 0, 2]));
        assert_eq!(wg0["interface"], Value::from("wg0"));
        assert_eq!(wg0["mtu"], Value::from(1500));
        assert_eq!(wg0["addresses"][0], Value::from("192.168.100.2/24"));
    }

    #[test]
    fn test_peers_exclude_self_and_carry_control_plane_endpoints() {
        let mesh = WireguardMesh::new(&ips(3), "192.168.100.0/24", 51111, 1).unwrap();

        let control_plane = interface(&mesh, IpAddr::from([10, 5, 0, 2]));
        assert_eq!(control_plane["wireguard"]["listenPort"], Value::from(51111));
        let peers = control_plane["wireguard"]["peers"].as_sequence().unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|peer| peer.get("endpoint").is_none()));

        let worker = interface(&mesh, IpAddr::from([10, 5, 0, 3]));
        assert!(worker["wireguard"].get("listenPort").is_none());
        let peers = worker["wireguard"]["peers"].as_sequence().unwrap();
        assert_eq!(peers[0]["endpoint"], Value::from("10.5.0.2:51111"));
        assert_eq!(peers[0]["allowedIPs"][0], Value::from("192.168.100.2/32"));
        assert_eq!(peers[0]["persistentKeepaliveInterval"], Value::from("5s"));
        assert!(peers[1].get("endpoint").is_none());
    }

    #[test]
    fn test_unknown_node() {
        let mesh = WireguardMesh::new(&ips(1), "192.168.100.0/24", 51111, 1).unwrap();
        assert!(mesh.patch_for(IpAddr::from([10, 5, 0, 9])).is_err());
    }
}
