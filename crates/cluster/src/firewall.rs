//! Host firewall patches for control plane and worker nodes.

use std::net::IpAddr;

use ipnet::IpNet;
use machinery::types::{
    DefaultAction, IngressRule, NetworkDefaultActionConfig, NetworkRuleConfig, PortRange,
    PortSelector, Protocol, SidecarDocument,
};
use machinery::{Container, Patch};

use crate::error::Result;

pub const KUBELET_PORT: u16 = 10250;
pub const APID_PORT: u16 = 50000;
pub const TRUSTD_PORT: u16 = 50001;
pub const ETCD_CLIENT_PORT: u16 = 2379;
pub const ETCD_PEER_PORT: u16 = 2380;
pub const VXLAN_PORTS: [u16; 2] = [4789, 8472];

/// Firewall rule inputs shared by both roles.
#[derive(Debug, Clone)]
pub struct FirewallInputs {
    pub default_action: DefaultAction,
    pub cidrs: Vec<IpNet>,
    /// Parallel to `cidrs`.
    pub gateways: Vec<IpAddr>,
    pub control_plane_ips: Vec<IpAddr>,
    pub api_server_port: u16,
}

/// Firewall patches, one per role.
#[derive(Debug, Clone)]
pub struct FirewallPatches {
    pub control_plane: Patch,
    pub worker: Patch,
}

impl FirewallInputs {
    /// Build both role patches.
    ///
    /// # Errors
    /// Returns an error if the documents cannot be rendered.
    pub fn build(&self) -> Result<FirewallPatches> {
        Ok(FirewallPatches {
            control_plane: Patch::strategic(self.control_plane_config()?),
            worker: Patch::strategic(self.worker_config()?),
        })
    }

    /// Each cluster CIDR, excluding its gateway.
    fn within_cluster(&self) -> Vec<IngressRule> {
        self.cidrs
            .iter()
            .zip(&self.gateways)
            .map(|(cidr, gateway)| IngressRule {
                subnet: cidr.to_string(),
                except: Some(host_net(*gateway)),
            })
            .collect()
    }

    fn control_plane_config(&self) -> Result<Container> {
        let cluster = self.within_cluster();
        let control_planes: Vec<IngressRule> = self
            .control_plane_ips
            .iter()
            .map(|ip| IngressRule {
                subnet: host_net(*ip),
                except: None,
            })
            .collect();

        self.container(vec![
            rule("kubelet-ingress", tcp(KUBELET_PORT), cluster.clone()),
            rule("apid-ingress", tcp(APID_PORT), wide_open()),
            rule("trustd-ingress", tcp(TRUSTD_PORT), cluster.clone()),
            rule(
                "kubernetes-api-ingress",
                tcp(self.api_server_port),
                wide_open(),
            ),
            rule(
                "etcd-ingress",
                PortSelector {
                    ports: vec![PortRange::range(ETCD_CLIENT_PORT, ETCD_PEER_PORT)],
                    protocol: Protocol::Tcp,
                },
                control_planes,
            ),
            rule("cni-vxlan", vxlan(), cluster),
        ])
    }

    fn worker_config(&self) -> Result<Container> {
        let cluster = self.within_cluster();

        self.container(vec![
            rule("kubelet-ingress", tcp(KUBELET_PORT), cluster.clone()),
            rule("apid-ingress", tcp(APID_PORT), cluster.clone()),
            rule("cni-vxlan", vxlan(), cluster),
        ])
    }

    fn container(&self, rules: Vec<NetworkRuleConfig>) -> Result<Container> {
        let mut documents = vec![NetworkDefaultActionConfig {
            ingress: self.default_action,
        }
        .to_document()?];
        for rule in &rules {
            documents.push(rule.to_document()?);
        }
        Ok(Container::new(documents)?)
    }
}

fn rule(name: &str, port_selector: PortSelector, ingress: Vec<IngressRule>) -> NetworkRuleConfig {
    NetworkRuleConfig {
        name: name.to_string(),
        port_selector,
        ingress,
    }
}

fn tcp(port: u16) -> PortSelector {
    PortSelector {
        ports: vec![PortRange::single(port)],
        protocol: Protocol::Tcp,
    }
}

fn vxlan() -> PortSelector {
    PortSelector {
        ports: VXLAN_PORTS.into_iter().map(PortRange::single).collect(),
        protocol: Protocol::Udp,
    }
}

fn wide_open() -> Vec<IngressRule> {
    ["0.0.0.0/0", "::/0"]
        .into_iter()
        .map(|subnet| IngressRule {
            subnet: subnet.to_string(),
            except: None,
        })
        .collect()
}

/// `ip/32` or `ip/128`.
fn host_net(ip: IpAddr) -> String {
    IpNet::from(ip).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn inputs() -> FirewallInputs {
        FirewallInputs {
            default_action: DefaultAction::Block,
            cidrs: vec!["10.5.0.0/24".parse().unwrap()],
            gateways: vec!["10.5.0.1".parse().unwrap()],
            control_plane_ips: vec!["10.5.0.2".parse().unwrap(), "10.5.0.3".parse().unwrap()],
            api_server_port: 6443,
        }
    }

    fn rule_named<'a>(container: &'a Container, name: &str) -> Option<&'a machinery::Document> {
        container.by_kind("NetworkRuleConfig").find(|doc| doc.name() == Some(name))
    }

    #[test]
    fn test_control_plane_rules() {
        let config = inputs().control_plane_config().unwrap();

        let default = config.by_kind("NetworkDefaultActionConfig").next().unwrap();
        assert_eq!(default.lookup(&["ingress"]), Some(&Value::from("block")));

        let etcd = rule_named(&config, "etcd-ingress").unwrap();
        let subnets: Vec<_> = etcd
            .lookup(&["ingress"])
            .and_then(Value::as_sequence)
            .unwrap()
            .iter()
            .filter_map(|rule| rule.get("subnet").and_then(Value::as_str))
            .collect();
        assert_eq!(subnets, ["10.5.0.2/32", "10.5.0.3/32"]);

        let api = rule_named(&config, "kubernetes-api-ingress").unwrap();
        assert_eq!(
            api.lookup(&["portSelector", "ports"]),
            Some(&Value::Sequence(vec![Value::from(6443)]))
        );
    }

    #[test]
    fn test_within_cluster_excludes_gateway() {
        let config = inputs().worker_config().unwrap();
        let kubelet = rule_named(&config, "kubelet-ingress").unwrap();
        let ingress = kubelet.lookup(&["ingress"]).and_then(Value::as_sequence).unwrap();

        assert_eq!(ingress.len(), 1);
        assert_eq!(ingress[0].get("subnet"), Some(&Value::from("10.5.0.0/24")));
        assert_eq!(ingress[0].get("except"), Some(&Value::from("10.5.0.1/32")));
    }

    #[test]
    fn test_worker_has_no_control_plane_rules() {
        let config = inputs().worker_config().unwrap();
        assert!(rule_named(&config, "etcd-ingress").is_none());
        assert!(rule_named(&config, "trustd-ingress").is_none());
        assert!(rule_named(&config, "kubernetes-api-ingress").is_none());
        assert!(rule_named(&config, "cni-vxlan").is_some());
    }
}
