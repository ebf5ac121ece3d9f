//! Address planning for the cluster network.
//!
//! Offsets are counted from the network address: the gateway sits at 1,
//! nodes start at 2 and the optional virtual IP is at 50 of the IPv4 CIDR.

use std::net::{IpAddr, Ipv6Addr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use provision::request::{nth_address, NODES_OFFSET};

use crate::error::{CreateError, Result};

pub const GATEWAY_OFFSET: u128 = 1;
pub const VIP_OFFSET: u128 = 50;

/// Networks, gateways and node addresses of a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressPlan {
    /// The IPv4 CIDR as given, even when IPv4 is disabled.
    pub cidr4: Ipv4Net,
    /// Enabled CIDRs, IPv4 first.
    pub cidrs: Vec<IpNet>,
    /// Parallel to `cidrs`.
    pub gateways: Vec<IpAddr>,
    /// `ips[family][node]`.
    pub ips: Vec<Vec<IpAddr>>,
}

impl AddressPlan {
    /// Plan a network for `nodes` machines.
    ///
    /// # Errors
    /// Returns [`CreateError::InvalidCidr`] for a malformed or non-IPv4
    /// CIDR and when the subnet is too small, and
    /// [`CreateError::NoFamilyEnabled`] when both families are off.
    pub fn new(cidr: &str, ipv4: bool, ipv6: bool, nodes: usize) -> Result<Self> {
        let parsed: IpNet = cidr
            .parse()
            .map_err(|e| CreateError::InvalidCidr(format!("error validating cidr block: {e}")))?;
        let IpNet::V4(cidr4) = parsed else {
            return Err(CreateError::InvalidCidr(
                "IPV4 CIDR expected, got IPV6 CIDR".to_string(),
            ));
        };

        let mut cidrs = Vec::new();
        if ipv4 {
            cidrs.push(IpNet::V4(cidr4));
        }
        if ipv6 {
            cidrs.push(IpNet::V6(ula_for(cidr4)));
        }
        if cidrs.is_empty() {
            return Err(CreateError::NoFamilyEnabled);
        }

        let gateways = cidrs
            .iter()
            .map(|cidr| offset_address(cidr, GATEWAY_OFFSET))
            .collect::<Result<Vec<_>>>()?;

        let ips = cidrs
            .iter()
            .map(|cidr| {
                (0..nodes)
                    .map(|i| offset_address(cidr, NODES_OFFSET + i as u128))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            cidr4,
            cidrs,
            gateways,
            ips,
        })
    }

    /// Addresses of node `index`, one per enabled family.
    #[must_use]
    pub fn node_ips(&self, index: usize) -> Vec<IpAddr> {
        self.ips
            .iter()
            .filter_map(|family| family.get(index).copied())
            .collect()
    }

    /// First `count` addresses of the primary family.
    #[must_use]
    pub fn first_ips(&self, count: usize) -> Vec<IpAddr> {
        self.ips
            .first()
            .map(|family| family.iter().take(count).copied().collect())
            .unwrap_or_default()
    }

    /// Virtual IP for the control plane.
    ///
    /// # Errors
    /// Returns [`CreateError::InvalidCidr`] if the IPv4 subnet is too small.
    pub fn vip(&self) -> Result<IpAddr> {
        offset_address(&IpNet::V4(self.cidr4), VIP_OFFSET)
    }

    #[must_use]
    pub fn primary_gateway(&self) -> IpAddr {
        self.gateways[0]
    }
}

/// IPv6 ULA `/64` derived from an IPv4 network: `fd74:616c:AABB:CCDD::/64`
/// for `AA.BB.CC.DD`.
#[must_use]
pub fn ula_for(cidr4: Ipv4Net) -> Ipv6Net {
    let [a, b, c, d] = cidr4.addr().octets();
    let addr = Ipv6Addr::new(
        0xfd74,
        0x616c,
        u16::from_be_bytes([a, b]),
        u16::from_be_bytes([c, d]),
        0,
        0,
        0,
        0,
    );
    Ipv6Net::new(addr, 64).unwrap_or_else(|_| Ipv6Net::from(addr))
}

fn offset_address(cidr: &IpNet, offset: u128) -> Result<IpAddr> {
    nth_address(cidr, offset).ok_or_else(|| {
        CreateError::InvalidCidr(format!("network {cidr} is too small for offset {offset}"))
    })
}

/// Parse literal nameserver addresses.
///
/// # Errors
/// Returns [`CreateError::NameserverParse`] for the first entry that is not
/// an IP address.
pub fn parse_nameservers(nameservers: &[String]) -> Result<Vec<IpAddr>> {
    nameservers
        .iter()
        .map(|ns| {
            ns.trim()
                .parse()
                .map_err(|_| CreateError::NameserverParse(ns.clone()))
        })
        .collect()
}

/// Parse a list of CIDRs.
///
/// # Errors
/// Returns [`CreateError::InvalidCidr`] for the first malformed entry.
pub fn parse_cidrs(cidrs: &[String]) -> Result<Vec<IpNet>> {
    cidrs
        .iter()
        .map(|cidr| {
            cidr.trim()
                .parse()
                .map_err(|e| CreateError::InvalidCidr(format!("error parsing CIDR {cidr:?}: {e}")))
        })
        .collect()
}
