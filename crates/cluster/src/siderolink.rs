//! SideroLink management channel for VM clusters.
//!
//! [`Siderolink`] wraps an optional builder: every method is a no-op when
//! the agent is disabled, so callers never branch on it.

use std::net::{IpAddr, Ipv6Addr, SocketAddr, TcpListener, UdpSocket};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ipnet::Ipv6Net;
use machinery::types::{
    EventSinkConfig, KmsgLogConfig, SideroLinkConfig, SidecarDocument, TrustedRootsConfig,
};
use machinery::{Comments, ConfigError, Container, Patch};
use provision::{SiderolinkBind, SiderolinkRequest};
use rand::RngCore;
use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair, SanType};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{CreateError, Result};

/// Kernel parameter carrying an early inline machine config.
pub const KERNEL_PARAM_CONFIG_INLINE: &str = "talos.config.inline";

const CONFLICTING_KERNEL_PARAMS: [&str; 3] =
    ["siderolink.api", "talos.events.sink", "talos.logging.kernel"];

const PORT_ALLOC_ATTEMPTS: usize = 10;

/// Ports the host side of SideroLink listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiderolinkPorts {
    pub wireguard: u16,
    pub api: u16,
    pub sink: u16,
    pub log: u16,
}

impl SiderolinkPorts {
    /// Grab four dynamic ports from the OS, retrying until they are distinct.
    ///
    /// # Errors
    /// Returns [`CreateError::PortAllocExhausted`] if the ports still overlap
    /// after all attempts.
    pub fn allocate() -> Result<Self> {
        for attempt in 1..=PORT_ALLOC_ATTEMPTS {
            let ports = Self {
                wireguard: dynamic_udp_port()?,
                api: dynamic_tcp_port()?,
                sink: dynamic_tcp_port()?,
                log: dynamic_tcp_port()?,
            };
            if ports.distinct() {
                return Ok(ports);
            }
            debug!(attempt, "Dynamic SideroLink ports overlap, retrying");
        }

        Err(CreateError::PortAllocExhausted(PORT_ALLOC_ATTEMPTS))
    }

    #[must_use]
    pub fn distinct(&self) -> bool {
        let mut ports = [self.wireguard, self.api, self.sink, self.log];
        ports.sort_unstable();
        ports.windows(2).all(|pair| pair[0] != pair[1])
    }
}

fn dynamic_tcp_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn dynamic_udp_port() -> Result<u16> {
    let socket = UdpSocket::bind("127.0.0.1:0")?;
    Ok(socket.local_addr()?.port())
}

/// ULA `/64` of the SideroLink network for an installation.
#[must_use]
pub fn network_prefix(installation_id: &str) -> Ipv6Net {
    let hash = Sha256::digest(installation_id.as_bytes());

    let mut octets = [0u8; 16];
    octets.copy_from_slice(&hash[hash.len() - 16..]);
    octets[0] = 0xfd;
    // SideroLink purpose byte
    octets[7] = 0x03;

    Ipv6Net::new(Ipv6Addr::from(octets), 64)
        .map(|net| net.trunc())
        .unwrap_or_else(|_| Ipv6Net::from(Ipv6Addr::from(octets)))
}

/// Random host address inside a `/64`.
fn random_node_addr(prefix: Ipv6Net) -> Ipv6Addr {
    let mut octets = prefix.network().octets();
    rand::thread_rng().fill_bytes(&mut octets[8..]);
    Ipv6Addr::from(octets)
}

/// Host side of an enabled SideroLink channel.
#[derive(Debug, Clone)]
pub struct SiderolinkBuilder {
    wg_host: IpAddr,
    prefix: Ipv6Net,
    node_ipv6_addr: Ipv6Addr,
    ports: SiderolinkPorts,
    binds: Vec<SiderolinkBind>,
    api_cert: Option<String>,
    api_key: Option<String>,
}

impl SiderolinkBuilder {
    /// Allocate ports and, with `use_tls`, a self-signed CA for the API.
    ///
    /// # Errors
    /// Returns an error if port allocation or certificate generation fails.
    pub fn new(wg_host: IpAddr, use_tls: bool) -> Result<Self> {
        let prefix = network_prefix("");
        let node_ipv6_addr = Ipv6Addr::from(u128::from(prefix.network()) + 1);

        let (api_cert, api_key) = if use_tls {
            let (cert, key) = self_signed_ca(wg_host)?;
            (Some(cert), Some(key))
        } else {
            (None, None)
        };

        let ports = SiderolinkPorts::allocate()?;
        debug!(?ports, %prefix, "Allocated SideroLink endpoints");

        Ok(Self {
            wg_host,
            prefix,
            node_ipv6_addr,
            ports,
            binds: Vec::new(),
            api_cert,
            api_key,
        })
    }

    #[must_use]
    pub fn ports(&self) -> SiderolinkPorts {
        self.ports
    }

    #[must_use]
    pub fn prefix(&self) -> Ipv6Net {
        self.prefix
    }

    fn define_ipv6(&mut self, uuid: Uuid) -> Ipv6Addr {
        loop {
            let addr = random_node_addr(self.prefix);
            let taken = addr == self.node_ipv6_addr || self.binds.iter().any(|b| b.addr == addr);
            if !taken {
                self.binds.retain(|bind| bind.uuid != uuid);
                self.binds.push(SiderolinkBind { uuid, addr });
                return addr;
            }
        }
    }

    fn request(&self) -> SiderolinkRequest {
        SiderolinkRequest {
            wireguard_endpoint: SocketAddr::new(self.wg_host, self.ports.wireguard).to_string(),
            api_endpoint: format!(":{}", self.ports.api),
            api_cert: self.api_cert.clone(),
            api_key: self.api_key.clone(),
            sink_endpoint: format!(":{}", self.ports.sink),
            log_endpoint: format!(":{}", self.ports.log),
            binds: self.binds.clone(),
        }
    }

    fn api_url(&self, tunnel: bool) -> String {
        let scheme = if self.api_cert.is_some() { "https" } else { "grpc" };
        let mut url = format!(
            "{scheme}://{}?jointoken=foo",
            SocketAddr::new(self.wg_host, self.ports.api)
        );
        if tunnel {
            url.push_str("&grpc_tunnel=true");
        }
        url
    }

    fn config_document(&self, tunnel: bool) -> Result<Container> {
        let node = IpAddr::V6(self.node_ipv6_addr);

        let mut documents = vec![
            SideroLinkConfig {
                api_url: self.api_url(tunnel),
            }
            .to_document()?,
            EventSinkConfig {
                endpoint: SocketAddr::new(node, self.ports.sink).to_string(),
            }
            .to_document()?,
            KmsgLogConfig {
                name: "siderolink".to_string(),
                url: format!("tcp://{}", SocketAddr::new(node, self.ports.log)),
            }
            .to_document()?,
        ];

        if let Some(cert) = &self.api_cert {
            documents.push(
                TrustedRootsConfig {
                    name: "siderolink-ca".to_string(),
                    certificates: cert.clone(),
                }
                .to_document()?,
            );
        }

        Ok(Container::new(documents)?)
    }
}

fn self_signed_ca(host: IpAddr) -> Result<(String, String)> {
    let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).map_err(ConfigError::from)?;

    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.subject_alt_names = vec![SanType::IpAddress(host)];

    let cert = params.self_signed(&key_pair).map_err(ConfigError::from)?;
    Ok((cert.pem(), key_pair.serialize_pem()))
}

/// SideroLink agent state; inert when disabled.
#[derive(Debug, Clone, Default)]
pub struct Siderolink(Option<SiderolinkBuilder>);

impl Siderolink {
    #[must_use]
    pub fn disabled() -> Self {
        Self(None)
    }

    /// Enable SideroLink with the host side reachable at `wg_host`.
    ///
    /// # Errors
    /// See [`SiderolinkBuilder::new`].
    pub fn enabled(wg_host: IpAddr, use_tls: bool) -> Result<Self> {
        SiderolinkBuilder::new(wg_host, use_tls).map(|builder| Self(Some(builder)))
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.0.is_some()
    }

    #[must_use]
    pub fn builder(&self) -> Option<&SiderolinkBuilder> {
        self.0.as_ref()
    }

    /// Assign a fresh SideroLink address to a node.
    pub fn define_ipv6(&mut self, uuid: Uuid) -> Option<Ipv6Addr> {
        self.0.as_mut().map(|builder| builder.define_ipv6(uuid))
    }

    #[must_use]
    pub fn request(&self) -> Option<SiderolinkRequest> {
        self.0.as_ref().map(SiderolinkBuilder::request)
    }

    /// Config documents pointing a node at the host side.
    ///
    /// # Errors
    /// Returns an error if the documents cannot be rendered.
    pub fn config_document(&self, tunnel: bool) -> Result<Option<Container>> {
        self.0
            .as_ref()
            .map(|builder| builder.config_document(tunnel))
            .transpose()
    }

    /// [`Self::config_document`] as a strategic merge patch.
    ///
    /// # Errors
    /// Returns an error if the documents cannot be rendered.
    pub fn config_patches(&self, tunnel: bool) -> Result<Vec<Patch>> {
        Ok(self
            .config_document(tunnel)?
            .map(Patch::strategic)
            .into_iter()
            .collect())
    }

    /// Append the compressed config document as an inline config kernel
    /// argument.
    ///
    /// # Errors
    /// Returns [`CreateError::Usage`] if `args` already carries SideroLink
    /// parameters.
    pub fn set_kernel_args(&self, args: &mut Vec<String>, tunnel: bool) -> Result<()> {
        let Some(document) = self.config_document(tunnel)? else {
            return Ok(());
        };

        let conflict = args.iter().any(|arg| {
            let key = arg.split_once('=').map_or(arg.as_str(), |(key, _)| key);
            CONFLICTING_KERNEL_PARAMS.contains(&key)
        });
        if conflict {
            return Err(CreateError::usage(
                "siderolink kernel arguments are already set, cannot run with --with-siderolink",
            ));
        }

        let encoded = document.encode(Comments::Disabled)?;
        let compressed = zstd::encode_all(encoded.as_slice(), 0)?;

        args.push(format!(
            "{KERNEL_PARAM_CONFIG_INLINE}={}",
            STANDARD.encode(compressed)
        ));
        Ok(())
    }
}
