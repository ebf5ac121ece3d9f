//! Cluster secrets: certificate authorities, tokens and encryption secrets.

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use rand::{Rng, RngCore};
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue, IsCa, Issuer,
    KeyPair, KeyUsagePurpose,
};
use tracing::debug;

use crate::error::Result;

/// CA certificates are valid for ten years.
const CA_VALIDITY_DAYS: i64 = 10 * 365;

/// Client certificates are valid for one year.
const CLIENT_VALIDITY_DAYS: i64 = 365;

const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A PEM certificate with its PEM private key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertAndKey {
    pub crt: String,
    pub key: String,
}

impl CertAndKey {
    /// Base64 of the certificate PEM, the form used inside machine configs.
    #[must_use]
    pub fn crt_b64(&self) -> String {
        STANDARD.encode(&self.crt)
    }

    #[must_use]
    pub fn key_b64(&self) -> String {
        STANDARD.encode(&self.key)
    }
}

#[derive(Debug, Clone)]
pub struct Certs {
    pub etcd: CertAndKey,
    pub k8s: CertAndKey,
    pub k8s_aggregator: CertAndKey,
    /// Service account signing key, PEM.
    pub k8s_service_account: String,
    pub os: CertAndKey,
}

/// Everything secret about a cluster, generated once per cluster.
#[derive(Debug, Clone)]
pub struct SecretsBundle {
    pub cluster_id: String,
    pub cluster_secret: String,
    pub bootstrap_token: String,
    pub secretbox_encryption_secret: String,
    pub trustd_token: String,
    pub certs: Certs,
}

impl SecretsBundle {
    /// Generate a fresh bundle.
    ///
    /// # Errors
    /// Returns an error if key or certificate generation fails.
    pub fn generate() -> Result<Self> {
        let mut rng = rand::thread_rng();

        let bundle = Self {
            cluster_id: URL_SAFE.encode(random_bytes(&mut rng, 32)),
            cluster_secret: STANDARD.encode(random_bytes(&mut rng, 32)),
            bootstrap_token: random_token(&mut rng),
            secretbox_encryption_secret: STANDARD.encode(random_bytes(&mut rng, 32)),
            trustd_token: random_token(&mut rng),
            certs: Certs {
                etcd: new_ca("etcd", false)?,
                k8s: new_ca("kubernetes", false)?,
                k8s_aggregator: new_ca("", false)?,
                k8s_service_account: KeyPair::generate()?.serialize_pem(),
                os: new_ca("talos", true)?,
            },
        };

        debug!("Generated cluster secrets bundle");
        Ok(bundle)
    }

    /// Issue a client certificate for `os:admin`, signed by the OS CA.
    ///
    /// # Errors
    /// Returns an error if the CA cannot be loaded or signing fails.
    pub fn admin_client_cert(&self) -> Result<CertAndKey> {
        let mut params = CertificateParams::default();

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String("admin".to_string()));
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String("os:admin".to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];

        let (not_before, not_after) = validity(CLIENT_VALIDITY_DAYS);
        params.not_before = not_before;
        params.not_after = not_after;

        let client_key = KeyPair::generate_for(&rcgen::PKCS_ED25519)?;
        let ca_key = KeyPair::from_pem(&self.certs.os.key)?;
        let issuer = Issuer::from_ca_cert_pem(&self.certs.os.crt, &ca_key)?;
        let cert = params.signed_by(&client_key, &issuer)?;

        Ok(CertAndKey {
            crt: cert.pem(),
            key: client_key.serialize_pem(),
        })
    }
}

fn new_ca(common_name: &str, ed25519: bool) -> Result<CertAndKey> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    if !common_name.is_empty() {
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        dn.push(
            DnType::OrganizationName,
            DnValue::Utf8String(common_name.to_string()),
        );
    }
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let (not_before, not_after) = validity(CA_VALIDITY_DAYS);
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = if ed25519 {
        KeyPair::generate_for(&rcgen::PKCS_ED25519)?
    } else {
        KeyPair::generate()?
    };
    let cert = params.self_signed(&key_pair)?;

    Ok(CertAndKey {
        crt: cert.pem(),
        key: key_pair.serialize_pem(),
    })
}

fn validity(days: i64) -> (::time::OffsetDateTime, ::time::OffsetDateTime) {
    let now = ::time::OffsetDateTime::now_utc();
    (now, now + ::time::Duration::days(days))
}

fn random_bytes(rng: &mut impl RngCore, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    buf
}

/// A bootstrap-style token: `[a-z0-9]{6}.[a-z0-9]{16}`.
fn random_token(rng: &mut impl Rng) -> String {
    let mut pick = |n: usize| -> String {
        (0..n)
            .map(|_| char::from(TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())]))
            .collect()
    };
    let id = pick(6);
    let secret = pick(16);
    format!("{id}.{secret}")
}
