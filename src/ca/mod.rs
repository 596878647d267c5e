//! Certificate Authority: loads (or generates and caches) a root CA and
//! issues per-host leaf certificates signed by it on the fly, for TLS MITM.
//!
//! Grounded on `proxy/cert_manager.rs`. An embedded-at-build-time root
//! (baked in from `gleip.cer`/`gleip.key`) needs an offline codegen step
//! this crate doesn't have, so it keeps a generate-once/cache-on-disk
//! root instead (see DESIGN.md). From `tls_config_for`'s perspective the
//! two are equivalent: a stable root identity for the lifetime of the
//! data directory.

use crate::error::CaError;
use anyhow::Context;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, Ia5String, IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::ServerConfig;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use time::{Duration, OffsetDateTime};

/// Minimum leaf-certificate cache capacity.
const MIN_LEAF_CACHE_SIZE: usize = 1024;

pub struct CertificateAuthority {
    root_cert_pem: String,
    root_cert: Certificate,
    root_key: KeyPair,
    root_chain: Vec<CertificateDer<'static>>,
    leaf_cache: Mutex<LeafConfigCache>,
}

impl CertificateAuthority {
    /// Load the cached root CA from `storage_path`, generating and persisting
    /// one on first run (`gleip.cer`/`gleip.key`).
    pub fn new(storage_path: &Path) -> anyhow::Result<Self> {
        let cert_path = storage_path.join("gleip.cer");
        let key_path = storage_path.join("gleip.key");

        let (root_cert, root_key, root_cert_pem) = if cert_path.exists() && key_path.exists() {
            Self::load_existing(&cert_path, &key_path).map_err(|_| CaError::CAUnavailable)?
        } else {
            let (cert, key) = Self::generate_root();
            let cert_pem = cert.pem();
            let key_pem = key.serialize_pem();

            if !storage_path.exists() {
                fs::create_dir_all(storage_path)
                    .context("creating CA storage directory")?;
            }
            fs::write(&cert_path, &cert_pem).context("writing gleip.cer")?;
            fs::write(&key_path, &key_pem).context("writing gleip.key")?;
            tracing::info!("generated new root CA at {}", cert_path.display());

            (cert, key, cert_pem)
        };

        let root_chain = vec![root_cert.der().clone()];

        Ok(Self {
            root_cert_pem,
            root_cert,
            root_key,
            root_chain,
            leaf_cache: Mutex::new(LeafConfigCache::new(MIN_LEAF_CACHE_SIZE)),
        })
    }

    fn load_existing(
        cert_path: &Path,
        key_path: &Path,
    ) -> anyhow::Result<(Certificate, KeyPair, String)> {
        let cert_pem = fs::read_to_string(cert_path).context("reading gleip.cer")?;
        let key_pem = fs::read_to_string(key_path).context("reading gleip.key")?;

        let key = KeyPair::from_pem(&key_pem).context("parsing gleip.key")?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem).context("parsing gleip.cer")?;
        let cert = params
            .self_signed(&key)
            .context("reconstructing root CA certificate")?;

        tracing::info!("loaded existing root CA from {}", cert_path.display());
        Ok((cert, key, cert_pem))
    }

    fn generate_root() -> (Certificate, KeyPair) {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        let now = OffsetDateTime::now_utc();
        let common_name = format!(
            "Gleip CA ({}, {:04}-{:02}-{:02})",
            hostname,
            now.year(),
            now.month() as u8,
            now.day()
        );

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name);
        dn.push(DnType::OrganizationName, "Gleip");

        let mut params = CertificateParams::default();
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.not_before = now.checked_sub(Duration::hours(1)).unwrap_or(now);
        params.not_after = now.checked_add(Duration::days(365 * 10)).unwrap_or(now);

        let key_pair = KeyPair::generate().expect("failed to generate CA key");
        let cert = params
            .self_signed(&key_pair)
            .expect("failed to self-sign root CA certificate");
        (cert, key_pair)
    }

    /// `tls_config_for(host)`: return a cached TLS server config whose
    /// certificate chain is `[leaf, root]`, generating and caching the leaf
    /// on first request for that host.
    pub fn tls_config_for(&self, host: &str) -> anyhow::Result<Arc<ServerConfig>> {
        let key = host.to_ascii_lowercase();
        {
            let mut cache = self.leaf_cache.lock().expect("leaf cache poisoned");
            if let Some(cfg) = cache.get(&key) {
                return Ok(cfg);
            }
        }

        let (chain, key_der) = self.issue_leaf(host)?;
        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key_der)
            .context("building TLS server config for leaf certificate")?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

        let arc = Arc::new(config);
        let mut cache = self.leaf_cache.lock().expect("leaf cache poisoned");
        cache.insert(key, arc.clone());
        Ok(arc)
    }

    fn issue_leaf(
        &self,
        host: &str,
    ) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let mut params = CertificateParams::default();

        if let Ok(ip) = IpAddr::from_str(host) {
            params.subject_alt_names = vec![SanType::IpAddress(ip)];
        } else {
            params.subject_alt_names = vec![SanType::DnsName(
                Ia5String::try_from(host)
                    .map_err(|_| CaError::InvalidHostname(host.to_string()))?,
            )];
        }

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        dn.push(DnType::OrganizationName, "Gleip Intercepted");
        params.distinguished_name = dn;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let now = OffsetDateTime::now_utc();
        params.not_before = now.checked_sub(Duration::hours(1)).unwrap_or(now);
        params.not_after = now.checked_add(Duration::days(365)).unwrap_or(now);

        let key_pair = KeyPair::generate().context("generating leaf key")?;
        let cert = params
            .signed_by(&key_pair, &self.root_cert, &self.root_key)
            .context("signing leaf certificate")?;

        tracing::debug!("issued leaf certificate for {}", host);

        let mut chain = Vec::with_capacity(2);
        chain.push(cert.der().clone());
        chain.extend(self.root_chain.iter().cloned());

        let key = PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        Ok((chain, key.clone_key()))
    }

    /// `root_cert_pem()`: PEM-encoded root CA, served at `/cert`.
    pub fn root_cert_pem(&self) -> &str {
        &self.root_cert_pem
    }

    #[cfg(test)]
    pub fn test_root_der(&self) -> CertificateDer<'static> {
        self.root_cert.der().clone()
    }
}

struct LeafConfigCache {
    map: HashMap<String, Arc<ServerConfig>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl LeafConfigCache {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    fn get(&mut self, key: &str) -> Option<Arc<ServerConfig>> {
        let cfg = self.map.get(key)?.clone();
        self.promote(key);
        Some(cfg)
    }

    fn insert(&mut self, key: String, config: Arc<ServerConfig>) {
        self.map.insert(key.clone(), config);
        self.promote(&key);
        self.evict();
    }

    fn promote(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }

    fn evict(&mut self) {
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
    }
}

/// Path to the PEM-encoded root CA on disk, for callers that just need the
/// path rather than an open `CertificateAuthority`.
pub fn root_cert_path(storage_path: &Path) -> PathBuf {
    storage_path.join("gleip.cer")
}
