//! TLS termination and origination for the gateway.
//!
//! - [`CertificateCache`]: per-host leaf certificates from the run's CA
//! - [`DynamicCertResolver`]: picks the leaf by SNI, or by the CONNECT host
//!   for clients that send none (IP literals)
//! - [`create_tls_acceptor`] / [`create_tls_connector`]: server and client
//!   configs, both on the aws-lc-rs provider
//!
//! # ALPN
//!
//! The acceptor only offers `http/1.1`. The request hook parses HTTP/1
//! messages inside the tunnel; a client that negotiated h2 would bypass it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, trace};

use super::error::GatewayError;
use crate::ca::EphemeralCa;

/// Crypto provider used for every TLS config the gateway builds.
fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::aws_lc_rs::default_provider())
}

/// Leaf certificates keyed by lowercase host name.
pub struct CertificateCache {
    cache: RwLock<HashMap<String, Arc<CertifiedKey>>>,
    ca: Arc<EphemeralCa>,
}

impl CertificateCache {
    /// Create an empty cache backed by the run's CA.
    pub fn new(ca: Arc<EphemeralCa>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ca,
        }
    }

    /// Get or issue the certificate for `host`.
    pub fn get_or_generate(&self, host: &str) -> Result<Arc<CertifiedKey>, GatewayError> {
        let host_lower = host.to_lowercase();

        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(key) = cache.get(&host_lower) {
                trace!("Certificate cache hit for {}", host);
                return Ok(key.clone());
            }
        }

        let leaf = self.ca.leaf_certificate(&host_lower)?;

        // Leaf first, then the issuing CA.
        let chain_pem = format!("{}{}", leaf.cert_pem, self.ca.cert_pem());
        let cert_chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut chain_pem.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| GatewayError::Tls(format!("Failed to parse certificate PEM: {}", e)))?;

        if cert_chain.is_empty() {
            return Err(GatewayError::Tls("No certificates found in PEM".into()));
        }

        let private_key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut leaf.key_pem.as_bytes())
                .map_err(|e| GatewayError::Tls(format!("Failed to parse private key PEM: {}", e)))?
                .ok_or_else(|| GatewayError::Tls("No private key found in PEM".into()))?;

        let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&private_key)
            .map_err(|e| GatewayError::Tls(format!("Failed to create signing key: {}", e)))?;

        let certified_key = Arc::new(CertifiedKey::new(cert_chain, signing_key));

        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(host_lower)
            .or_insert_with(|| certified_key.clone());

        Ok(certified_key)
    }

    /// Number of cached certificates.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves the server certificate from SNI, falling back to a host hint.
pub struct DynamicCertResolver {
    cache: Arc<CertificateCache>,
    host_hint: Option<String>,
}

impl DynamicCertResolver {
    /// Resolver that relies on SNI only.
    pub fn new(cache: Arc<CertificateCache>) -> Self {
        Self {
            cache,
            host_hint: None,
        }
    }

    /// Resolver that uses `host` when the client sends no SNI.
    pub fn with_host_hint(cache: Arc<CertificateCache>, host: String) -> Self {
        Self {
            cache,
            host_hint: Some(host),
        }
    }
}

impl ResolvesServerCert for DynamicCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let host = client_hello
            .server_name()
            .map(|s| s.to_string())
            .or_else(|| self.host_hint.clone())?;

        match self.cache.get_or_generate(&host) {
            Ok(key) => Some(key),
            Err(e) => {
                error!("Failed to issue certificate for {}: {}", host, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for DynamicCertResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicCertResolver")
            .field("host_hint", &self.host_hint)
            .field("cache_size", &self.cache.len())
            .finish()
    }
}

/// TLS acceptor presenting certificates from `cert_cache`.
pub fn create_tls_acceptor(
    cert_cache: Arc<CertificateCache>,
    host_hint: Option<String>,
) -> Result<TlsAcceptor, GatewayError> {
    let resolver: Arc<dyn ResolvesServerCert> = match host_hint {
        Some(host) => Arc::new(DynamicCertResolver::with_host_hint(cert_cache, host)),
        None => Arc::new(DynamicCertResolver::new(cert_cache)),
    };

    let mut config = ServerConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(resolver);

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// TLS connector for upstream registries, trusting the system roots.
pub fn create_tls_connector() -> Result<TlsConnector, GatewayError> {
    let mut root_store = rustls::RootCertStore::empty();

    let native_certs = rustls_native_certs::load_native_certs();
    for err in native_certs.errors {
        debug!("Warning loading native cert: {}", err);
    }
    for cert in native_certs.certs {
        if let Err(e) = root_store.add(cert) {
            debug!("Warning adding cert to store: {}", e);
        }
    }

    if root_store.is_empty() {
        return Err(GatewayError::Tls("No system root certificates found".into()));
    }

    debug!("Loaded {} root certificates", root_store.len());

    let mut config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()?
        .with_root_certificates(root_store)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Convert a host to a `ServerName` for an upstream handshake.
pub fn host_to_server_name(host: &str) -> Result<ServerName<'static>, GatewayError> {
    ServerName::try_from(host.to_string())
        .map_err(|_| GatewayError::Tls(format!("Invalid server name: {}", host)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::CA_COMMON_NAME;

    fn cache() -> CertificateCache {
        CertificateCache::new(Arc::new(EphemeralCa::issue(CA_COMMON_NAME).unwrap()))
    }

    #[test]
    fn test_certificate_generation_and_caching() {
        let cache = cache();
        assert!(cache.is_empty());

        let key1 = cache.get_or_generate("registry.npmjs.org").unwrap();
        let key2 = cache.get_or_generate("registry.npmjs.org").unwrap();

        assert_eq!(cache.len(), 1);
        assert!(Arc::ptr_eq(&key1, &key2));
        // Leaf plus CA
        assert_eq!(key1.cert.len(), 2);
    }

    #[test]
    fn test_certificate_cache_case_insensitive() {
        let cache = cache();

        cache.get_or_generate("registry.npmjs.org").unwrap();
        cache.get_or_generate("REGISTRY.NPMJS.ORG").unwrap();

        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_certificate_for_ip_literal() {
        let cache = cache();
        assert!(cache.get_or_generate("127.0.0.1").is_ok());
    }

    #[test]
    fn test_create_tls_acceptor() {
        let cache = Arc::new(cache());
        assert!(create_tls_acceptor(cache.clone(), None).is_ok());
        assert!(create_tls_acceptor(cache, Some("127.0.0.1".into())).is_ok());
    }

    #[test]
    fn test_host_to_server_name() {
        assert!(host_to_server_name("registry.npmjs.org").is_ok());
        assert!(host_to_server_name("127.0.0.1").is_ok());
        assert!(host_to_server_name("").is_err());
    }
}
