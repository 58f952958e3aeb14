//! TLS and QUIC transport configuration

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tether_core::config::{NodeConfig, TlsSettings};

use crate::error::NodeError;

/// ALPN protocol spoken on control connections
pub const ALPN: &[u8] = b"tether/1";

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

/// Install the ring crypto provider as the process default, once
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

/// Certificate material and verification policy for a node
///
/// The identity (certificate chain and key) is only needed to accept
/// connections. Dialing verifies the peer against `roots`, falling back to
/// the web PKI roots when none are configured.
#[derive(Debug, Default)]
pub struct TlsConfig {
    certs: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    roots: Vec<CertificateDer<'static>>,
    server_name: Option<String>,
    skip_verify: bool,
}

impl TlsConfig {
    /// Dial-only configuration using the web PKI roots
    pub fn new() -> Self {
        Self::default()
    }

    /// Certificate chain and key presented when accepting connections
    pub fn with_identity(
        mut self,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Self {
        self.certs = certs;
        self.key = Some(key);
        self
    }

    /// Trust these roots instead of the web PKI roots when dialing
    pub fn with_roots(mut self, roots: Vec<CertificateDer<'static>>) -> Self {
        self.roots = roots;
        self
    }

    /// Name to verify the peer certificate against when dialing
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Accept any server certificate when dialing
    pub fn with_skip_verify(mut self, skip: bool) -> Self {
        self.skip_verify = skip;
        self
    }

    /// Load PEM files named in the configuration
    pub fn load(settings: &TlsSettings) -> Result<Self, NodeError> {
        let mut tls = Self::new().with_skip_verify(settings.skip_verify);

        match (&settings.cert, &settings.private_key) {
            (Some(cert), Some(key)) => {
                tls = tls.with_identity(load_certs(cert)?, load_private_key(key)?);
            }
            (None, None) => {}
            _ => {
                return Err(NodeError::Tls(
                    "cert and private_key must be set together".to_string(),
                ))
            }
        }
        if let Some(ca) = &settings.ca {
            tls = tls.with_roots(load_certs(ca)?);
        }
        if let Some(name) = &settings.server_name {
            tls = tls.with_server_name(name.clone());
        }
        Ok(tls)
    }

    /// True when a certificate and key are available for accepting
    pub fn has_identity(&self) -> bool {
        self.key.is_some() && !self.certs.is_empty()
    }

    /// Server name used when dialing `address` (`host:port`)
    pub fn server_name_for(&self, address: &str) -> String {
        if let Some(name) = &self.server_name {
            return name.clone();
        }
        let host = match address.rsplit_once(':') {
            Some((host, _)) => host,
            None => address,
        };
        host.trim_start_matches('[').trim_end_matches(']').to_string()
    }

    /// Build the quinn server configuration
    pub fn server_config(&self, node: &NodeConfig) -> Result<quinn::ServerConfig, NodeError> {
        ensure_crypto_provider();

        let key = self
            .key
            .as_ref()
            .ok_or_else(|| NodeError::Tls("a certificate and key are required to listen".to_string()))?;
        if self.certs.is_empty() {
            return Err(NodeError::Tls("certificate chain is empty".to_string()));
        }

        let mut crypto = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.certs.clone(), key.clone_key())
            .map_err(|e| NodeError::Tls(format!("Invalid cert/key: {}", e)))?;
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        let crypto = QuicServerConfig::try_from(crypto).map_err(|e| NodeError::Tls(e.to_string()))?;
        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(crypto));
        server_config.transport_config(Arc::new(transport_config(node)?));
        Ok(server_config)
    }

    /// Build the quinn client configuration
    pub fn client_config(&self, node: &NodeConfig) -> Result<quinn::ClientConfig, NodeError> {
        ensure_crypto_provider();

        let mut crypto = if self.skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            if self.roots.is_empty() {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            } else {
                for cert in &self.roots {
                    roots
                        .add(cert.clone())
                        .map_err(|e| NodeError::Tls(format!("Invalid root cert: {}", e)))?;
                }
            }
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };
        crypto.alpn_protocols = vec![ALPN.to_vec()];

        let crypto = QuicClientConfig::try_from(crypto).map_err(|e| NodeError::Tls(e.to_string()))?;
        let mut client_config = quinn::ClientConfig::new(Arc::new(crypto));
        client_config.transport_config(Arc::new(transport_config(node)?));
        Ok(client_config)
    }
}

/// Keep-alive at the heartbeat deadline, idle timeout at twice that
fn transport_config(node: &NodeConfig) -> Result<quinn::TransportConfig, NodeError> {
    let idle = quinn::IdleTimeout::try_from(node.idle_timeout())
        .map_err(|_| NodeError::Tls("idle timeout out of range".to_string()))?;

    let mut transport = quinn::TransportConfig::default();
    transport.keep_alive_interval(Some(node.max_heartbeat_interval));
    transport.max_idle_timeout(Some(idle));
    Ok(transport)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, NodeError> {
    let file = File::open(path)
        .map_err(|e| NodeError::Tls(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NodeError::Tls(format!("Failed to parse certs: {}", e)))?;
    if certs.is_empty() {
        return Err(NodeError::Tls(format!(
            "No certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, NodeError> {
    let file = File::open(path)
        .map_err(|e| NodeError::Tls(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| NodeError::Tls(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| NodeError::Tls(format!("No private key found in {}", path.display())))
}

// Accepts every server certificate. Only reachable through `skip_verify`.
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::PrivatePkcs8KeyDer;

    fn self_signed() -> TlsConfig {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
            certified.key_pair.serialize_der(),
        ));
        TlsConfig::new().with_identity(vec![certified.cert.der().clone()], key)
    }

    #[test]
    fn test_server_name_for() {
        let tls = TlsConfig::new();
        assert_eq!(tls.server_name_for("ctrl.example.com:6543"), "ctrl.example.com");
        assert_eq!(tls.server_name_for("[::1]:6543"), "::1");
        assert_eq!(tls.server_name_for("localhost"), "localhost");

        let tls = tls.with_server_name("pinned");
        assert_eq!(tls.server_name_for("127.0.0.1:6543"), "pinned");
    }

    #[test]
    fn test_server_config_requires_identity() {
        let err = TlsConfig::new()
            .server_config(&NodeConfig::default())
            .unwrap_err();
        assert!(matches!(err, NodeError::Tls(_)));
    }

    #[test]
    fn test_builds_both_sides() {
        let tls = self_signed();
        assert!(tls.has_identity());
        assert!(tls.server_config(&NodeConfig::default()).is_ok());
        assert!(tls.client_config(&NodeConfig::default()).is_ok());
        assert!(TlsConfig::new()
            .with_skip_verify(true)
            .client_config(&NodeConfig::default())
            .is_ok());
    }

    #[test]
    fn test_load_rejects_half_identity() {
        let settings = TlsSettings {
            cert: Some("/nonexistent/cert.pem".into()),
            ..Default::default()
        };
        assert!(matches!(TlsConfig::load(&settings), Err(NodeError::Tls(_))));
    }

    #[test]
    fn test_load_missing_file() {
        let settings = TlsSettings {
            cert: Some("/nonexistent/cert.pem".into()),
            private_key: Some("/nonexistent/key.pem".into()),
            ..Default::default()
        };
        assert!(matches!(TlsConfig::load(&settings), Err(NodeError::Tls(_))));
    }
}
