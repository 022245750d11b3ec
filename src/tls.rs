//! TLS transport for educ
//!
//! Uses rustls (ring provider) through tokio-rustls. The client context is
//! built once, when the provider port selects TLS, and shared by every
//! connection until the transport is dropped.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::constants::TLS_VERIFY_DEPTH;
use crate::transport::{
    connect_tcp, Connection, StreamConnection, Transport, TransportError, TransportMode,
    RECEIVE_TIMEOUT,
};

//==============================================================================
// Certificate Verification
//==============================================================================

/// Wraps the webpki verifier to bound the chain depth and log each certificate
///
/// The pass/fail decision is always the inner verifier's.
#[derive(Debug)]
struct ChainVerifier {
    inner: Arc<WebPkiServerVerifier>,
    max_depth: usize,
}

impl ServerCertVerifier for ChainVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        for (depth, cert) in std::iter::once(end_entity).chain(intermediates).enumerate() {
            match describe_certificate(cert.as_ref()) {
                Some((subject, issuer)) => {
                    debug!("depth {}: subject={} issuer={}", depth, subject, issuer)
                }
                None => debug!(
                    "depth {}: unparsable certificate ({} bytes)",
                    depth,
                    cert.as_ref().len()
                ),
            }
        }

        if intermediates.len() > self.max_depth {
            warn!(
                "certificate chain for {} too deep ({} intermediates, max {})",
                server_name.to_str(),
                intermediates.len(),
                self.max_depth
            );
            return Err(rustls::Error::General("certificate chain too deep".to_string()));
        }

        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(verified) => {
                debug!("certificate verification OK for {}", server_name.to_str());
                Ok(verified)
            }
            Err(e) => {
                warn!("certificate verification failed for {}: {}", server_name.to_str(), e);
                Err(e)
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Returns the subject and issuer names of a DER certificate
fn describe_certificate(der: &[u8]) -> Option<(String, String)> {
    let (_, cert) = x509_parser::parse_x509_certificate(der).ok()?;
    Some((cert.subject().to_string(), cert.issuer().to_string()))
}

/// Checks whether a handshake failed because the certificate names another host
fn is_hostname_mismatch(err: &io::Error) -> bool {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
        .is_some_and(|e| {
            matches!(
                e,
                rustls::Error::InvalidCertificate(
                    CertificateError::NotValidForName
                        | CertificateError::NotValidForNameContext { .. }
                )
            )
        })
}

//==============================================================================
// Context
//==============================================================================

/// Loads the platform trust roots
fn load_root_store() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        warn!("error loading default CA certificates: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    debug!("loaded {} trust roots ({} ignored)", added, ignored);
    roots
}

/// Builds the shared client configuration
///
/// Only TLS 1.2 and 1.3 are enabled, and only the provider's default
/// (authenticated, non-null) cipher suites are offered.
pub fn client_config(roots: RootCertStore) -> Result<ClientConfig> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let inner = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider.clone())
        .build()
        .context("build certificate verifier")?;
    let verifier = Arc::new(ChainVerifier {
        inner,
        max_depth: TLS_VERIFY_DEPTH,
    });

    let config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .context("select TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}

//==============================================================================
// TLS Transport
//==============================================================================

/// TLS-protected connections, sharing one client context
pub struct TlsTransport {
    connector: TlsConnector,
}

impl fmt::Debug for TlsTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsTransport").finish_non_exhaustive()
    }
}

impl TlsTransport {
    /// Builds the context with the platform trust roots
    pub fn new() -> Result<Self> {
        let config = client_config(load_root_store())?;
        info!("TLS enabled");
        Ok(Self::with_config(config))
    }

    /// Builds the transport around an existing configuration
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            connector: TlsConnector::from(Arc::new(config)),
        }
    }
}

#[async_trait]
impl Transport for TlsTransport {
    fn mode(&self) -> TransportMode {
        TransportMode::Tls
    }

    async fn connect_addrs(
        &self,
        host: &str,
        addrs: &[SocketAddr],
    ) -> Result<Box<dyn Connection>, TransportError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| TransportError::InvalidServerName(host.to_string()))?;
        let tcp = connect_tcp(host, addrs).await?;

        let handshake = match timeout(RECEIVE_TIMEOUT, self.connector.connect(server_name, tcp)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "handshake timed out")),
        };

        match handshake {
            Ok(stream) => {
                let (_, session) = stream.get_ref();
                debug!(
                    "TLS handshake with {} complete ({:?}, {:?})",
                    host,
                    session.protocol_version(),
                    session.negotiated_cipher_suite().map(|s| s.suite())
                );
                Ok(Box::new(StreamConnection::new(stream, TransportMode::Tls)))
            }
            Err(e) if is_hostname_mismatch(&e) => Err(TransportError::HostnameMismatch {
                host: host.to_string(),
            }),
            Err(source) => Err(TransportError::Handshake {
                host: host.to_string(),
                source,
            }),
        }
    }
}

//==============================================================================
// Tests
//==============================================================================
