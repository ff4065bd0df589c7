//! TLS client plumbing for banner probes.
//!
//! Probes talk to arbitrary hosts by IP, so certificates are never verified: the
//! goal is to record what the peer presents, not to trust it.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, ProtocolVersion, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::extensions::GeneralName;

#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Versions the client offers. rustls has no TLS 1.0/1.1, so peers that only
/// speak those fail the handshake and get no TLS details.
pub const OFFERED_VERSIONS: &str = "TLSv1.2, TLSv1.3";

/// Client configuration that accepts any certificate.
///
/// Only [`OFFERED_VERSIONS`] are negotiated; legacy-only servers are reported as
/// handshake failures.
pub fn client_config() -> anyhow::Result<Arc<ClientConfig>> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .context("selecting TLS protocol versions")?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

pub fn connector() -> anyhow::Result<TlsConnector> {
    Ok(TlsConnector::from(client_config()?))
}

/// SNI for a bare address. rustls sends no SNI extension for IP names.
pub fn server_name(addr: IpAddr) -> ServerName<'static> {
    ServerName::IpAddress(addr.into())
}

pub fn version_name(version: ProtocolVersion) -> String {
    match version {
        ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        ProtocolVersion::TLSv1_1 => "TLSv1.1".to_string(),
        ProtocolVersion::TLSv1_0 => "TLSv1.0".to_string(),
        other => format!("{other:?}"),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateSummary {
    pub common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
}

pub fn summarize_certificate(der: &[u8]) -> anyhow::Result<CertificateSummary> {
    let (_, cert) = x509_parser::parse_x509_certificate(der)
        .map_err(|err| anyhow!("parsing certificate: {err}"))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let subject_alt_names = match cert.subject_alternative_name() {
        Ok(Some(ext)) => ext
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                GeneralName::IPAddress(bytes) => ip_from_bytes(bytes).map(|ip| ip.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(CertificateSummary {
        common_name,
        subject_alt_names,
    })
}

/// Negotiated version and leaf certificate summary of an established session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionInfo {
    pub version: Option<String>,
    pub certificate: Option<CertificateSummary>,
}

pub fn session_info(conn: &ClientConnection) -> SessionInfo {
    let version = conn.protocol_version().map(version_name);
    let certificate = conn
        .peer_certificates()
        .and_then(|chain| chain.first())
        .and_then(|leaf| match summarize_certificate(leaf.as_ref()) {
            Ok(summary) => Some(summary),
            Err(err) => {
                debug!("peer certificate unreadable: {err:#}");
                None
            }
        });
    SessionInfo {
        version,
        certificate,
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes).ok().map(IpAddr::from),
        16 => <[u8; 16]>::try_from(bytes).ok().map(IpAddr::from),
        _ => None,
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn builds_a_client_config() {
        assert!(client_config().is_ok());
        assert!(connector().is_ok());
    }

    #[test]
    fn offers_only_modern_versions() {
        let config = client_config().unwrap();
        assert!(config.supports_version(ProtocolVersion::TLSv1_3));
        assert!(config.supports_version(ProtocolVersion::TLSv1_2));
        assert!(!config.supports_version(ProtocolVersion::TLSv1_1));
        assert!(!config.supports_version(ProtocolVersion::TLSv1_0));
    }

    #[test]
    fn names_protocol_versions() {
        assert_eq!(version_name(ProtocolVersion::TLSv1_3), "TLSv1.3");
        assert_eq!(version_name(ProtocolVersion::TLSv1_2), "TLSv1.2");
    }

    #[test]
    fn ip_server_name() {
        let name = server_name(IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert!(matches!(name, ServerName::IpAddress(_)));
    }

    #[test]
    fn rejects_garbage_certificates() {
        assert!(summarize_certificate(b"not a certificate").is_err());
    }

    #[test]
    fn san_ip_bytes() {
        assert_eq!(
            ip_from_bytes(&[10, 0, 0, 1]),
            Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))
        );
        assert_eq!(ip_from_bytes(&[1, 2, 3]), None);
    }
}
