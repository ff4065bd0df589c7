//! Banner acquisition for discovered open ports.
//!
//! Each (target, port) unit first waits for the service to speak. Silent services
//! get a probe picked by [`probe_strategy`]: an HTTP `GET`, a TLS handshake, or
//! HTTP with an HTTPS fallback. TLS sessions record the negotiated version and the
//! leaf certificate names even when no application banner comes back.

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vigil_common::config::{ConfigError, ModuleConfig};
use vigil_core::pool::PoolError;
use vigil_core::{
    BannerRecord, DataContractEntry, Module, ModuleError, ModuleInputs, ModuleKind,
    ModuleMetadata, OutputSink, TaskPool, TlsDetails, ValueType,
};
use vigil_protocols::services::{ProbeStrategy, probe_strategy, service_name};
use vigil_protocols::{banner, http, tls};

use crate::keys;

pub const MODULE_TYPE: &str = "banner_grab";

const DEFAULT_CONCURRENCY: usize = 32;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(1000);
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2000);
const DEFAULT_MAX_BYTES: usize = 1024;

#[derive(Debug, Clone)]
struct BannerSettings {
    concurrency: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    send_probes: bool,
    max_bytes: usize,
}

impl BannerSettings {
    fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        let read_timeout = config.duration_ms_or(
            "read_timeout_ms",
            config.duration_ms_or("timeout_ms", DEFAULT_READ_TIMEOUT)?,
        )?;
        Ok(Self {
            concurrency: config.positive_or("concurrency", DEFAULT_CONCURRENCY)?,
            connect_timeout: config.duration_ms_or("connect_timeout_ms", DEFAULT_CONNECT_TIMEOUT)?,
            read_timeout,
            send_probes: config.bool_or("send_probes", true)?,
            max_bytes: config.positive_or("max_bytes", DEFAULT_MAX_BYTES)?,
        })
    }
}

pub struct BannerGrab {
    meta: ModuleMetadata,
    settings: Option<BannerSettings>,
}

impl BannerGrab {
    pub fn new() -> Self {
        Self {
            meta: Self::describe(),
            settings: None,
        }
    }

    pub fn describe() -> ModuleMetadata {
        ModuleMetadata::new(MODULE_TYPE, "0.1.0", ModuleKind::Scan)
            .describe("Reads service banners, probing HTTP and TLS where the port suggests it")
            .tag("scan")
            .tag("fingerprint")
            .consumes(DataContractEntry::list(keys::OPEN_PORTS, ValueType::OpenPorts))
            .produces(DataContractEntry::list(keys::BANNERS, ValueType::Banner))
            .config_key("concurrency", "ports grabbed at once (default 32)")
            .config_key("connect_timeout_ms", "connect timeout (default 1000)")
            .config_key("read_timeout_ms", "read and handshake timeout (default 2000)")
            .config_key("send_probes", "send HTTP/TLS probes to silent services (default true)")
            .config_key("max_bytes", "banner size limit (default 1024)")
    }
}

impl Default for BannerGrab {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for BannerGrab {
    fn metadata(&self) -> &ModuleMetadata {
        &self.meta
    }

    fn init(&mut self, _instance_id: &str, config: &ModuleConfig) -> Result<(), ModuleError> {
        self.settings = Some(BannerSettings::from_config(config)?);
        Ok(())
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        inputs: ModuleInputs,
        sink: OutputSink,
    ) -> Result<(), ModuleError> {
        let settings = self
            .settings
            .clone()
            .ok_or_else(|| ConfigError::Missing("init was not called".to_string()))?;

        let units: Vec<(IpAddr, u16)> = inputs
            .list(keys::OPEN_PORTS)
            .iter()
            .filter_map(|value| value.as_open_ports())
            .flat_map(|open| open.ports.iter().map(move |&port| (open.target, port)))
            .collect();

        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }
        if units.is_empty() {
            info!("no open ports to grab");
            return Ok(());
        }

        let connector = if settings.send_probes {
            Some(tls::connector()?)
        } else {
            None
        };

        info!(units = units.len(), concurrency = settings.concurrency, "grabbing banners");

        let records: Arc<Mutex<Vec<BannerRecord>>> = Arc::new(Mutex::new(Vec::with_capacity(units.len())));
        let pool = TaskPool::new(settings.concurrency);
        let mut dispatched: usize = 0;

        for &(target, port) in &units {
            let records = Arc::clone(&records);
            let settings = settings.clone();
            let connector = connector.clone();
            let token = cancel.clone();

            let task = async move {
                let record = tokio::select! {
                    _ = token.cancelled() => return,
                    record = grab(target, port, &settings, connector.as_ref()) => record,
                };
                debug!(target_addr = %target, port, found = !record.is_empty(), "banner attempt finished");
                records
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(record);
            };

            match pool.submit(&cancel, task).await {
                Ok(()) => dispatched += 1,
                Err(PoolError::Cancelled) | Err(PoolError::Closed) => break,
            }
        }

        pool.join().await;

        if dispatched == 0 {
            return Err(ModuleError::Cancelled);
        }

        let mut records = std::mem::take(&mut *records.lock().unwrap_or_else(PoisonError::into_inner));
        records.sort_by_key(|record| (record.target, record.port));
        let found = records.iter().filter(|record| !record.is_empty()).count();
        for record in records {
            sink.emit_for(SocketAddr::new(record.target, record.port), keys::BANNERS, record);
        }

        info!(found, attempted = dispatched, "banner grabbing finished");
        Ok(())
    }
}

/// One banner attempt. Every failure yields an empty record.
async fn grab(
    target: IpAddr,
    port: u16,
    settings: &BannerSettings,
    connector: Option<&TlsConnector>,
) -> BannerRecord {
    grab_with(target, port, probe_strategy(port), settings, connector).await
}

/// Reads a greeting, then falls back to `strategy` when the service stays silent
/// and a connector is available.
async fn grab_with(
    target: IpAddr,
    port: u16,
    strategy: ProbeStrategy,
    settings: &BannerSettings,
    connector: Option<&TlsConnector>,
) -> BannerRecord {
    let mut record = BannerRecord::empty(target, port);
    let addr = SocketAddr::new(target, port);

    let Some(mut stream) = connect(addr, settings.connect_timeout).await else {
        return record;
    };

    let greeting = read_some(&mut stream, settings.max_bytes, settings.read_timeout, false).await;
    if let Some(text) = banner::sanitize(&greeting, settings.max_bytes) {
        record.protocol = banner::identify(&text)
            .or_else(|| service_name(port))
            .map(str::to_string);
        record.banner = Some(text);
        return record;
    }

    let Some(connector) = connector else {
        return record;
    };

    match strategy {
        ProbeStrategy::Http => {
            if let Some(text) = http_exchange(&mut stream, target, settings).await {
                record.banner = Some(text);
                record.protocol = Some("http".to_string());
            }
        }
        ProbeStrategy::HttpThenHttps => {
            let plain = http_exchange(&mut stream, target, settings).await;
            drop(stream);
            match plain {
                Some(text) => {
                    record.banner = Some(text);
                    record.protocol = Some("http".to_string());
                }
                None => {
                    let (text, details) = tls_exchange(addr, connector, settings, true).await;
                    apply_tls(&mut record, text, details, "https");
                }
            }
        }
        ProbeStrategy::Https => {
            drop(stream);
            let (text, details) = tls_exchange(addr, connector, settings, true).await;
            apply_tls(&mut record, text, details, "https");
        }
        ProbeStrategy::TlsHandshake => {
            drop(stream);
            let (text, details) = tls_exchange(addr, connector, settings, false).await;
            apply_tls(&mut record, text, details, service_name(port).unwrap_or("tls"));
        }
        ProbeStrategy::None => {}
    }

    record
}

fn apply_tls(
    record: &mut BannerRecord,
    text: Option<String>,
    details: Option<TlsDetails>,
    protocol: &str,
) {
    if text.is_some() || details.is_some() {
        record.protocol = Some(protocol.to_string());
    }
    record.banner = text;
    record.tls = details;
}

async fn connect(addr: SocketAddr, timeout: Duration) -> Option<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Some(stream),
        Ok(Err(err)) => {
            debug!(%addr, error = %err, "banner connect failed");
            None
        }
        Err(_elapsed) => None,
    }
}

/// Reads until `max` bytes, end of stream, the end of an HTTP header block (when
/// `until_headers`), or `wait` elapses. A bare greeting ends at its first read.
async fn read_some<S>(stream: &mut S, max: usize, wait: Duration, until_headers: bool) -> Vec<u8>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::with_capacity(max.min(4096));
    let mut chunk = [0u8; 1024];

    let _ = tokio::time::timeout(wait, async {
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if buf.len() >= max || !until_headers {
                        break;
                    }
                    if buf.windows(4).any(|window| window == b"\r\n\r\n") {
                        break;
                    }
                }
            }
        }
    })
    .await;

    buf.truncate(max);
    buf
}

async fn http_exchange<S>(stream: &mut S, target: IpAddr, settings: &BannerSettings) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = http::build_get_request(&target.to_string());
    match tokio::time::timeout(settings.read_timeout, stream.write_all(&request)).await {
        Ok(Ok(())) => {}
        _ => return None,
    }

    let response = read_some(stream, settings.max_bytes, settings.read_timeout, true).await;
    match http::parse_response(&response) {
        Ok(summary) => banner::sanitize(summary.banner().as_bytes(), settings.max_bytes),
        Err(err) => {
            debug!(target_addr = %target, error = %err, "no HTTP answer");
            None
        }
    }
}

/// Handshakes on a fresh connection. Returns the HTTP banner (when `send_http`)
/// and whatever the handshake revealed.
async fn tls_exchange(
    addr: SocketAddr,
    connector: &TlsConnector,
    settings: &BannerSettings,
    send_http: bool,
) -> (Option<String>, Option<TlsDetails>) {
    let Some(tcp) = connect(addr, settings.connect_timeout).await else {
        return (None, None);
    };

    let mut session = match tokio::time::timeout(
        settings.read_timeout,
        connector.connect(tls::server_name(addr.ip()), tcp),
    )
    .await
    {
        Ok(Ok(session)) => session,
        Ok(Err(err)) => {
            debug!(
                %addr,
                error = %err,
                offered = tls::OFFERED_VERSIONS,
                "TLS handshake failed"
            );
            return (None, None);
        }
        Err(_elapsed) => return (None, None),
    };

    let info = tls::session_info(session.get_ref().1);
    let (common_name, subject_alt_names) = match info.certificate {
        Some(cert) => (cert.common_name, cert.subject_alt_names),
        None => (None, Vec::new()),
    };
    let details = TlsDetails {
        version: info.version,
        common_name,
        subject_alt_names,
    };

    let text = if send_http {
        http_exchange(&mut session, addr.ip(), settings).await
    } else {
        None
    };

    (text, Some(details))
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
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_rustls::TlsAcceptor;
    use tokio_rustls::rustls::ServerConfig;
    use tokio_rustls::rustls::crypto::ring;
    use tokio_rustls::rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use vigil_core::{AggregatedValue, DataValue, OpenPorts};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn settings() -> BannerSettings {
        BannerSettings {
            concurrency: 4,
            connect_timeout: Duration::from_millis(500),
            read_timeout: Duration::from_millis(300),
            send_probes: true,
            max_bytes: 256,
        }
    }

    async fn greeting_server(greeting: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(greeting).await;
            }
        });
        port
    }

    /// Loopback TLS service with a self-signed `vigil.test` certificate. Never
    /// speaks first; answers one HTTP request after the handshake.
    async fn tls_server() -> u16 {
        let mut params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
        let mut name = DistinguishedName::new();
        name.push(DnType::CommonName, "vigil.test");
        params.distinguished_name = name;
        let key_pair = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut session) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut request = [0u8; 512];
                    if matches!(session.read(&mut request).await, Ok(n) if n > 0) {
                        let _ = session
                            .write_all(b"HTTP/1.1 200 OK\r\nServer: tls-httpd\r\n\r\n")
                            .await;
                        let _ = session.shutdown().await;
                    }
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn handshake_captures_certificate_of_silent_tls_service() {
        let port = tls_server().await;
        let connector = tls::connector().unwrap();

        let record = grab_with(
            LOCALHOST,
            port,
            ProbeStrategy::TlsHandshake,
            &settings(),
            Some(&connector),
        )
        .await;

        assert!(record.banner.is_none());
        assert!(record.protocol.is_some());
        let details = record.tls.unwrap();
        assert_eq!(details.version.as_deref(), Some("TLSv1.3"));
        assert_eq!(details.common_name.as_deref(), Some("vigil.test"));
        assert_eq!(details.subject_alt_names, vec!["localhost", "127.0.0.1"]);
    }

    #[tokio::test]
    async fn tls_only_listener_falls_back_to_https() {
        let port = tls_server().await;
        let connector = tls::connector().unwrap();

        let record = grab_with(
            LOCALHOST,
            port,
            ProbeStrategy::HttpThenHttps,
            &settings(),
            Some(&connector),
        )
        .await;

        assert_eq!(record.protocol.as_deref(), Some("https"));
        assert_eq!(record.banner.as_deref(), Some("HTTP/1.1 200 OK (tls-httpd)"));
        assert_eq!(
            record.tls.and_then(|details| details.common_name).as_deref(),
            Some("vigil.test")
        );
    }

    #[tokio::test]
    async fn https_against_plain_listener_stays_empty() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut request = [0u8; 512];
                    let _ = stream.read(&mut request).await;
                });
            }
        });
        let connector = tls::connector().unwrap();

        let record =
            grab_with(LOCALHOST, port, ProbeStrategy::Https, &settings(), Some(&connector)).await;
        assert!(record.is_empty());
        assert!(record.protocol.is_none());
    }

    #[test]
    fn failed_tls_leaves_protocol_unset() {
        let mut record = BannerRecord::empty(LOCALHOST, 443);
        apply_tls(&mut record, None, None, "https");
        assert!(record.protocol.is_none());
        assert!(record.banner.is_none());
        assert!(record.tls.is_none());

        let details = TlsDetails {
            version: Some("TLSv1.2".to_string()),
            common_name: None,
            subject_alt_names: Vec::new(),
        };
        apply_tls(&mut record, None, Some(details), "https");
        assert_eq!(record.protocol.as_deref(), Some("https"));
    }

    #[tokio::test]
    async fn reads_a_volunteered_greeting() {
        let port = greeting_server(b"SSH-2.0-OpenSSH_9.6\r\n").await;
        let record = grab(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &settings(), None).await;
        assert_eq!(record.banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
        assert_eq!(record.protocol.as_deref(), Some("ssh"));
        assert!(record.tls.is_none());
    }

    #[tokio::test]
    async fn http_exchange_summarises_the_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut request = [0u8; 512];
                let _ = stream.read(&mut request).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nServer: test-httpd\r\n\r\nhello")
                    .await;
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let text = http_exchange(&mut stream, addr.ip(), &settings()).await;
        assert_eq!(text.as_deref(), Some("HTTP/1.1 200 OK (test-httpd)"));
    }

    #[tokio::test]
    async fn silent_port_yields_an_empty_record() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let started = tokio::time::Instant::now();
        let record = grab(IpAddr::V4(Ipv4Addr::LOCALHOST), port, &settings(), None).await;
        assert!(record.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn emits_one_record_per_unit_in_order() {
        let ssh = greeting_server(b"SSH-2.0-test\r\n").await;
        let ftp = greeting_server(b"220 FTP ready\r\n").await;
        let target = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let mut values = BTreeMap::new();
        values.insert(
            keys::OPEN_PORTS.to_string(),
            AggregatedValue::List(vec![DataValue::from(OpenPorts {
                target,
                ports: vec![ftp.max(ssh), ftp.min(ssh)],
            })]),
        );

        let mut module = BannerGrab::new();
        module
            .init("banner", &ModuleConfig::new().with("read_timeout_ms", 300))
            .unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        module
            .execute(CancellationToken::new(), ModuleInputs::new(values), OutputSink::new("banner", tx))
            .await
            .unwrap();

        let mut ports = Vec::new();
        while let Ok(output) = rx.try_recv() {
            let record = output.data.as_ref().and_then(DataValue::as_banner).unwrap().clone();
            assert!(record.banner.is_some());
            ports.push(record.port);
        }
        assert_eq!(ports, vec![ftp.min(ssh), ftp.max(ssh)]);
    }

    #[tokio::test]
    #[ignore]
    async fn captures_tls_details_from_public_host() {
        let record = grab(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 443, &settings(), Some(&tls::connector().unwrap())).await;
        let details = record.tls.unwrap();
        assert!(details.version.is_some());
        assert!(!details.subject_alt_names.is_empty());
    }
}
