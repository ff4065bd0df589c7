//! Port-number heuristics for choosing a banner probe.

/// What to send when a service stays silent after connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStrategy {
    /// Plain HTTP `GET /`.
    Http,
    /// TLS handshake followed by `GET /`.
    Https,
    /// TLS handshake only; capture version and certificate.
    TlsHandshake,
    /// Alternate web ports serve either; try HTTP and fall back to HTTPS.
    HttpThenHttps,
    /// Nothing sensible to send.
    None,
}

const WEB_PORTS: &[u16] = &[80, 81, 591, 2080, 3000, 5000, 8008, 8081, 8088, 9090];
const AMBIGUOUS_WEB_PORTS: &[u16] = &[8000, 8080, 8888, 9000];
const HTTPS_PORTS: &[u16] = &[443, 8443, 9443];
const TLS_PORTS: &[u16] = &[465, 563, 636, 853, 989, 990, 992, 993, 994, 995, 5061, 6697];

pub fn probe_strategy(port: u16) -> ProbeStrategy {
    if WEB_PORTS.contains(&port) {
        ProbeStrategy::Http
    } else if AMBIGUOUS_WEB_PORTS.contains(&port) {
        ProbeStrategy::HttpThenHttps
    } else if HTTPS_PORTS.contains(&port) {
        ProbeStrategy::Https
    } else if TLS_PORTS.contains(&port) {
        ProbeStrategy::TlsHandshake
    } else {
        ProbeStrategy::None
    }
}

/// IANA-ish service name for well-known ports.
pub fn service_name(port: u16) -> Option<&'static str> {
    let name = match port {
        21 => "ftp",
        22 => "ssh",
        23 => "telnet",
        25 | 587 => "smtp",
        53 => "dns",
        80 | 8080 | 8000 | 8008 | 8888 => "http",
        110 => "pop3",
        143 => "imap",
        443 | 8443 => "https",
        445 => "microsoft-ds",
        465 => "smtps",
        636 => "ldaps",
        993 => "imaps",
        995 => "pop3s",
        3306 => "mysql",
        3389 => "ms-wbt-server",
        5432 => "postgresql",
        6379 => "redis",
        _ => return None,
    };
    Some(name)
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

    #[test]
    fn picks_strategy_by_port() {
        assert_eq!(probe_strategy(80), ProbeStrategy::Http);
        assert_eq!(probe_strategy(8080), ProbeStrategy::HttpThenHttps);
        assert_eq!(probe_strategy(443), ProbeStrategy::Https);
        assert_eq!(probe_strategy(993), ProbeStrategy::TlsHandshake);
        assert_eq!(probe_strategy(22), ProbeStrategy::None);
    }

    #[test]
    fn port_lists_do_not_overlap() {
        let lists = [WEB_PORTS, AMBIGUOUS_WEB_PORTS, HTTPS_PORTS, TLS_PORTS];
        for (i, a) in lists.iter().enumerate() {
            for b in lists.iter().skip(i + 1) {
                assert!(a.iter().all(|port| !b.contains(port)));
            }
        }
    }
}
