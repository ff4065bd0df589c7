use thiserror::Error;

const USER_AGENT: &str = concat!("vigil/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HttpParseError {
    #[error("empty response")]
    Empty,
    #[error("not an HTTP response")]
    NotHttp,
}

/// The parts of an HTTP response head a banner cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSummary {
    pub status_line: String,
    pub status: Option<u16>,
    pub server: Option<String>,
}

impl HttpSummary {
    /// `HTTP/1.1 200 OK (nginx/1.25)` style one-liner.
    pub fn banner(&self) -> String {
        match &self.server {
            Some(server) => format!("{} ({})", self.status_line, server),
            None => self.status_line.clone(),
        }
    }
}

/// Minimal HTTP/1.0 request. `Connection: close` so the server ends the stream.
pub fn build_get_request(host: &str) -> Vec<u8> {
    format!(
        "GET / HTTP/1.0\r\nHost: {host}\r\nUser-Agent: {USER_AGENT}\r\nAccept: */*\r\nConnection: close\r\n\r\n"
    )
    .into_bytes()
}

pub fn parse_response(bytes: &[u8]) -> Result<HttpSummary, HttpParseError> {
    let text = String::from_utf8_lossy(bytes);
    let mut lines = text.split("\r\n").flat_map(|line| line.split('\n'));

    let status_line = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or(HttpParseError::Empty)?;

    if !status_line.starts_with("HTTP/") {
        return Err(HttpParseError::NotHttp);
    }

    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok());

    let server = lines
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("server")
                .then(|| value.trim().to_string())
        })
        .filter(|server| !server.is_empty());

    Ok(HttpSummary {
        status_line: status_line.to_string(),
        status,
        server,
    })
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
