/// Turns raw service bytes into a printable banner.
///
/// Control characters other than tab and newline are dropped, surrounding
/// whitespace is trimmed and the result is cut to `max_chars`. Returns `None` when
/// nothing printable remains.
pub fn sanitize(bytes: &[u8], max_chars: usize) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(max_chars)
        .collect();

    let trimmed = cleaned.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Guesses the protocol from the first bytes a service volunteers.
pub fn identify(banner: &str) -> Option<&'static str> {
    let protocol = if banner.starts_with("SSH-") {
        "ssh"
    } else if banner.starts_with("HTTP/") {
        "http"
    } else if banner.starts_with("+OK") {
        "pop3"
    } else if banner.starts_with("* OK") {
        "imap"
    } else if banner.starts_with("220") {
        let lower = banner.to_ascii_lowercase();
        if lower.contains("ftp") {
            "ftp"
        } else {
            "smtp"
        }
    } else if banner.starts_with("RFB ") {
        "vnc"
    } else {
        return None;
    };
    Some(protocol)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
