//! Port list grammar: `"22"`, `"1-1024"`, `"22,80,8000-8100"`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Ports probed when nothing else is configured.
pub const TOP_PORTS: &[u16] = &[
    21, 22, 23, 25, 53, 80, 110, 111, 135, 139, 143, 389, 443, 445, 465, 587, 636, 993, 995,
    1433, 1521, 2049, 3000, 3306, 3389, 5000, 5432, 5900, 6379, 8000, 8080, 8443, 8888, 9000,
    9200, 27017,
];

/// A sorted, de-duplicated set of TCP ports.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PortList(Vec<u16>);

impl PortList {
    pub fn top() -> Self {
        TOP_PORTS.iter().copied().collect()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<u16> for PortList {
    fn from_iter<T: IntoIterator<Item = u16>>(iter: T) -> Self {
        let set: BTreeSet<u16> = iter.into_iter().collect();
        Self(set.into_iter().collect())
    }
}

impl FromStr for PortList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut ports: BTreeSet<u16> = BTreeSet::new();

        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.split_once('-') {
                Some((start, end)) => {
                    let start = parse_port(start.trim(), s)?;
                    let end = parse_port(end.trim(), s)?;
                    if end < start {
                        return Err(invalid(s, &format!("range `{part}` ends before it starts")));
                    }
                    ports.extend(start..=end);
                }
                None => {
                    ports.insert(parse_port(part, s)?);
                }
            }
        }

        if ports.is_empty() {
            return Err(invalid(s, "no ports given"));
        }
        Ok(Self(ports.into_iter().collect()))
    }
}

impl fmt::Display for PortList {
    /// Renders back to the compact grammar, collapsing consecutive runs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        let mut iter = self.0.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while let Some(&next) = iter.peek() {
                if next != end + 1 {
                    break;
                }
                end = next;
                iter.next();
            }
            if start == end {
                parts.push(start.to_string());
            } else {
                parts.push(format!("{start}-{end}"));
            }
        }
        write!(f, "{}", parts.join(","))
    }
}

fn parse_port(s: &str, original: &str) -> Result<u16, ConfigError> {
    let port: u16 = s
        .parse()
        .map_err(|e| invalid(original, &format!("`{s}` is not a port: {e}")))?;
    if port == 0 {
        return Err(invalid(original, "port 0 is not scannable"));
    }
    Ok(port)
}

fn invalid(input: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidPorts {
        input: input.to_string(),
        reason: reason.to_string(),
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

    #[test]
    fn parses_singles_and_ranges() {
        let ports: PortList = "443, 1-3,22,2".parse().unwrap();
        assert_eq!(ports.as_slice(), &[1, 2, 3, 22, 443]);
    }

    #[test]
    fn full_range_has_expected_size() {
        let ports: PortList = "1-100".parse().unwrap();
        assert_eq!(ports.len(), 100);
    }

    #[test]
    fn rejects_bad_expressions() {
        assert!("0".parse::<PortList>().is_err());
        assert!("65536".parse::<PortList>().is_err());
        assert!("100-1".parse::<PortList>().is_err());
        assert!("http".parse::<PortList>().is_err());
        assert!("".parse::<PortList>().is_err());
    }

    #[test]
    fn display_collapses_runs() {
        let ports: PortList = "22,80,81,82,443".parse().unwrap();
        assert_eq!(ports.to_string(), "22,80-82,443");
    }
}
