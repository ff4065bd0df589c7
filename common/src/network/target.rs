//! # Scan Target Model
//!
//! Parses and expands target expressions, which can be:
//! * A single IPv4 or IPv6 address (host).
//! * An IPv4 range (e.g., `192.168.1.1-100`).
//! * A CIDR block (e.g., `192.168.1.0/24`).
//! * A comma separated list of any of the above.

use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use tracing::debug;

use crate::config::ConfigError;
use crate::network::range::{self, IpCollection, Ipv4Range};

/// Represents a distinct target to be scanned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// A single specific host.
    Host { target_addr: IpAddr },
    /// An explicit range of IPv4 addresses, both ends included.
    Range { ipv4_range: Ipv4Range },
    /// A CIDR block. Kept apart from `Range` so expansion can drop the
    /// network and broadcast addresses.
    Network { addr: Ipv4Addr, prefix: u8 },
    /// Holds a list of different targets
    Multi { targets: Vec<Target> },
}

/// Largest number of addresses a target list may expand to (one `/16`).
pub const DEFAULT_MAX_HOSTS: usize = 1 << 16;

/// Controls how targets are turned into concrete addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandOptions {
    pub allow_loopback: bool,
    pub skip_network_broadcast: bool,
    /// Upper bound on the expanded size, checked before any address is built.
    pub max_hosts: usize,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            allow_loopback: true,
            skip_network_broadcast: true,
            max_hosts: DEFAULT_MAX_HOSTS,
        }
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    /// Parses a string into a `Target`.
    ///
    /// Supported formats:
    /// * **Host**: Single IPv4/IPv6 address (e.g., "192.168.1.5").
    /// * **Range**: "Start-End" (e.g., "192.168.1.1-50", "192.168.1.1-192.168.1.50").
    /// * **CIDR**: "Network/Prefix" (e.g., "192.168.1.0/24").
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();

        if s.contains(',') {
            return parse_commas(s);
        }

        if let Some(target) = parse_host(s) {
            return Ok(target);
        }

        if let Some(target) = parse_ip_range(s)? {
            return Ok(target);
        }

        if let Some(target) = parse_cidr_range(s)? {
            return Ok(target);
        }

        Err(invalid(s, "expected an address, a range or a CIDR block"))
    }
}

impl Target {
    /// Upper bound on the number of addresses this target expands to.
    pub fn size_hint(&self) -> u64 {
        match self {
            Target::Host { .. } => 1,
            Target::Range { ipv4_range } => ipv4_range.len() as u64,
            Target::Network { prefix, .. } => 1u64 << (32 - u32::from((*prefix).min(32))),
            Target::Multi { targets } => targets.iter().map(Target::size_hint).sum(),
        }
    }

    /// Expands this target into a de-duplicated address collection.
    pub fn expand(&self, opts: ExpandOptions) -> Result<IpCollection, ConfigError> {
        if self.size_hint() > opts.max_hosts as u64 {
            return Err(ConfigError::OutOfRange {
                key: "max_hosts".to_string(),
                reason: format!("target expands past {} addresses", opts.max_hosts),
            });
        }
        let mut collection = IpCollection::new();
        resolve_target(self, opts, &mut collection)?;
        if !opts.allow_loopback {
            collection.retain(|addr| !addr.is_loopback());
        }
        Ok(collection)
    }
}

/// Parses a list of target expressions and checks their combined size against
/// `opts.max_hosts` without building any address.
pub fn parse_all<S: AsRef<str>>(
    inputs: &[S],
    opts: ExpandOptions,
) -> Result<Vec<Target>, ConfigError> {
    let mut total: u64 = 0;
    let mut targets = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        let target: Target = input.parse()?;
        total = total.saturating_add(target.size_hint());
        if total > opts.max_hosts as u64 {
            return Err(invalid(
                input,
                &format!("target list expands past {} addresses", opts.max_hosts),
            ));
        }
        targets.push(target);
    }
    Ok(targets)
}

/// Parses and expands a list of target expressions in order.
pub fn expand_all<S: AsRef<str>>(
    inputs: &[S],
    opts: ExpandOptions,
) -> Result<IpCollection, ConfigError> {
    let mut collection = IpCollection::new();
    for target in parse_all(inputs, opts)? {
        resolve_target(&target, opts, &mut collection)?;
    }
    if !opts.allow_loopback {
        collection.retain(|addr| !addr.is_loopback());
    }

    let len: usize = collection.len();
    debug!(addresses = len, "expanded target expressions");
    Ok(collection)
}

fn resolve_target(
    target: &Target,
    opts: ExpandOptions,
    collection: &mut IpCollection,
) -> Result<(), ConfigError> {
    match target {
        Target::Host { target_addr } => collection.add_single(*target_addr),
        Target::Range { ipv4_range } => collection.add_range(*ipv4_range),
        Target::Network { addr, prefix } => {
            let range = if opts.skip_network_broadcast {
                range::usable_range(*addr, *prefix)?
            } else {
                range::cidr_range(*addr, *prefix)?
            };
            collection.add_range(range);
        }
        Target::Multi { targets } => {
            for target in targets {
                resolve_target(target, opts, collection)?;
            }
        }
    }
    Ok(())
}

/// Parses a comma-separated list of targets (e.g., "192.168.1.5, 10.0.0.1-50").
pub fn parse_commas(s: &str) -> Result<Target, ConfigError> {
    let targets = s
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(Target::from_str)
        .collect::<Result<Vec<Target>, _>>()?;

    if targets.is_empty() {
        return Err(invalid(s, "empty target list"));
    }
    Ok(Target::Multi { targets })
}

fn parse_host(s: &str) -> Option<Target> {
    s.parse::<IpAddr>()
        .ok()
        .map(|target_addr| Target::Host { target_addr })
}

/// Parses a range string like "1.1.1.1-2.2.2.2" or "1.1.1.1-50".
fn parse_ip_range(s: &str) -> Result<Option<Target>, ConfigError> {
    let Some((start_str, end_str)) = s.split_once('-') else {
        return Ok(None);
    };

    let start_addr = start_str
        .parse::<Ipv4Addr>()
        .map_err(|e| invalid(s, &format!("invalid start address `{start_str}`: {e}")))?;

    let end_addr = parse_range_end_addr(end_str, &start_addr, s)?;
    if u32::from(end_addr) < u32::from(start_addr) {
        return Err(invalid(s, "range ends before it starts"));
    }

    let ipv4_range = Ipv4Range::new(start_addr, end_addr);
    Ok(Some(Target::Range { ipv4_range }))
}

/// Handles abbreviated forms like "192.168.1.1-50" (implies 192.168.1.50)
/// and full forms like "192.168.1.1-192.168.1.255".
fn parse_range_end_addr(
    end_str: &str,
    start_addr: &Ipv4Addr,
    original_s: &str,
) -> Result<Ipv4Addr, ConfigError> {
    if let Ok(full_addr) = end_str.parse::<Ipv4Addr>() {
        return Ok(full_addr);
    }

    if end_str.is_empty() {
        return Err(invalid(original_s, "range end cannot be empty"));
    }

    let partial_octets: Vec<u8> = end_str
        .split('.')
        .map(|octet_str| octet_str.parse::<u8>())
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|e| invalid(original_s, &format!("invalid range end `{end_str}`: {e}")))?;

    if partial_octets.len() > 4 {
        return Err(invalid(original_s, "range end has too many octets"));
    }

    let mut end_octets = start_addr.octets();
    let start_index = 4 - partial_octets.len();
    end_octets[start_index..].copy_from_slice(&partial_octets);

    Ok(Ipv4Addr::from(end_octets))
}

/// Parses CIDR notation like "192.168.1.0/24".
fn parse_cidr_range(s: &str) -> Result<Option<Target>, ConfigError> {
    let Some((ip_str, prefix_str)) = s.split_once('/') else {
        return Ok(None);
    };

    let addr = ip_str
        .parse::<Ipv4Addr>()
        .map_err(|e| invalid(s, &format!("invalid network address `{ip_str}`: {e}")))?;

    let prefix = prefix_str
        .parse::<u8>()
        .map_err(|e| invalid(s, &format!("invalid prefix `{prefix_str}`: {e}")))?;

    if prefix > 32 {
        return Err(invalid(s, "prefix must be between 0 and 32"));
    }

    Ok(Some(Target::Network { addr, prefix }))
}

fn invalid(input: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidTarget {
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
