use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};

use pnet::ipnetwork::Ipv4Network;

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Range {
    pub start_addr: Ipv4Addr,
    pub end_addr: Ipv4Addr,
}

impl Ipv4Range {
    pub fn new(start_addr: Ipv4Addr, end_addr: Ipv4Addr) -> Self {
        Self {
            start_addr,
            end_addr,
        }
    }

    /// Number of addresses in the range; zero when `end < start`.
    pub fn len(&self) -> usize {
        let start: u32 = self.start_addr.into();
        let end: u32 = self.end_addr.into();
        if end < start {
            0
        } else {
            (end - start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_iter(&self) -> impl Iterator<Item = IpAddr> + use<> {
        let start: u32 = self.start_addr.into();
        let end: u32 = self.end_addr.into();
        (start..=end).map(|ip| IpAddr::V4(Ipv4Addr::from(ip)))
    }
}

/// Full range of a CIDR block, network and broadcast addresses included.
pub fn cidr_range(ip: Ipv4Addr, prefix: u8) -> Result<Ipv4Range, ConfigError> {
    let network = Ipv4Network::new(ip, prefix).map_err(|e| ConfigError::InvalidTarget {
        input: format!("{ip}/{prefix}"),
        reason: e.to_string(),
    })?;
    Ok(Ipv4Range::new(network.network(), network.broadcast()))
}

/// Usable host range of a CIDR block.
///
/// Blocks of `/30` and wider lose their network and broadcast address. `/31`
/// (point-to-point) and `/32` have no such addresses and are returned whole.
pub fn usable_range(ip: Ipv4Addr, prefix: u8) -> Result<Ipv4Range, ConfigError> {
    let full = cidr_range(ip, prefix)?;
    if prefix >= 31 {
        return Ok(full);
    }
    let start = u32::from(full.start_addr).saturating_add(1);
    let end = u32::from(full.end_addr).saturating_sub(1);
    Ok(Ipv4Range::new(Ipv4Addr::from(start), Ipv4Addr::from(end)))
}

/// An ordered, de-duplicated set of addresses built from singles and ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpCollection {
    addrs: Vec<IpAddr>,
    seen: HashSet<IpAddr>,
}

impl IpCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_single(&mut self, addr: IpAddr) {
        if self.seen.insert(addr) {
            self.addrs.push(addr);
        }
    }

    pub fn add_range(&mut self, range: Ipv4Range) {
        for addr in range.to_iter() {
            self.add_single(addr);
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&IpAddr) -> bool) {
        self.addrs.retain(|addr| keep(addr));
        self.seen = self.addrs.iter().copied().collect();
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IpAddr> {
        self.addrs.iter()
    }

    pub fn into_vec(self) -> Vec<IpAddr> {
        self.addrs
    }
}

impl IntoIterator for IpCollection {
    type Item = IpAddr;
    type IntoIter = std::vec::IntoIter<IpAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.addrs.into_iter()
    }
}

impl FromIterator<IpAddr> for IpCollection {
    fn from_iter<T: IntoIterator<Item = IpAddr>>(iter: T) -> Self {
        let mut collection = IpCollection::new();
        for addr in iter {
            collection.add_single(addr);
        }
        collection
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
