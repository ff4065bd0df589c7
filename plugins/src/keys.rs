//! Well-known data context keys shared by the built-in modules.

/// Target expressions supplied by the caller (`TextList`, seeded).
pub const CONFIG_TARGETS: &str = "config.targets";
/// Port expression supplied by the caller (`Text`, seeded).
pub const CONFIG_PORTS: &str = "config.ports";
/// Addresses that answered ICMP echo (`Addresses`, single).
pub const LIVE_HOSTS: &str = "discovery.live_hosts";
/// One entry per target with at least one open port (`OpenPorts`, list).
pub const OPEN_PORTS: &str = "discovery.open_ports";
/// One entry per probed port (`Banner`, list).
pub const BANNERS: &str = "scan.banners";
