//! Built-in probing modules.
//!
//! Nothing registers itself: the binary (or a test) builds a
//! [`ModuleRegistry`] and calls [`register_builtin`].

pub mod banner;
pub mod icmp;
pub mod keys;
pub mod planner;
pub mod settings;
pub mod tcp;

use vigil_core::{ModuleRegistry, RegistryError};

pub use banner::BannerGrab;
pub use icmp::IcmpDiscovery;
pub use planner::ScanIntent;
pub use tcp::TcpPortDiscovery;

pub fn register_builtin(registry: &mut ModuleRegistry) -> Result<(), RegistryError> {
    registry.register(icmp::MODULE_TYPE, || Box::new(IcmpDiscovery::new()))?;
    registry.register(tcp::MODULE_TYPE, || Box::new(TcpPortDiscovery::new()))?;
    registry.register(banner::MODULE_TYPE, || Box::new(BannerGrab::new()))?;
    Ok(())
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
    fn registers_every_builtin_once() {
        let mut registry = ModuleRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert_eq!(
            registry.types().collect::<Vec<_>>(),
            vec![banner::MODULE_TYPE, icmp::MODULE_TYPE, tcp::MODULE_TYPE]
        );
        assert!(register_builtin(&mut registry).is_err());
    }
}
