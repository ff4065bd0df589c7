//! TCP connect port discovery.
//!
//! One pool task per (target, port) pair. Open ports are grouped per target and
//! emitted once per target that has at least one, so `discovery.open_ports` grows
//! with the number of hosts rather than the number of probes.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use vigil_common::config::{ConfigError, ModuleConfig};
use vigil_common::network::ports::PortList;
use vigil_common::network::range::IpCollection;
use vigil_core::pool::PoolError;
use vigil_core::{
    DataContractEntry, Module, ModuleError, ModuleInputs, ModuleKind, ModuleMetadata, OpenPorts,
    OutputSink, TaskPool, ValueType,
};

use crate::keys;
use crate::settings::ProbeSettings;

pub const MODULE_TYPE: &str = "tcp_port_discovery";

const DEFAULT_CONCURRENCY: usize = 256;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Decides whether one port accepts connections.
#[async_trait]
pub trait PortConnector: Send + Sync {
    async fn is_open(&self, addr: SocketAddr, timeout: Duration) -> bool;
}

/// Full three-way handshake through the OS socket API.
pub struct TcpConnector;

#[async_trait]
impl PortConnector for TcpConnector {
    async fn is_open(&self, addr: SocketAddr, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(err)) => {
                debug!(%addr, error = %err, "connect refused");
                false
            }
            Err(_elapsed) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct TcpSettings {
    probe: ProbeSettings,
    ports: Option<PortList>,
}

impl TcpSettings {
    fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        let ports = config
            .string("ports")?
            .map(|expr| expr.parse::<PortList>())
            .transpose()?;
        Ok(Self {
            probe: ProbeSettings::from_config(config, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT)?,
            ports,
        })
    }

    /// Node config, then the seeded `config.ports` key, then the top ports.
    fn resolve_ports(&self, inputs: &ModuleInputs) -> Result<PortList, ConfigError> {
        if let Some(ports) = &self.ports {
            return Ok(ports.clone());
        }
        match inputs.single(keys::CONFIG_PORTS).and_then(|value| value.as_text()) {
            Some(expr) => expr.parse(),
            None => Ok(PortList::top()),
        }
    }

    /// Live hosts win when an upstream discovery ran; otherwise configured targets.
    fn resolve_targets(&self, inputs: &ModuleInputs) -> Result<Vec<IpAddr>, ConfigError> {
        if let Some(live) = inputs
            .single(keys::LIVE_HOSTS)
            .and_then(|value| value.as_addresses())
        {
            let mut collection = IpCollection::new();
            for addr in live {
                collection.add_single(*addr);
            }
            return Ok(collection.into_vec());
        }
        Ok(self.probe.resolve_targets(inputs)?.into_vec())
    }
}

pub struct TcpPortDiscovery {
    meta: ModuleMetadata,
    settings: Option<TcpSettings>,
    connector: Arc<dyn PortConnector>,
}

impl TcpPortDiscovery {
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TcpConnector))
    }

    pub fn with_connector(connector: Arc<dyn PortConnector>) -> Self {
        Self {
            meta: Self::describe(),
            settings: None,
            connector,
        }
    }

    pub fn describe() -> ModuleMetadata {
        ModuleMetadata::new(MODULE_TYPE, "0.1.0", ModuleKind::Discovery)
            .describe("Finds open TCP ports with connect probes")
            .tag("discovery")
            .tag("tcp")
            .consumes(DataContractEntry::single(keys::CONFIG_TARGETS, ValueType::TextList).optional())
            .consumes(DataContractEntry::single(keys::CONFIG_PORTS, ValueType::Text).optional())
            .consumes(DataContractEntry::single(keys::LIVE_HOSTS, ValueType::Addresses).optional())
            .produces(DataContractEntry::list(keys::OPEN_PORTS, ValueType::OpenPorts))
            .config_key("targets", "target expressions; overrides config.targets")
            .config_key("ports", "port expression, e.g. 1-1024,8080 (default top ports)")
            .config_key("concurrency", "connections in flight (default 256)")
            .config_key("timeout_ms", "connect timeout (default 1000)")
            .config_key("allow_loopback", "keep loopback targets (default true)")
            .config_key("skip_network_broadcast", "drop CIDR network/broadcast (default true)")
            .config_key("max_hosts", "largest allowed target expansion (default 65536)")
    }
}

impl Default for TcpPortDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for TcpPortDiscovery {
    fn metadata(&self) -> &ModuleMetadata {
        &self.meta
    }

    fn init(&mut self, _instance_id: &str, config: &ModuleConfig) -> Result<(), ModuleError> {
        self.settings = Some(TcpSettings::from_config(config)?);
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
            .as_ref()
            .ok_or_else(|| ConfigError::Missing("init was not called".to_string()))?;
        let targets = settings.resolve_targets(&inputs)?;
        let ports = settings.resolve_ports(&inputs)?;

        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }

        info!(
            targets = targets.len(),
            ports = ports.len(),
            concurrency = settings.probe.concurrency,
            "scanning ports"
        );

        let open: Arc<Mutex<BTreeMap<IpAddr, BTreeSet<u16>>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let pool = TaskPool::new(settings.probe.concurrency);
        let timeout = settings.probe.timeout;
        let mut dispatched: usize = 0;

        'dispatch: for &target in &targets {
            for port in ports.iter() {
                let connector = Arc::clone(&self.connector);
                let open = Arc::clone(&open);
                let token = cancel.clone();

                let task = async move {
                    if token.is_cancelled() {
                        return;
                    }
                    let addr = SocketAddr::new(target, port);
                    let is_open = tokio::select! {
                        _ = token.cancelled() => false,
                        is_open = connector.is_open(addr, timeout) => is_open,
                    };
                    if is_open {
                        debug!(target_addr = %target, port, "port open");
                        open.lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .entry(target)
                            .or_default()
                            .insert(port);
                    }
                };

                match pool.submit(&cancel, task).await {
                    Ok(()) => dispatched += 1,
                    Err(PoolError::Cancelled) | Err(PoolError::Closed) => break 'dispatch,
                }
            }
        }

        pool.join().await;

        if dispatched == 0 && !targets.is_empty() && !ports.is_empty() {
            return Err(ModuleError::Cancelled);
        }

        let mut open = open.lock().unwrap_or_else(PoisonError::into_inner);
        let mut hosts: usize = 0;
        for target in &targets {
            if let Some(found) = open.remove(target) {
                hosts += 1;
                sink.emit_for(
                    target,
                    keys::OPEN_PORTS,
                    OpenPorts {
                        target: *target,
                        ports: found.into_iter().collect(),
                    },
                );
            }
        }

        info!(probes = dispatched, hosts, "port discovery finished");
        Ok(())
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
