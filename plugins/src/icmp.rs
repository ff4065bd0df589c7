//! ICMP echo host discovery.
//!
//! Every candidate address gets one pool task that sends up to `count` echo
//! requests `interval` apart and stops at the first reply. The module emits one
//! `discovery.live_hosts` value listing the responders in target order.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_common::config::{ConfigError, ModuleConfig};
use vigil_core::pool::PoolError;
use vigil_core::{
    DataContractEntry, Module, ModuleError, ModuleInputs, ModuleKind, ModuleMetadata, OutputSink,
    TaskPool, ValueType,
};

use crate::keys;
use crate::settings::ProbeSettings;

pub const MODULE_TYPE: &str = "icmp_discovery";

const DEFAULT_CONCURRENCY: usize = 64;
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
const DEFAULT_INTERVAL: Duration = Duration::from_millis(200);
const DEFAULT_PAYLOAD: usize = 56;
/// Slack on top of the per-host probe budget before a task is abandoned.
const TASK_GRACE: Duration = Duration::from_millis(250);

/// Sends a single echo request and reports whether a reply arrived.
#[async_trait]
pub trait EchoProber: Send + Sync {
    async fn echo(&self, addr: IpAddr, seq: u16, timeout: Duration) -> bool;
}

/// Raw-socket (or unprivileged datagram) pinger backed by `surge-ping`.
pub struct SurgePinger {
    v4: Client,
    v6: Option<Client>,
    payload: Vec<u8>,
}

impl SurgePinger {
    pub fn new(payload_size: usize) -> anyhow::Result<Self> {
        let v4 = Client::new(&Config::default())
            .context("opening ICMPv4 socket (needs CAP_NET_RAW or ping_group_range)")?;
        let v6 = match Client::new(&Config::builder().kind(ICMP::V6).build()) {
            Ok(client) => Some(client),
            Err(err) => {
                warn!(error = %err, "ICMPv6 unavailable, IPv6 targets will be reported down");
                None
            }
        };
        Ok(Self {
            v4,
            v6,
            payload: vec![0u8; payload_size],
        })
    }
}

#[async_trait]
impl EchoProber for SurgePinger {
    async fn echo(&self, addr: IpAddr, seq: u16, timeout: Duration) -> bool {
        let client = match (addr, &self.v6) {
            (IpAddr::V4(_), _) => &self.v4,
            (IpAddr::V6(_), Some(v6)) => v6,
            (IpAddr::V6(_), None) => return false,
        };

        let mut pinger = client.pinger(addr, PingIdentifier(rand::random())).await;
        pinger.timeout(timeout);
        match pinger.ping(PingSequence(seq), &self.payload).await {
            Ok((_, rtt)) => {
                debug!(target_addr = %addr, seq, rtt_ms = rtt.as_millis() as u64, "echo reply");
                true
            }
            Err(err) => {
                debug!(target_addr = %addr, seq, error = %err, "no echo reply");
                false
            }
        }
    }
}

#[derive(Debug, Clone)]
struct IcmpSettings {
    probe: ProbeSettings,
    count: usize,
    interval: Duration,
    payload_size: usize,
}

impl IcmpSettings {
    fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            probe: ProbeSettings::from_config(config, DEFAULT_CONCURRENCY, DEFAULT_TIMEOUT)?,
            count: config.positive_or("count", 1)?,
            interval: config.duration_ms_or("interval_ms", DEFAULT_INTERVAL)?,
            payload_size: config.usize_or("payload_size", DEFAULT_PAYLOAD)?,
        })
    }

    /// Longest a single host may take: every echo timing out plus the gaps.
    fn task_budget(&self) -> Duration {
        let count = u32::try_from(self.count).unwrap_or(u32::MAX);
        self.probe
            .timeout
            .saturating_mul(count)
            .saturating_add(self.interval.saturating_mul(count.saturating_sub(1)))
            .saturating_add(TASK_GRACE)
    }
}

pub struct IcmpDiscovery {
    meta: ModuleMetadata,
    instance_id: String,
    settings: Option<IcmpSettings>,
    prober: Option<Arc<dyn EchoProber>>,
}

impl IcmpDiscovery {
    pub fn new() -> Self {
        Self {
            meta: Self::describe(),
            instance_id: String::new(),
            settings: None,
            prober: None,
        }
    }

    /// Uses `prober` instead of opening ICMP sockets.
    pub fn with_prober(prober: Arc<dyn EchoProber>) -> Self {
        Self {
            prober: Some(prober),
            ..Self::new()
        }
    }

    pub fn describe() -> ModuleMetadata {
        ModuleMetadata::new(MODULE_TYPE, "0.1.0", ModuleKind::Discovery)
            .describe("Finds live hosts with ICMP echo requests")
            .tag("discovery")
            .tag("icmp")
            .consumes(DataContractEntry::single(keys::CONFIG_TARGETS, ValueType::TextList).optional())
            .produces(DataContractEntry::single(keys::LIVE_HOSTS, ValueType::Addresses))
            .config_key("targets", "target expressions; overrides config.targets")
            .config_key("concurrency", "hosts probed at once (default 64)")
            .config_key("timeout_ms", "per echo timeout (default 1000)")
            .config_key("count", "echo requests per host (default 1)")
            .config_key("interval_ms", "gap between echo requests (default 200)")
            .config_key("payload_size", "echo payload bytes (default 56)")
            .config_key("allow_loopback", "keep loopback targets (default true)")
            .config_key("skip_network_broadcast", "drop CIDR network/broadcast (default true)")
            .config_key("max_hosts", "largest allowed target expansion (default 65536)")
    }
}

impl Default for IcmpDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Module for IcmpDiscovery {
    fn metadata(&self) -> &ModuleMetadata {
        &self.meta
    }

    fn init(&mut self, instance_id: &str, config: &ModuleConfig) -> Result<(), ModuleError> {
        self.instance_id = instance_id.to_string();
        self.settings = Some(IcmpSettings::from_config(config)?);
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
        let targets = settings.probe.resolve_targets(&inputs)?;

        if cancel.is_cancelled() {
            return Err(ModuleError::Cancelled);
        }

        if targets.is_empty() {
            info!("no targets to ping");
            sink.emit(keys::LIVE_HOSTS, Vec::<IpAddr>::new());
            return Ok(());
        }

        let prober: Arc<dyn EchoProber> = match &self.prober {
            Some(prober) => Arc::clone(prober),
            None => Arc::new(SurgePinger::new(settings.payload_size)?),
        };

        info!(
            targets = targets.len(),
            count = settings.count,
            concurrency = settings.probe.concurrency,
            "pinging targets"
        );

        let live: Arc<Mutex<HashSet<IpAddr>>> = Arc::new(Mutex::new(HashSet::new()));
        let pool = TaskPool::new(settings.probe.concurrency);
        let budget = settings.task_budget();
        let mut dispatched: usize = 0;

        for addr in targets.iter().copied() {
            let prober = Arc::clone(&prober);
            let live = Arc::clone(&live);
            let token = cancel.clone();
            let settings = settings.clone();

            let task = async move {
                let alive = tokio::select! {
                    _ = token.cancelled() => false,
                    outcome = tokio::time::timeout(budget, probe_host(prober.as_ref(), addr, &settings, &token)) => {
                        outcome.unwrap_or(false)
                    }
                };
                if alive {
                    live.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(addr);
                }
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

        let live = live.lock().unwrap_or_else(PoisonError::into_inner);
        let hosts: Vec<IpAddr> = targets.iter().filter(|addr| live.contains(addr)).copied().collect();
        info!(live = hosts.len(), probed = dispatched, "host discovery finished");
        sink.emit(keys::LIVE_HOSTS, hosts);
        Ok(())
    }
}

async fn probe_host(
    prober: &dyn EchoProber,
    addr: IpAddr,
    settings: &IcmpSettings,
    cancel: &CancellationToken,
) -> bool {
    for seq in 0..settings.count {
        if cancel.is_cancelled() {
            return false;
        }
        let seq = u16::try_from(seq).unwrap_or(u16::MAX);
        if prober.echo(addr, seq, settings.probe.timeout).await {
            return true;
        }
        if usize::from(seq) + 1 < settings.count {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(settings.interval) => {}
            }
        }
    }
    false
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
