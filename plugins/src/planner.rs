//! Compiles a high-level scan request into a DAG of built-in modules.
//!
//! The shape is fixed: optional ICMP host discovery, TCP port discovery, then
//! optional banner grabbing. Ordering is not written down here; it falls out of the
//! modules' data contracts once the orchestrator plans the DAG.

use std::collections::BTreeMap;
use std::time::Duration;

use vigil_common::config::{ConfigError, ModuleConfig};
use vigil_common::network::ports::PortList;
use vigil_common::network::target::{self, ExpandOptions};
use vigil_core::{DagDefinition, DagNodeConfig, DataValue};

use crate::{banner, icmp, keys, tcp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIntent {
    pub targets: Vec<String>,
    pub ports: Option<String>,
    pub ping: bool,
    pub banners: bool,
    pub concurrency: Option<usize>,
    pub timeout: Option<Duration>,
}

impl ScanIntent {
    pub fn new(targets: Vec<String>) -> Self {
        Self {
            targets,
            ports: None,
            ping: true,
            banners: true,
            concurrency: None,
            timeout: None,
        }
    }

    /// Checks target and port syntax without touching the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Missing("targets".to_string()));
        }
        target::parse_all(&self.targets, ExpandOptions::default())?;
        if let Some(ports) = &self.ports {
            ports.parse::<PortList>()?;
        }
        Ok(())
    }

    /// Builds the DAG for this intent.
    ///
    /// Targets and ports are written into the discovery nodes' config so an
    /// exported DAG replays the same scan without any seeded inputs.
    pub fn to_dag(&self) -> DagDefinition {
        let mut dag = DagDefinition::new("scan").describe(&self.summary());

        if self.ping {
            dag = dag.node(DagNodeConfig::new("hosts", icmp::MODULE_TYPE).with_config(self.node_config()));
        }
        let mut ports = self.node_config();
        if let Some(list) = &self.ports {
            ports.insert("ports", list.as_str());
        }
        dag = dag.node(DagNodeConfig::new("ports", tcp::MODULE_TYPE).with_config(ports));
        if self.banners {
            let mut config = ModuleConfig::new();
            if let Some(concurrency) = self.concurrency {
                config.insert("concurrency", concurrency as u64);
            }
            dag = dag.node(DagNodeConfig::new("banners", banner::MODULE_TYPE).with_config(config));
        }
        dag
    }

    /// Values seeded into the context before the first layer runs.
    pub fn initial_inputs(&self) -> BTreeMap<String, DataValue> {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            keys::CONFIG_TARGETS.to_string(),
            DataValue::TextList(self.targets.clone()),
        );
        if let Some(ports) = &self.ports {
            inputs.insert(keys::CONFIG_PORTS.to_string(), DataValue::from(ports.as_str()));
        }
        inputs
    }

    fn node_config(&self) -> ModuleConfig {
        let mut config = ModuleConfig::new().with("targets", self.targets.clone());
        if let Some(concurrency) = self.concurrency {
            config.insert("concurrency", concurrency as u64);
        }
        if let Some(timeout) = self.timeout {
            config.insert("timeout_ms", timeout.as_millis() as u64);
        }
        config
    }

    fn summary(&self) -> String {
        let mut steps = Vec::new();
        if self.ping {
            steps.push("icmp");
        }
        steps.push("tcp");
        if self.banners {
            steps.push("banners");
        }
        format!("{} against {}", steps.join(" + "), self.targets.join(", "))
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
