//! Configuration shared by every probing module.

use std::time::Duration;

use vigil_common::config::{ConfigError, ModuleConfig};
use vigil_common::network::range::IpCollection;
use vigil_common::network::target::{self, ExpandOptions};
use vigil_core::ModuleInputs;

use crate::keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    /// Target expressions from the node config. Take precedence over `config.targets`.
    pub targets: Option<Vec<String>>,
    pub expand: ExpandOptions,
}

impl ProbeSettings {
    /// Reads `concurrency`, `timeout_ms`, `targets`, `allow_loopback`,
    /// `skip_network_broadcast` and `max_hosts`. Target expressions are parsed and
    /// sized here, without expanding them, so a typo or an oversized block fails the
    /// run before anything is sent.
    pub fn from_config(
        config: &ModuleConfig,
        default_concurrency: usize,
        default_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let expand = ExpandOptions {
            allow_loopback: config.bool_or("allow_loopback", true)?,
            skip_network_broadcast: config.bool_or("skip_network_broadcast", true)?,
            max_hosts: config.positive_or("max_hosts", target::DEFAULT_MAX_HOSTS)?,
        };

        let targets = config.string_list("targets")?;
        if let Some(list) = &targets {
            target::parse_all(list, expand)?;
        }

        let timeout = config.duration_ms_or("timeout_ms", default_timeout)?;
        if timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                key: "timeout_ms".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            concurrency: config.positive_or("concurrency", default_concurrency)?,
            timeout,
            targets,
            expand,
        })
    }

    /// Targets from the node config, else from the seeded `config.targets` key.
    pub fn resolve_targets(&self, inputs: &ModuleInputs) -> Result<IpCollection, ConfigError> {
        if let Some(list) = &self.targets {
            return target::expand_all(list, self.expand);
        }

        let seeded: Vec<String> = inputs
            .list(keys::CONFIG_TARGETS)
            .iter()
            .flat_map(|value| match value.as_text_list() {
                Some(list) => list.to_vec(),
                None => value.as_text().map(str::to_string).into_iter().collect(),
            })
            .collect();
        target::expand_all(&seeded, self.expand)
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
