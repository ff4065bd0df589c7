//! Declarative description of one scan run.
//!
//! A [`DagDefinition`] is a list of module instances. Edges are not written down:
//! they are inferred from the data contracts of the module types (see
//! [`ExecutionPlan`](crate::plan::ExecutionPlan)). `depends_on` only adds ordering
//! hints on top of that.
//!
//! The JSON document form looks like:
//!
//! ```json
//! {
//!   "name": "quick-scan",
//!   "version": "1",
//!   "nodes": [
//!     { "id": "ports", "module": "tcp_port_discovery", "config": { "ports": "1-1024" } },
//!     { "id": "banners", "module": "banner_grab", "depends_on": ["ports"] }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use vigil_common::config::ModuleConfig;

use crate::error::DagError;
use crate::registry::ModuleRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagNodeConfig {
    #[serde(rename = "id")]
    pub instance_id: String,
    #[serde(rename = "module")]
    pub module_type: String,
    #[serde(default, skip_serializing_if = "ModuleConfig::is_empty")]
    pub config: ModuleConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Informational copy of the module's consumed keys, written by `export`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumes: Vec<String>,
    /// Informational copy of the module's produced keys, written by `export`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub produces: Vec<String>,
}

impl DagNodeConfig {
    pub fn new(instance_id: &str, module_type: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            module_type: module_type.to_string(),
            config: ModuleConfig::new(),
            depends_on: Vec::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }

    pub fn depends_on(mut self, instance_id: &str) -> Self {
        self.depends_on.push(instance_id.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub nodes: Vec<DagNodeConfig>,
}

impl DagDefinition {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            description: String::new(),
            nodes: Vec::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn node(mut self, node: DagNodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn find(&self, instance_id: &str) -> Option<&DagNodeConfig> {
        self.nodes.iter().find(|node| node.instance_id == instance_id)
    }

    pub fn from_json(document: &str) -> Result<Self, DagError> {
        Ok(serde_json::from_str(document)?)
    }

    pub fn to_json(&self) -> Result<String, DagError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let document = std::fs::read_to_string(path)
            .with_context(|| format!("reading DAG file {}", path.display()))?;
        Self::from_json(&document).with_context(|| format!("parsing DAG file {}", path.display()))
    }

    /// Copies each node's consumed and produced keys from the registry so the
    /// exported document is self-describing for external tooling.
    pub fn annotate(&mut self, registry: &ModuleRegistry) {
        for node in &mut self.nodes {
            if let Ok(meta) = registry.metadata(&node.module_type) {
                node.consumes = meta.consumes.iter().map(|e| e.key.clone()).collect();
                node.produces = meta.produces.iter().map(|e| e.key.clone()).collect();
            }
        }
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
