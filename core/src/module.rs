//! The **module contract** every probe implements.
//!
//! A module describes itself through static [`ModuleMetadata`] (what it consumes and
//! produces), is configured once with [`Module::init`], and does its work in a single
//! [`Module::execute`] call that streams results into an [`OutputSink`].
//!
//! Modules never touch the [`DataContext`](crate::context::DataContext) directly: they
//! receive a snapshot of the keys they declared in [`ModuleInputs`] and hand everything
//! they produce to the sink, which the orchestrator drains and merges.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_common::config::ModuleConfig;

use crate::context::AggregatedValue;
use crate::error::ModuleError;
use crate::value::{DataValue, ValueType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// The key holds one value; a later write replaces an earlier one.
    Single,
    /// The key accumulates every emitted value in arrival order.
    List,
}

/// One input or output a module negotiates with the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContractEntry {
    pub key: String,
    pub value_type: ValueType,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub optional: bool,
}

impl DataContractEntry {
    pub fn single(key: &str, value_type: ValueType) -> Self {
        Self {
            key: key.to_string(),
            value_type,
            cardinality: Cardinality::Single,
            optional: false,
        }
    }

    pub fn list(key: &str, value_type: ValueType) -> Self {
        Self {
            key: key.to_string(),
            value_type,
            cardinality: Cardinality::List,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Discovery,
    Scan,
    Evaluation,
    Reporting,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleKind::Discovery => "discovery",
            ModuleKind::Scan => "scan",
            ModuleKind::Evaluation => "evaluation",
            ModuleKind::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// Static descriptor of a module type. Built once when the module is constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub version: String,
    pub kind: ModuleKind,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub consumes: Vec<DataContractEntry>,
    #[serde(default)]
    pub produces: Vec<DataContractEntry>,
    /// Recognised configuration keys with a short description each.
    #[serde(default)]
    pub config_schema: BTreeMap<String, String>,
}

impl ModuleMetadata {
    pub fn new(name: &str, version: &str, kind: ModuleKind) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            kind,
            description: String::new(),
            tags: Vec::new(),
            consumes: Vec::new(),
            produces: Vec::new(),
            config_schema: BTreeMap::new(),
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    pub fn consumes(mut self, entry: DataContractEntry) -> Self {
        self.consumes.push(entry);
        self
    }

    pub fn produces(mut self, entry: DataContractEntry) -> Self {
        self.produces.push(entry);
        self
    }

    pub fn config_key(mut self, key: &str, description: &str) -> Self {
        self.config_schema
            .insert(key.to_string(), description.to_string());
        self
    }

    pub fn required_inputs(&self) -> impl Iterator<Item = &DataContractEntry> {
        self.consumes.iter().filter(|entry| !entry.optional)
    }

    pub fn produced(&self, key: &str) -> Option<&DataContractEntry> {
        self.produces.iter().find(|entry| entry.key == key)
    }
}

/// One emitted result.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleOutput {
    pub from_module: String,
    pub data_key: String,
    pub data: Option<DataValue>,
    pub target: Option<String>,
    pub error: Option<String>,
    pub timestamp: SystemTime,
}

/// Where a module sends its results.
///
/// The sink stamps the producing instance and a timestamp on every message, so a
/// module can only ever speak for itself. Cloning is cheap; worker tasks may hold
/// their own copy.
#[derive(Debug, Clone)]
pub struct OutputSink {
    instance_id: String,
    tx: UnboundedSender<ModuleOutput>,
}

impl OutputSink {
    pub fn new(instance_id: &str, tx: UnboundedSender<ModuleOutput>) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            tx,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn emit(&self, key: &str, value: impl Into<DataValue>) {
        self.send(key, Some(value.into()), None, None);
    }

    pub fn emit_for(&self, target: impl ToString, key: &str, value: impl Into<DataValue>) {
        self.send(key, Some(value.into()), Some(target.to_string()), None);
    }

    /// Reports a non-fatal problem tied to one key (and optionally one target).
    pub fn emit_error(&self, key: &str, target: Option<String>, error: impl ToString) {
        self.send(key, None, target, Some(error.to_string()));
    }

    fn send(
        &self,
        key: &str,
        data: Option<DataValue>,
        target: Option<String>,
        error: Option<String>,
    ) {
        let output = ModuleOutput {
            from_module: self.instance_id.clone(),
            data_key: key.to_string(),
            data,
            target,
            error,
            timestamp: SystemTime::now(),
        };
        if self.tx.send(output).is_err() {
            warn!(instance = %self.instance_id, key, "output dropped, receiver is gone");
        }
    }
}

/// Snapshot of the keys a module declared in `consumes`, taken when it is dispatched.
#[derive(Debug, Clone, Default)]
pub struct ModuleInputs {
    values: BTreeMap<String, AggregatedValue>,
}

impl ModuleInputs {
    pub fn new(values: BTreeMap<String, AggregatedValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&AggregatedValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The value of a `Single` key. A `List` key yields its most recent entry.
    pub fn single(&self, key: &str) -> Option<&DataValue> {
        match self.values.get(key)? {
            AggregatedValue::Single(value) => Some(value),
            AggregatedValue::List(values) => values.last(),
        }
    }

    /// All values of a `List` key. A `Single` key yields a one-element slice.
    pub fn list(&self, key: &str) -> &[DataValue] {
        match self.values.get(key) {
            Some(AggregatedValue::List(values)) => values,
            Some(AggregatedValue::Single(value)) => std::slice::from_ref(value),
            None => &[],
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

/// The capability every probe implements.
#[async_trait]
pub trait Module: Send + Sync {
    /// Static descriptor; identical for every instance of the same type.
    fn metadata(&self) -> &ModuleMetadata;

    /// Validates and stores the node configuration. An error here aborts the run.
    fn init(&mut self, instance_id: &str, config: &ModuleConfig) -> Result<(), ModuleError>;

    /// Does the work. Called at most once per instance.
    async fn execute(
        &self,
        cancel: CancellationToken,
        inputs: ModuleInputs,
        sink: OutputSink,
    ) -> Result<(), ModuleError>;
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
    use tokio::sync::mpsc;

    #[test]
    fn sink_stamps_instance_and_target() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = OutputSink::new("tcp-1", tx);

        sink.emit_for("10.0.0.1", "discovery.open_ports", "x");
        sink.emit_error("discovery.open_ports", None, "boom");

        let first = rx.try_recv().unwrap();
        assert_eq!(first.from_module, "tcp-1");
        assert_eq!(first.target.as_deref(), Some("10.0.0.1"));
        assert_eq!(first.data, Some(DataValue::Text("x".to_string())));

        let second = rx.try_recv().unwrap();
        assert!(second.data.is_none());
        assert_eq!(second.error.as_deref(), Some("boom"));
    }

    #[test]
    fn required_inputs_skip_optional_entries() {
        let meta = ModuleMetadata::new("m", "1.0.0", ModuleKind::Scan)
            .consumes(DataContractEntry::single("a", ValueType::Text))
            .consumes(DataContractEntry::single("b", ValueType::Text).optional());

        let required: Vec<&str> = meta.required_inputs().map(|e| e.key.as_str()).collect();
        assert_eq!(required, vec!["a"]);
    }

    #[test]
    fn inputs_expose_single_and_list_shapes() {
        let mut values = BTreeMap::new();
        values.insert(
            "s".to_string(),
            AggregatedValue::Single(DataValue::Bool(true)),
        );
        values.insert(
            "l".to_string(),
            AggregatedValue::List(vec![DataValue::Integer(1), DataValue::Integer(2)]),
        );
        let inputs = ModuleInputs::new(values);

        assert_eq!(inputs.single("s"), Some(&DataValue::Bool(true)));
        assert_eq!(inputs.list("s").len(), 1);
        assert_eq!(inputs.list("l").len(), 2);
        assert_eq!(inputs.single("l"), Some(&DataValue::Integer(2)));
        assert!(inputs.list("missing").is_empty());
    }
}
