//! The shared result store for one run.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::module::{Cardinality, DataContractEntry, ModuleInputs};
use crate::value::DataValue;

/// What a key holds. The shape follows the cardinality the producer declared.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AggregatedValue {
    Single(DataValue),
    List(Vec<DataValue>),
}

impl AggregatedValue {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            AggregatedValue::Single(_) => Cardinality::Single,
            AggregatedValue::List(_) => Cardinality::List,
        }
    }

    /// Number of stored values: 1 for `Single`, the sequence length for `List`.
    pub fn len(&self) -> usize {
        match self {
            AggregatedValue::Single(_) => 1,
            AggregatedValue::List(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> &[DataValue] {
        match self {
            AggregatedValue::Single(value) => std::slice::from_ref(value),
            AggregatedValue::List(values) => values,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("key `{key}` holds {existing:?} data but was written as {attempted:?}")]
pub struct CardinalityConflict {
    pub key: String,
    pub existing: Cardinality,
    pub attempted: Cardinality,
}

/// Key/value aggregate of everything a run produced.
///
/// Only the orchestrator writes to it. Once a run finishes the caller gets it by
/// value and reads through [`get`](Self::get), [`single`](Self::single) and
/// [`list`](Self::list).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DataContext {
    entries: BTreeMap<String, AggregatedValue>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an externally supplied input. Always overwrites.
    pub fn set_initial(&mut self, key: &str, value: DataValue) {
        self.entries
            .insert(key.to_string(), AggregatedValue::Single(value));
    }

    /// Appends to a `List` key, creating the sequence if absent.
    pub fn append(&mut self, key: &str, value: DataValue) -> Result<(), CardinalityConflict> {
        match self.entries.get_mut(key) {
            Some(AggregatedValue::List(values)) => values.push(value),
            Some(AggregatedValue::Single(_)) => {
                return Err(CardinalityConflict {
                    key: key.to_string(),
                    existing: Cardinality::Single,
                    attempted: Cardinality::List,
                });
            }
            None => {
                self.entries
                    .insert(key.to_string(), AggregatedValue::List(vec![value]));
            }
        }
        Ok(())
    }

    /// Replaces a `Single` key. Last write wins.
    pub fn overwrite(&mut self, key: &str, value: DataValue) -> Result<(), CardinalityConflict> {
        if let Some(AggregatedValue::List(_)) = self.entries.get(key) {
            return Err(CardinalityConflict {
                key: key.to_string(),
                existing: Cardinality::List,
                attempted: Cardinality::Single,
            });
        }
        self.entries
            .insert(key.to_string(), AggregatedValue::Single(value));
        Ok(())
    }

    /// Merges one produced value according to its declared cardinality.
    pub fn merge(
        &mut self,
        key: &str,
        cardinality: Cardinality,
        value: DataValue,
    ) -> Result<(), CardinalityConflict> {
        match cardinality {
            Cardinality::Single => self.overwrite(key, value),
            Cardinality::List => self.append(key, value),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AggregatedValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn single(&self, key: &str) -> Option<&DataValue> {
        match self.entries.get(key)? {
            AggregatedValue::Single(value) => Some(value),
            AggregatedValue::List(_) => None,
        }
    }

    pub fn list(&self, key: &str) -> &[DataValue] {
        match self.entries.get(key) {
            Some(AggregatedValue::List(values)) => values,
            _ => &[],
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clones the declared keys that are currently present.
    pub fn snapshot_for(&self, consumes: &[DataContractEntry]) -> ModuleInputs {
        let values = consumes
            .iter()
            .filter_map(|entry| {
                self.entries
                    .get(&entry.key)
                    .map(|value| (entry.key.clone(), value.clone()))
            })
            .collect();
        ModuleInputs::new(values)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueType;

    #[test]
    fn append_preserves_order() {
        let mut ctx = DataContext::new();
        ctx.append("k", DataValue::Integer(1)).unwrap();
        ctx.append("k", DataValue::Integer(2)).unwrap();
        ctx.append("k", DataValue::Integer(3)).unwrap();

        assert_eq!(
            ctx.list("k"),
            &[
                DataValue::Integer(1),
                DataValue::Integer(2),
                DataValue::Integer(3)
            ]
        );
    }

    #[test]
    fn overwrite_keeps_last_write() {
        let mut ctx = DataContext::new();
        ctx.merge("k", Cardinality::Single, DataValue::from("first"))
            .unwrap();
        ctx.merge("k", Cardinality::Single, DataValue::from("second"))
            .unwrap();
        assert_eq!(ctx.single("k"), Some(&DataValue::from("second")));
    }

    #[test]
    fn mixing_cardinalities_is_rejected() {
        let mut ctx = DataContext::new();
        ctx.append("k", DataValue::Integer(1)).unwrap();
        let err = ctx.overwrite("k", DataValue::Integer(2)).unwrap_err();
        assert_eq!(err.existing, Cardinality::List);

        ctx.set_initial("seed", DataValue::Bool(true));
        assert!(ctx.append("seed", DataValue::Bool(false)).is_err());
    }

    #[test]
    fn set_initial_overwrites_anything() {
        let mut ctx = DataContext::new();
        ctx.append("k", DataValue::Integer(1)).unwrap();
        ctx.set_initial("k", DataValue::Integer(9));
        assert_eq!(ctx.single("k"), Some(&DataValue::Integer(9)));
    }

    #[test]
    fn snapshot_only_contains_declared_present_keys() {
        let mut ctx = DataContext::new();
        ctx.set_initial("a", DataValue::from("x"));
        ctx.set_initial("b", DataValue::from("y"));

        let inputs = ctx.snapshot_for(&[
            DataContractEntry::single("a", ValueType::Text),
            DataContractEntry::single("missing", ValueType::Text).optional(),
        ]);

        let keys: Vec<&str> = inputs.keys().collect();
        assert_eq!(keys, vec!["a"]);
    }
}
