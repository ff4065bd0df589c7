//! Per-node module configuration.
//!
//! A DAG node carries a free-form JSON object as its configuration. Modules read it
//! through [`ModuleConfig`], which turns type mismatches into [`ConfigError`]s instead
//! of silently falling back to defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required config key `{0}`")]
    Missing(String),
    #[error("config key `{key}` must be {expected}")]
    InvalidType { key: String, expected: &'static str },
    #[error("config key `{key}` is out of range: {reason}")]
    OutOfRange { key: String, reason: String },
    #[error("invalid target `{input}`: {reason}")]
    InvalidTarget { input: String, reason: String },
    #[error("invalid port expression `{input}`: {reason}")]
    InvalidPorts { input: String, reason: String },
}

/// Typed view over a node's configuration map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleConfig(Map<String, Value>);

impl ModuleConfig {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert, mostly used by the planner and in tests.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn u64_or(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value.as_u64().ok_or_else(|| invalid(key, "a non-negative integer")),
        }
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.u64_or(key, default as u64)?;
        usize::try_from(value).map_err(|_| ConfigError::OutOfRange {
            key: key.to_string(),
            reason: format!("{value} does not fit in usize"),
        })
    }

    /// Like [`usize_or`](Self::usize_or) but rejects zero.
    pub fn positive_or(&self, key: &str, default: usize) -> Result<usize, ConfigError> {
        let value = self.usize_or(key, default)?;
        if value == 0 {
            return Err(ConfigError::OutOfRange {
                key: key.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value.as_bool().ok_or_else(|| invalid(key, "a boolean")),
        }
    }

    /// Reads a millisecond count as a [`Duration`].
    pub fn duration_ms_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(default),
            Some(value) => value
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| invalid(key, "a duration in milliseconds")),
        }
    }

    pub fn string(&self, key: &str) -> Result<Option<String>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(_) => Err(invalid(key, "a string")),
        }
    }

    /// Accepts either a JSON array of strings or a single comma separated string.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(split_list(s))),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| invalid(key, "a list of strings"))
                })
                .collect::<Result<Vec<String>, _>>()
                .map(Some),
            Some(_) => Err(invalid(key, "a list of strings")),
        }
    }
}

impl From<Map<String, Value>> for ModuleConfig {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn invalid(key: &str, expected: &'static str) -> ConfigError {
    ConfigError::InvalidType {
        key: key.to_string(),
        expected,
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
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
    use serde_json::json;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let cfg = ModuleConfig::new();
        assert_eq!(cfg.u64_or("count", 3), Ok(3));
        assert_eq!(cfg.bool_or("allow_loopback", true), Ok(true));
        assert_eq!(
            cfg.duration_ms_or("timeout_ms", Duration::from_millis(250)),
            Ok(Duration::from_millis(250))
        );
        assert_eq!(cfg.string_list("targets"), Ok(None));
    }

    #[test]
    fn wrong_types_are_rejected() {
        let cfg = ModuleConfig::new()
            .with("count", "three")
            .with("allow_loopback", 1)
            .with("targets", json!({"a": 1}));

        assert!(matches!(
            cfg.u64_or("count", 1),
            Err(ConfigError::InvalidType { .. })
        ));
        assert!(cfg.bool_or("allow_loopback", false).is_err());
        assert!(cfg.string_list("targets").is_err());
    }

    #[test]
    fn positive_rejects_zero() {
        let cfg = ModuleConfig::new().with("concurrency", 0);
        assert!(matches!(
            cfg.positive_or("concurrency", 8),
            Err(ConfigError::OutOfRange { .. })
        ));
    }

    #[test]
    fn string_list_accepts_array_and_csv() {
        let cfg = ModuleConfig::new()
            .with("a", json!(["10.0.0.1", "10.0.0.2"]))
            .with("b", "10.0.0.1, 10.0.0.0/30 ,");

        assert_eq!(
            cfg.string_list("a").unwrap(),
            Some(vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()])
        );
        assert_eq!(
            cfg.string_list("b").unwrap(),
            Some(vec!["10.0.0.1".to_string(), "10.0.0.0/30".to_string()])
        );
    }

    #[test]
    fn deserializes_transparently_from_json_object() {
        let cfg: ModuleConfig = serde_json::from_value(json!({"timeout_ms": 200})).unwrap();
        assert_eq!(
            cfg.duration_ms_or("timeout_ms", Duration::ZERO),
            Ok(Duration::from_millis(200))
        );
    }
}
