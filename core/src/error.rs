use std::fmt;

use thiserror::Error;
use vigil_common::config::ConfigError;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module type `{0}` is already registered")]
    DuplicateModuleType(String),
    #[error("unknown module type `{0}`")]
    UnknownModuleType(String),
}

/// Structural problems in a DAG definition. All of these are detected before any
/// module runs and abort the run.
#[derive(Debug, Error)]
pub enum DagError {
    #[error("instance id `{0}` is used by more than one node")]
    DuplicateInstance(String),
    #[error("node `{instance}` uses an unregistered module type: {source}")]
    UnknownModuleType {
        instance: String,
        #[source]
        source: RegistryError,
    },
    #[error("node `{instance}` depends on unknown node `{dependency}`")]
    UnknownDependency { instance: String, dependency: String },
    #[error("dependency cycle between nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("malformed DAG document: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("execution cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why a single node did not complete successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// `execute` returned an error.
    Execute(String),
    /// The task running `execute` panicked or was aborted.
    Crashed(String),
    /// A required input can never be satisfied.
    Unreachable(String),
    /// The node was still running or waiting when the run was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFailure {
    pub instance: String,
    pub kind: FailureKind,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FailureKind::Execute(msg) => write!(f, "{}: {msg}", self.instance),
            FailureKind::Crashed(msg) => write!(f, "{}: crashed: {msg}", self.instance),
            FailureKind::Unreachable(msg) => write!(f, "{}: {msg}", self.instance),
            FailureKind::Cancelled => write!(f, "{}: cancelled", self.instance),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("invalid DAG: {0}")]
    Dag(#[from] DagError),
    #[error("failed to initialise `{instance}`: {source}")]
    Init {
        instance: String,
        #[source]
        source: ModuleError,
    },
    #[error("run completed with {} failed node(s): {}", .failures.len(), join(.failures))]
    Partial { failures: Vec<NodeFailure> },
    #[error("run cancelled")]
    Cancelled { failures: Vec<NodeFailure> },
}

impl RunError {
    /// Fatal errors leave nothing useful in the data context.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RunError::Dag(_) | RunError::Init { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled { .. })
    }

    pub fn failures(&self) -> &[NodeFailure] {
        match self {
            RunError::Partial { failures } | RunError::Cancelled { failures } => failures,
            RunError::Dag(_) | RunError::Init { .. } => &[],
        }
    }
}

fn join(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(NodeFailure::to_string)
        .collect::<Vec<String>>()
        .join("; ")
}
