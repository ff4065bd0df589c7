//! # vigil-core
//!
//! The scan-orchestration engine. Probing modules implement [`Module`] and declare
//! the keys they consume and produce; the [`Orchestrator`] infers the execution
//! order from those declarations, runs independent modules concurrently and merges
//! every emitted value into one [`DataContext`].

pub mod context;
pub mod dag;
pub mod error;
pub mod module;
pub mod orchestrator;
pub mod plan;
pub mod pool;
pub mod registry;
pub mod value;

pub use context::{AggregatedValue, DataContext};
pub use dag::{DagDefinition, DagNodeConfig};
pub use error::{DagError, ModuleError, RegistryError, RunError};
pub use module::{
    Cardinality, DataContractEntry, Module, ModuleInputs, ModuleKind, ModuleMetadata,
    ModuleOutput, OutputSink,
};
pub use orchestrator::{NodeReport, NodeStatus, Orchestrator, RunOutcome};
pub use plan::ExecutionPlan;
pub use pool::TaskPool;
pub use registry::ModuleRegistry;
pub use value::{BannerRecord, DataValue, OpenPorts, TlsDetails, ValueType};
