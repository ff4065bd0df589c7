//! Runs a [`DagDefinition`] layer by layer.
//!
//! For every layer the orchestrator creates and initialises all module instances
//! first (an `init` failure aborts the run), then executes them concurrently. The
//! outputs stream back through one channel per layer and are merged into the
//! [`DataContext`] as they arrive; the merge step is the only writer. A layer is
//! fully joined before the next one starts.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::context::DataContext;
use crate::dag::DagDefinition;
use crate::error::{DagError, FailureKind, ModuleError, NodeFailure, RunError};
use crate::module::{Module, ModuleOutput, OutputSink};
use crate::plan::ExecutionPlan;
use crate::registry::ModuleRegistry;
use crate::value::DataValue;

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed(String),
    Crashed(String),
    Skipped(String),
    Cancelled,
    NotStarted,
}

impl NodeStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, NodeStatus::Succeeded)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub instance_id: String,
    pub module_type: String,
    pub status: NodeStatus,
    /// Values merged into the context on behalf of this node.
    pub outputs: usize,
    pub warnings: Vec<String>,
}

impl NodeReport {
    fn pending(instance_id: &str, module_type: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            module_type: module_type.to_string(),
            status: NodeStatus::NotStarted,
            outputs: 0,
            warnings: Vec::new(),
        }
    }

    fn failure(&self) -> Option<NodeFailure> {
        let kind = match &self.status {
            NodeStatus::Succeeded => return None,
            NodeStatus::Failed(msg) => FailureKind::Execute(msg.clone()),
            NodeStatus::Crashed(msg) => FailureKind::Crashed(msg.clone()),
            NodeStatus::Skipped(msg) => FailureKind::Unreachable(msg.clone()),
            NodeStatus::Cancelled | NodeStatus::NotStarted => FailureKind::Cancelled,
        };
        Some(NodeFailure {
            instance: self.instance_id.clone(),
            kind,
        })
    }
}

/// Everything a run produced. `context` is always present, even when `error` is set.
#[derive(Debug)]
pub struct RunOutcome {
    pub context: DataContext,
    pub nodes: Vec<NodeReport>,
    pub error: Option<RunError>,
}

impl RunOutcome {
    pub fn node(&self, instance_id: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|node| node.instance_id == instance_id)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<DataContext, RunError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.context),
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ModuleRegistry>,
    dag: DagDefinition,
    grace_period: Duration,
}

impl Orchestrator {
    pub fn new(registry: Arc<ModuleRegistry>, dag: DagDefinition) -> Self {
        Self {
            registry,
            dag,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// How long in-flight modules may keep running after cancellation.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub fn dag(&self) -> &DagDefinition {
        &self.dag
    }

    pub fn plan(&self) -> Result<ExecutionPlan, DagError> {
        ExecutionPlan::build(&self.dag, &self.registry)
    }

    pub async fn run(
        &self,
        cancel: CancellationToken,
        initial_inputs: BTreeMap<String, DataValue>,
    ) -> RunOutcome {
        let mut context = DataContext::new();
        for (key, value) in initial_inputs {
            context.set_initial(&key, value);
        }
        let seeded: BTreeSet<String> = context.keys().map(str::to_string).collect();

        let plan = match self.plan() {
            Ok(plan) => plan,
            Err(err) => {
                error!(dag = %self.dag.name, error = %err, "DAG rejected");
                return RunOutcome {
                    context,
                    nodes: Vec::new(),
                    error: Some(err.into()),
                };
            }
        };

        let mut reports: Vec<NodeReport> = plan
            .nodes
            .iter()
            .map(|node| NodeReport::pending(node.instance_id(), &node.config.module_type))
            .collect();

        info!(
            dag = %self.dag.name,
            nodes = plan.nodes.len(),
            layers = plan.layers.len(),
            "run started"
        );

        for (layer_idx, layer) in plan.layers.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(layer = layer_idx, "run cancelled, remaining layers abandoned");
                break;
            }

            let mut runnable: Vec<usize> = Vec::with_capacity(layer.len());
            for &idx in layer {
                match unreachable_reason(&plan, idx, &reports, &seeded) {
                    Some(reason) => {
                        warn!(instance = plan.nodes[idx].instance_id(), %reason, "node skipped");
                        reports[idx].status = NodeStatus::Skipped(reason);
                    }
                    None => runnable.push(idx),
                }
            }

            let mut instances: Vec<(usize, Box<dyn Module>)> = Vec::with_capacity(runnable.len());
            for idx in runnable {
                let node = &plan.nodes[idx];
                let mut module = match self.registry.create(&node.config.module_type) {
                    Ok(module) => module,
                    Err(source) => {
                        let err = DagError::UnknownModuleType {
                            instance: node.instance_id().to_string(),
                            source,
                        };
                        return RunOutcome {
                            context,
                            nodes: reports,
                            error: Some(err.into()),
                        };
                    }
                };

                if let Err(source) = module.init(node.instance_id(), &node.config.config) {
                    error!(instance = node.instance_id(), error = %source, "module initialisation failed");
                    return RunOutcome {
                        context,
                        nodes: reports,
                        error: Some(RunError::Init {
                            instance: node.instance_id().to_string(),
                            source,
                        }),
                    };
                }
                instances.push((idx, module));
            }

            if instances.is_empty() {
                continue;
            }

            info!(layer = layer_idx, modules = instances.len(), "executing layer");
            self.run_layer(&plan, instances, &mut context, &mut reports, &cancel)
                .await;
        }

        let failures: Vec<NodeFailure> = reports.iter().filter_map(NodeReport::failure).collect();
        let error = if cancel.is_cancelled() {
            Some(RunError::Cancelled { failures })
        } else if !failures.is_empty() {
            Some(RunError::Partial { failures })
        } else {
            None
        };

        match &error {
            None => info!(dag = %self.dag.name, keys = context.len(), "run finished"),
            Some(err) => warn!(dag = %self.dag.name, keys = context.len(), error = %err, "run finished with errors"),
        }

        RunOutcome {
            context,
            nodes: reports,
            error,
        }
    }

    async fn run_layer(
        &self,
        plan: &ExecutionPlan,
        instances: Vec<(usize, Box<dyn Module>)>,
        context: &mut DataContext,
        reports: &mut [NodeReport],
        cancel: &CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ModuleOutput>();
        let mut tasks: JoinSet<Result<(), ModuleError>> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();
        let index_of: HashMap<&str, usize> = plan
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.instance_id(), idx))
            .collect();

        for (idx, module) in instances {
            let node = &plan.nodes[idx];
            let inputs = context.snapshot_for(&node.metadata.consumes);
            let sink = OutputSink::new(node.instance_id(), tx.clone());
            let token = cancel.child_token();
            let span = info_span!(
                "module",
                instance = node.instance_id(),
                module = %node.config.module_type
            );

            let handle = tasks.spawn(
                async move { module.execute(token, inputs, sink).await }.instrument(span),
            );
            in_flight.insert(handle.id(), idx);
        }
        drop(tx);

        let mut grace_deadline: Option<Instant> = None;
        loop {
            let grace_timer = async {
                match grace_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                Some(output) = rx.recv() => {
                    merge_output(plan, &index_of, context, reports, output);
                }
                joined = tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (id, status) = match joined {
                        Ok((id, Ok(()))) => (id, NodeStatus::Succeeded),
                        Ok((id, Err(ModuleError::Cancelled))) => (id, NodeStatus::Cancelled),
                        Ok((id, Err(err))) => (id, NodeStatus::Failed(err.to_string())),
                        Err(err) => (err.id(), NodeStatus::Crashed(err.to_string())),
                    };
                    if let Some(idx) = in_flight.remove(&id) {
                        match &status {
                            NodeStatus::Succeeded => info!(instance = plan.nodes[idx].instance_id(), "module finished"),
                            other => warn!(instance = plan.nodes[idx].instance_id(), status = ?other, "module did not succeed"),
                        }
                        reports[idx].status = status;
                    }
                }
                _ = cancel.cancelled(), if grace_deadline.is_none() => {
                    info!(grace_ms = self.grace_period.as_millis() as u64, "cancellation requested, waiting for in-flight modules");
                    grace_deadline = Some(Instant::now() + self.grace_period);
                }
                _ = grace_timer => {
                    warn!(remaining = in_flight.len(), "grace period elapsed, abandoning modules");
                    tasks.detach_all();
                    break;
                }
            }
        }

        for (_, idx) in in_flight.drain() {
            reports[idx].status = NodeStatus::Cancelled;
        }

        while let Ok(output) = rx.try_recv() {
            merge_output(plan, &index_of, context, reports, output);
        }
    }
}

/// Why node `idx` can never get the inputs it requires, if that is the case.
fn unreachable_reason(
    plan: &ExecutionPlan,
    idx: usize,
    reports: &[NodeReport],
    seeded: &BTreeSet<String>,
) -> Option<String> {
    let node = &plan.nodes[idx];

    for &dep in &node.explicit {
        if !reports[dep].status.is_success() {
            return Some(format!(
                "unreachable dependency: `{}` did not succeed",
                plan.nodes[dep].instance_id()
            ));
        }
    }

    for entry in node.metadata.required_inputs() {
        let producers: Vec<usize> = plan
            .producers_of(&entry.key)
            .iter()
            .copied()
            .filter(|&producer| producer != idx)
            .collect();

        if producers.is_empty() {
            if seeded.contains(&entry.key) {
                continue;
            }
            return Some(format!(
                "unreachable dependency: required input `{}` has no producer",
                entry.key
            ));
        }

        if let Some(&failed) = producers
            .iter()
            .find(|&&producer| !reports[producer].status.is_success())
        {
            return Some(format!(
                "unreachable dependency: `{}` producing `{}` did not succeed",
                plan.nodes[failed].instance_id(),
                entry.key
            ));
        }
    }

    None
}

fn merge_output(
    plan: &ExecutionPlan,
    index_of: &HashMap<&str, usize>,
    context: &mut DataContext,
    reports: &mut [NodeReport],
    output: ModuleOutput,
) {
    let Some(&idx) = index_of.get(output.from_module.as_str()) else {
        warn!(from = %output.from_module, "output from unknown instance dropped");
        return;
    };
    let report = &mut reports[idx];

    if let Some(err) = &output.error {
        debug!(
            instance = %output.from_module,
            key = %output.data_key,
            target = output.target.as_deref().unwrap_or("-"),
            error = %err,
            "module reported a failure"
        );
        let scope = output.target.as_deref().unwrap_or(&output.data_key);
        report.warnings.push(format!("{scope}: {err}"));
    }

    let Some(value) = output.data else { return };

    let Some(entry) = plan.nodes[idx].metadata.produced(&output.data_key) else {
        warn!(instance = %output.from_module, key = %output.data_key, "undeclared output key, value dropped");
        report
            .warnings
            .push(format!("undeclared output key `{}`", output.data_key));
        return;
    };

    if value.value_type() != entry.value_type {
        warn!(
            instance = %output.from_module,
            key = %output.data_key,
            expected = %entry.value_type,
            actual = %value.value_type(),
            "output type mismatch, value dropped"
        );
        report.warnings.push(format!(
            "`{}` expects {} but got {}",
            output.data_key,
            entry.value_type,
            value.value_type()
        ));
        return;
    }

    match context.merge(&output.data_key, entry.cardinality, value) {
        Ok(()) => report.outputs += 1,
        Err(conflict) => {
            warn!(instance = %output.from_module, error = %conflict, "cardinality conflict, value dropped");
            report.warnings.push(conflict.to_string());
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
