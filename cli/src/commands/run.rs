use std::collections::BTreeMap;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_core::{DagDefinition, DataValue, ModuleRegistry, Orchestrator, RunOutcome};
use vigil_plugins::keys;

use crate::commands::{RunArgs, RunControl};
use crate::terminal::{print, report};

/// Loads a DAG file and runs it with any seeded inputs.
pub async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let dag = DagDefinition::load(&args.file)?;

    let mut inputs: BTreeMap<String, DataValue> = BTreeMap::new();
    if !args.targets.is_empty() {
        inputs.insert(
            keys::CONFIG_TARGETS.to_string(),
            DataValue::TextList(args.targets.clone()),
        );
    }
    if let Some(ports) = &args.ports {
        inputs.insert(keys::CONFIG_PORTS.to_string(), DataValue::from(ports.as_str()));
    }

    execute(dag, inputs, &args.run).await
}

/// Registry holding every built-in module type.
pub fn builtin_registry() -> anyhow::Result<ModuleRegistry> {
    let mut registry = ModuleRegistry::new();
    vigil_plugins::register_builtin(&mut registry).context("registering built-in modules")?;
    Ok(registry)
}

/// Runs `dag` to completion (or cancellation) and reports the outcome.
pub async fn execute(
    dag: DagDefinition,
    inputs: BTreeMap<String, DataValue>,
    control: &RunControl,
) -> anyhow::Result<ExitCode> {
    let registry = Arc::new(builtin_registry()?);
    let orchestrator = Orchestrator::new(registry, dag)
        .with_grace_period(Duration::from_secs(control.grace));

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());
    if let Some(secs) = control.max_duration {
        spawn_deadline(cancel.clone(), Duration::from_secs(secs));
    }

    info!(
        "running `{}` ({} nodes)",
        orchestrator.dag().name,
        orchestrator.dag().nodes.len()
    );
    let start_time = Instant::now();
    let outcome = orchestrator.run(cancel.clone(), inputs).await;
    let elapsed = start_time.elapsed();
    cancel.cancel();

    if control.json {
        report::render_json(&outcome)?;
    } else {
        report::render(&outcome, elapsed);
        print::end_of_program();
    }

    Ok(exit_code(&outcome))
}

/// 0 on success, 1 when some nodes failed, 2 when the run never got going,
/// 130 when it was cancelled.
pub fn exit_code(outcome: &RunOutcome) -> ExitCode {
    match &outcome.error {
        None => ExitCode::SUCCESS,
        Some(err) if err.is_cancelled() => ExitCode::from(130),
        Some(err) if err.is_fatal() => ExitCode::from(2),
        Some(_) => ExitCode::from(1),
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    warn!("interrupted, stopping running modules");
                    cancel.cancel();
                }
            }
        }
    });
}

fn spawn_deadline(cancel: CancellationToken, limit: Duration) {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                warn!("maximum duration of {}s reached, cancelling", limit.as_secs());
                cancel.cancel();
            }
        }
    });
}
