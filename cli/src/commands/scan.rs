use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use vigil_core::DagDefinition;
use vigil_plugins::ScanIntent;

use crate::commands::{ScanArgs, run};
use crate::terminal::print;

pub async fn scan(args: ScanArgs) -> anyhow::Result<ExitCode> {
    let intent = intent_from(&args);
    intent.validate()?;

    let dag = intent.to_dag();
    if let Some(path) = &args.export_dag {
        let registry = run::builtin_registry()?;
        write_dag(dag, &registry, path)?;
        info!("scan DAG written to {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    print::header("scan plan");
    print::aligned_line("Targets", 7, intent.targets.join(", "));
    print::aligned_line(
        "Ports",
        7,
        intent.ports.clone().unwrap_or_else(|| "top ports".to_string()),
    );
    print::aligned_line("Steps", 7, dag.description.clone());

    run::execute(dag, intent.initial_inputs(), &args.run).await
}

fn intent_from(args: &ScanArgs) -> ScanIntent {
    ScanIntent {
        ports: args.ports.clone(),
        ping: !args.no_ping,
        banners: !args.no_banner,
        concurrency: args.concurrency,
        timeout: args.timeout.map(Duration::from_millis),
        ..ScanIntent::new(args.targets.clone())
    }
}

pub fn write_dag(
    mut dag: DagDefinition,
    registry: &vigil_core::ModuleRegistry,
    path: &std::path::Path,
) -> anyhow::Result<()> {
    dag.annotate(registry);
    let json = dag.to_json()?;
    std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
