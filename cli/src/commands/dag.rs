use std::path::Path;
use std::process::ExitCode;

use colored::*;
use tracing::{error, info};
use vigil_core::{DagDefinition, ExecutionPlan};
use vigil_plugins::ScanIntent;

use crate::commands::{DagCommand, run, scan};
use crate::terminal::{colors, print};
use crate::vprint;

pub fn dag(command: DagCommand) -> anyhow::Result<ExitCode> {
    match command {
        DagCommand::Validate { file } => validate(&file),
        DagCommand::Export { file, output } => export(file.as_deref(), output.as_deref()),
    }
}

fn validate(file: &Path) -> anyhow::Result<ExitCode> {
    let dag = DagDefinition::load(file)?;
    let registry = run::builtin_registry()?;

    let plan = match ExecutionPlan::build(&dag, &registry) {
        Ok(plan) => plan,
        Err(err) => {
            error!("{}: {err}", file.display());
            return Ok(ExitCode::from(2));
        }
    };

    print::header(&format!("dag {}", dag.name));
    if !dag.description.is_empty() {
        print::print_status(&dag.description);
    }
    vprint!();
    for (idx, layer) in plan.layer_ids().iter().enumerate() {
        let details: Vec<(String, ColoredString)> = layer
            .iter()
            .map(|instance| {
                let module_type = dag
                    .find(instance)
                    .map(|node| node.module_type.as_str())
                    .unwrap_or("?");
                (instance.to_string(), module_type.color(colors::ACCENT))
            })
            .collect();
        print::tree_head(idx, "layer");
        print::as_tree_one_level(&details);
    }
    info!("{} is valid: {} nodes", file.display(), dag.nodes.len());
    Ok(ExitCode::SUCCESS)
}

fn export(file: Option<&Path>, output: Option<&Path>) -> anyhow::Result<ExitCode> {
    let registry = run::builtin_registry()?;
    let dag = match file {
        Some(path) => DagDefinition::load(path)?,
        None => ScanIntent::new(vec!["192.168.1.0/24".to_string()]).to_dag(),
    };

    match output {
        Some(path) => {
            scan::write_dag(dag, &registry, path)?;
            info!("DAG written to {}", path.display());
        }
        None => {
            let mut dag = dag;
            dag.annotate(&registry);
            println!("{}", dag.to_json()?);
        }
    }
    Ok(ExitCode::SUCCESS)
}
