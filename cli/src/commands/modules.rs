use std::process::ExitCode;

use colored::*;
use vigil_core::{DataContractEntry, ModuleMetadata};

use crate::commands::run;
use crate::terminal::{colors, print};
use crate::vprint;

type Detail = (String, ColoredString);

pub fn modules() -> anyhow::Result<ExitCode> {
    let registry = run::builtin_registry()?;

    print::header("registered modules");
    let types: Vec<&str> = registry.types().collect();
    for (idx, type_name) in types.iter().enumerate() {
        let meta = registry.metadata(type_name)?;
        print::tree_head(idx, &format!("{} v{}", meta.name, meta.version));
        print::as_tree_one_level(&details(meta));
        if idx + 1 != types.len() {
            vprint!();
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn details(meta: &ModuleMetadata) -> Vec<Detail> {
    let mut details: Vec<Detail> = vec![
        ("Kind".to_string(), meta.kind.to_string().color(colors::ACCENT)),
        ("About".to_string(), meta.description.normal()),
    ];
    for entry in &meta.consumes {
        details.push(("Consumes".to_string(), contract(entry)));
    }
    for entry in &meta.produces {
        details.push(("Produces".to_string(), contract(entry)));
    }
    for (key, about) in &meta.config_schema {
        details.push((format!("config.{key}"), about.color(colors::SEPARATOR)));
    }
    details
}

fn contract(entry: &DataContractEntry) -> ColoredString {
    let optional = if entry.optional { " (optional)" } else { "" };
    format!(
        "{} {:?}<{}>{}",
        entry.key, entry.cardinality, entry.value_type, optional
    )
    .color(colors::PRIMARY)
}
