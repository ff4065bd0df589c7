pub mod dag;
pub mod modules;
pub mod run;
pub mod scan;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "A modular network scanner driven by a dependency graph.")]
#[command(version)]
pub struct CommandLine {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only print results
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover hosts, open ports and banners
    #[command(alias = "s")]
    Scan(ScanArgs),
    /// Run a DAG loaded from a JSON file
    #[command(alias = "r")]
    Run(RunArgs),
    /// Validate or export DAG files
    #[command(subcommand)]
    Dag(DagCommand),
    /// List the registered module types
    #[command(alias = "m")]
    Modules,
}

#[derive(Args, Debug, Clone)]
pub struct ScanArgs {
    /// Targets: addresses, ranges (10.0.0.1-50) or CIDR blocks, comma separated
    #[arg(required = true, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Ports to probe, e.g. 22,80,8000-8100 (default: top ports)
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Skip ICMP host discovery and scan every target
    #[arg(long)]
    pub no_ping: bool,

    /// Skip banner grabbing
    #[arg(long)]
    pub no_banner: bool,

    /// Concurrent probes per module
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Per-probe timeout in milliseconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    #[command(flatten)]
    pub run: RunControl,

    /// Write the planned DAG to this file instead of running it
    #[arg(long, value_name = "FILE")]
    pub export_dag: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// DAG file
    pub file: PathBuf,

    /// Seed `config.targets`
    #[arg(long, value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Seed `config.ports`
    #[arg(long)]
    pub ports: Option<String>,

    #[command(flatten)]
    pub run: RunControl,
}

/// Knobs shared by everything that executes a DAG.
#[derive(Args, Debug, Clone)]
pub struct RunControl {
    /// Cancel the run after this many seconds
    #[arg(long, value_name = "SECS")]
    pub max_duration: Option<u64>,

    /// Seconds in-flight modules get to stop after cancellation
    #[arg(long, value_name = "SECS", default_value_t = 2)]
    pub grace: u64,

    /// Print the data context as JSON on stdout
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum DagCommand {
    /// Check a DAG file and print its execution layers
    Validate { file: PathBuf },
    /// Print (or write) a DAG file annotated with each node's data keys
    Export {
        /// DAG file to annotate; the default scan DAG when omitted
        file: Option<PathBuf>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
