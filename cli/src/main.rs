mod commands;
mod terminal;

use std::process::ExitCode;

use commands::{CommandLine, Commands, dag, modules, run, scan};
use terminal::{logging, print};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let commands = CommandLine::parse_args();

    logging::init_logging(commands.verbose, commands.quiet);
    print::title();

    let result = match commands.command {
        Commands::Scan(args) => scan::scan(args).await,
        Commands::Run(args) => run::run(args).await,
        Commands::Dag(command) => dag::dag(command),
        Commands::Modules => modules::modules(),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}
