mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "rowflow",
    version,
    about = "Row-oriented ETL pipelines with streaming grouping and dimension lookups"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline
    Run {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
        /// Print the result as a single JSON document instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Validate a pipeline file and print its topology
    Check {
        /// Path to pipeline YAML file
        pipeline: PathBuf,
    },
    /// List the built-in step types
    Steps,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { pipeline, json } => commands::run::execute(&pipeline, json).await,
        Commands::Check { pipeline } => commands::check::execute(&pipeline),
        Commands::Steps => {
            commands::steps::execute();
            Ok(())
        }
    }
}
