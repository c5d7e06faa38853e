mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tidewater", version, about = "Stage, verify and merge tabular data into SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a load task
    Run {
        /// Path to task YAML file
        task: PathBuf,
        /// Run-history database
        #[arg(long, default_value = ".tidewater/runs.db")]
        state_db: PathBuf,
    },
    /// Validate a task and open its connections
    Check {
        /// Path to task YAML file
        task: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { task, state_db } => commands::run::execute(&task, &state_db).await,
        Commands::Check { task } => commands::check::execute(&task),
    }
}
