use anyhow::Result;
use clap::{Parser, Subcommand};
use tally_core::RunnerOptions;

mod collectors;
mod commands;

/// Tally - A plugin-based metrics collection runtime
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Run and inspect Tally metric collectors")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the bundled collectors
    List,
    /// Show what a collector declares during Define
    Define {
        /// Collector name, as shown by `tally list`
        collector: String,

        /// Print the definitions as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a collector against the local debug host
    Run {
        /// Collector name, as shown by `tally list`
        collector: String,

        /// Print records as JSON lines instead of a readable listing
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        options: RunnerOptions,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::List => commands::list::execute(),
        Commands::Define { collector, json } => commands::define::execute(&collector, json),
        Commands::Run {
            collector,
            json,
            options,
        } => commands::run::execute(&collector, json, &options).await,
    }
}
