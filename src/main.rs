use crate::cli::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod analysis;
mod cli;
mod commands;
mod config;
mod error;
mod neuro;
mod sim;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { config, out } => commands::run::run(&config, &out)?,
        Commands::Distances {
            config,
            class,
            only,
            bands,
        } => commands::distances::run(&config, class, only, bands)?,
        Commands::Plot { input, output } => commands::plot::run(&input, &output)?,
        Commands::Compare { inputs } => commands::compare::run(inputs)?,
    }

    Ok(())
}
