mod clear;
mod cli;
mod reconcile;

use anyhow::Context;
use clap::Parser;
use log::LevelFilter;
use lore_engine::EngineConfig;
use lore_logging::{lore_debug, lore_info};

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    lore_logging::initialize_with_file(cli.log, level, &cli.log_file);
    lore_info!("lore starting");

    let config = EngineConfig::load(&cli.config)
        .with_context(|| format!("could not load {}", cli.config.display()))?;
    lore_debug!("config: {:?}", config);

    match cli.command {
        Command::Reconcile(args) => {
            reconcile::run(&args, &config.reconcile)?;
        }
        Command::Clear(args) => {
            clear::run(&args, &config).await?;
        }
    }
    Ok(())
}
