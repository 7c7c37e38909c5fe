mod catalog;
mod cds;
mod cli;
mod config;
mod error;
mod grid;
mod planner;
mod resolver;
mod stages;

use anyhow::{Error, Result};
use chrono::Utc;
use clap::Parser;
use tracing::info;

use catalog::Catalog;
use cds::CdsClient;
use cli::Cli;
use config::RunConfig;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    cli::init_logging(cli.log.as_deref())?;

    match run(&cli).await {
        Ok(()) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let started = std::time::Instant::now();
    let catalog = Catalog::new();
    let config = RunConfig::from_cli(cli, &catalog)?;
    config.log_parameters();

    let resolved = resolver::resolve_request(&catalog, &config.cvars)?;
    info!("download : {}", resolved.download.join(","));
    info!("compute  : {}", resolved.compute.join(","));

    let partitions = planner::plan(config.period.0, config.period.1, Utc::now().date_naive());
    info!("{} request partitions planned", partitions.len());

    let store = CdsClient::from_environment()?;
    stages::fetch::run(&config, &catalog, &store, &resolved, &partitions).await?;
    stages::format::run(&config, &catalog, &resolved)?;
    stages::derived::run(&config, &catalog, &resolved)?;
    stages::merge::run(&config)?;

    let elapsed = started.elapsed();
    println!(
        "Archive at `{}` updated in {:.1}s",
        config.archive_root.display(),
        elapsed.as_secs_f64()
    );
    Ok(())
}
