//! `spider` - scheduler database bootstrap, results-cache indexes and an
//! in-process simulator.

mod backends;
mod cli;
mod commands;
mod logging;

use anyhow::Result;
use tracing::error;

use crate::cli::Command;

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        error!(error = %err, "spider failed");
        eprintln!("error: {err:#}");
        std::process::exit(-1);
    }
}

async fn run_main() -> Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    match args.command {
        Command::InitDb(args) => commands::init_db::run(args).await,
        Command::CreateResultsCacheIndices(args) => commands::results_cache::run(args).await,
        Command::Simulate(args) => commands::simulate::run(args).await,
    }
}
