mod analyzer;
mod cli;
mod config;
mod dispatch;
mod error;
mod generator;
mod github;
mod harness;
mod metrics;
mod record;
mod report;
mod tracker;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting ciload - workflow dispatch load-test harness");
    cli.execute().await?;

    Ok(())
}
