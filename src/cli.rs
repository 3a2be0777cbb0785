use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use crate::config::Config;
use crate::harness;
use crate::report::summary_lines;

#[derive(Parser)]
#[command(name = "ciload")]
#[command(author, version, about = "Workflow dispatch load-test harness", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./ciload.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, env = "GITHUB_TOKEN")]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a named test profile end to end
    Run {
        /// Profile name from the configuration file
        profile: String,
    },
    /// Re-analyze a persisted tracking report
    Analyze {
        /// Test run id, or "latest"
        #[arg(default_value = "latest")]
        test_run_id: String,
    },
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        let token = self.token.as_deref();

        let report = match &self.command {
            Commands::Run { profile } => {
                info!("Running profile '{}'", profile);
                harness::run_profile(&config, profile, token).await?
            }
            Commands::Analyze { test_run_id } => {
                info!("Re-analyzing test run '{}'", test_run_id);
                harness::analyze_tracking(&config, test_run_id, token).await?
            }
        };

        for line in summary_lines(&report) {
            println!("{line}");
        }

        Ok(())
    }
}
