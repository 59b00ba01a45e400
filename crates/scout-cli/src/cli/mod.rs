//! CLI for the scout city collection runner.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scout_core::config;
use std::path::PathBuf;

use commands::{run_budgets, run_config, run_job};

/// Top-level CLI for scout.
#[derive(Debug, Parser)]
#[command(name = "scout")]
#[command(about = "scout: budgeted per-city location and source collection", long_about = None)]
pub struct Cli {
    /// Config file to use instead of ~/.config/scout/config.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run one city job through the pipeline and write JSONL results.
    Run {
        /// Job file (JSON).
        job: PathBuf,
        /// Output file (default: output/<city>-results.jsonl).
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Print the resolved configuration (file + environment overrides).
    Config,

    /// Show connector buckets and the primary/secondary split.
    Budgets,
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::resolve(cli.config.as_deref())?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Run { job, output } => run_job(&cfg, &job, output.as_deref()).await?,
            CliCommand::Config => run_config(&cfg)?,
            CliCommand::Budgets => run_budgets(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
