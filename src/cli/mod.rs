//! CLI interface and argument parsing

pub mod commands;

use clap::{Parser, Subcommand};

/// Strata - multi-source geospatial ingestion pipeline
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(version, about, long_about = None)]
#[command(author = "Strata Contributors")]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "strata.toml", env = "STRATA_CONFIG")]
    pub config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "STRATA_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest the configured sources into the warehouse
    Run(commands::run::RunArgs),

    /// Validate configuration file
    ValidateConfig(commands::validate::ValidateArgs),

    /// Show checkpoints and failure counts per source
    Status(commands::status::StatusArgs),
}
