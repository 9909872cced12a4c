//! BKE cluster acceptance CLI library

pub mod commands;
pub mod config;
pub mod error;
pub mod orchestrator;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// bke-accept - Lifecycle acceptance tests for BKE clusters
#[derive(Parser, Debug)]
#[command(name = "bke-accept")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file (default: $BKE_ACCEPT_CONFIG or ~/.bke-accept/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a cluster and run deploy, component, scale and delete checks
    Run(commands::run::RunArgs),
    /// Print node or pod tables
    Get(commands::get::GetArgs),
    /// Preview a cluster spec edit without applying it
    Patch(commands::patch::PatchArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = self.config.as_deref();
        match self.command {
            Commands::Run(args) => commands::run::run(args, config).await,
            Commands::Get(args) => commands::get::run(args, config).await,
            Commands::Patch(args) => commands::patch::run(args, config).await,
        }
    }
}
