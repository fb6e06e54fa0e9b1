//! Command-line interface for apk-indexer

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use apk_indexer::config::Config;

mod build;
mod keygen;
mod scan;

#[derive(Subcommand)]
pub enum Commands {
    /// Build the signed repository from a directory of packages
    Build(build::BuildArgs),

    /// List the packages a build would publish, without writing anything
    Scan {
        /// Directory to scan (defaults to the configured packages path)
        #[arg(env = "INPUT_PKGS_PATH")]
        path: Option<PathBuf>,
    },

    /// Generate a signing key pair and write a CI env file
    Keygen(keygen::KeygenArgs),
}

/// Execute a CLI command
pub fn execute(command: Commands, config: Config) -> Result<()> {
    match command {
        Commands::Build(args) => build::run(args, config),
        Commands::Scan { path } => scan::run(path, &config),
        Commands::Keygen(args) => keygen::run(args, &config),
    }
}
