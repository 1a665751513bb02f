//! Command-line arguments.

use clap::Parser;
use std::path::PathBuf;

/// Compress vault media, move it to object storage and rewrite every link to it
#[derive(Parser, Debug)]
#[command(name = "vaultlift")]
#[command(version)]
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, env = "VAULTLIFT_CONFIG", default_value = "vaultlift.toml")]
    pub config: PathBuf,

    /// Vault to migrate (overrides `vault.path` from the configuration)
    #[arg(long)]
    pub vault: Option<PathBuf>,

    /// List the references that would be rewritten, change nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Print pipeline events as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    pub json_logs: bool,

    /// Print Prometheus metrics when the run ends
    #[arg(long)]
    pub metrics: bool,
}
