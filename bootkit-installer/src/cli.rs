//! CLI argument parsing for bootkit

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bootkit", version)]
#[command(about = "Declarative, idempotent bootstrap for Ubuntu servers")]
#[command(long_about = "Declarative, idempotent bootstrap for Ubuntu servers\n\n\
    Steps come from a TOML manifest (a bundled default covers dotnet, MongoDB, Caddy,\n\
    ufw, swap, fail2ban and python tooling). Completed steps are recorded and skipped\n\
    on the next run unless their declaration changed.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Manifest to load instead of the bundled Ubuntu bootstrap
    #[arg(short, long, global = true)]
    pub manifest: Option<PathBuf>,

    /// State file (completed-step records)
    #[arg(long, global = true, env = "BOOTKIT_STATE_PATH")]
    pub state: Option<PathBuf>,

    /// Where the JSON run report is written
    #[arg(long, global = true, env = "BOOTKIT_REPORT_PATH")]
    pub report: Option<PathBuf>,

    /// Lock file that serialises runs on one host
    #[arg(long, global = true)]
    pub lock: Option<PathBuf>,

    /// Target root that provider file writes are relative to
    #[arg(long, default_value = "/", global = true)]
    pub root: PathBuf,

    /// Override the detected OS codename (e.g. jammy)
    #[arg(long, global = true)]
    pub codename: Option<String>,

    /// Override the detected Debian architecture (e.g. arm64)
    #[arg(long, global = true)]
    pub arch: Option<String>,

    /// Show what would run without changing the host or the state file
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Log file (defaults to /var/log/bootkit/bootkit.log for apply)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Print the ordered execution plan
    Plan,

    /// Apply every pending step
    Apply,

    /// Show which steps are applied, pending or changed
    Status,

    /// Drop a step's record so the next apply runs it again
    Forget {
        /// Step name
        name: String,
    },
}
