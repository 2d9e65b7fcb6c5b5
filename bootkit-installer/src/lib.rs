//! bootkit: the operator binary.
//!
//! Loads a manifest (the bundled Ubuntu bootstrap unless `--manifest` is
//! given), resolves it for the probed platform, binds the built-in providers
//! and hands the plan to the workflow executor.

pub mod cancel;
pub mod cli;
pub mod fetch;
pub mod lock;
pub mod providers;
pub mod run;
pub mod settings;

use bootkit_core::logging;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

pub fn run() -> anyhow::Result<ExitCode> {
    let cli = cli::Cli::parse();

    let log_path = cli.log_file.clone().or_else(|| {
        (cli.command == cli::Command::Apply && !cli.dry_run)
            .then(|| PathBuf::from(logging::DEFAULT_LOG_PATH))
    });
    logging::init(cli.verbose, log_path.as_deref());

    if cli.dry_run {
        log::info!("DRY RUN: no changes will be made");
    }
    run::dispatch(&cli)
}
