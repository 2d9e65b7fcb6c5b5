//! Effective run settings.
//!
//! Precedence is flag, then environment (folded into the flag by clap), then
//! the manifest's `[settings]`, then the built-in default.

use crate::cli::Cli;
use bootkit_core::config::Settings;
use bootkit_core::install_report::DEFAULT_REPORT_PATH;
use bootkit_workflow::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_STATE_PATH: &str = "/var/lib/bootkit/state.json";
pub const DEFAULT_LOCK_PATH: &str = "/run/lock/bootkit.lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub state: PathBuf,
    pub report: PathBuf,
    pub lock: PathBuf,
}

pub fn run_paths(cli: &Cli, settings: &Settings) -> RunPaths {
    RunPaths {
        state: cli
            .state
            .clone()
            .or_else(|| settings.state_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_PATH)),
        report: cli
            .report
            .clone()
            .or_else(|| settings.report_path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_PATH)),
        lock: cli
            .lock
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_PATH)),
    }
}

pub fn retry_policy(settings: &Settings) -> RetryPolicy {
    let defaults = RetryPolicy::default();
    RetryPolicy {
        max_attempts: settings.max_attempts.unwrap_or(defaults.max_attempts),
        initial_backoff: settings
            .initial_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff),
        max_backoff: settings
            .max_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff),
    }
}
