//! Built-in provider kinds.
//!
//! A provider turns a step's rendered params into an [`Action`]. Params are
//! parsed when the registry is built, so a typo in the manifest fails the run
//! before anything touches the host.

pub mod apt;
pub mod apt_repo;
pub mod command;
pub mod fallback;
pub mod file;
pub mod service;
pub mod swap;

use crate::fetch::KeyFetcher;
use anyhow::{bail, Context};
use bootkit_core::config::ResolvedStep;
use bootkit_core::{ActionContext, ActionRef, ActionResult};
use bootkit_hal::CommandOptions;
use bootkit_workflow::ProviderRegistry;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const APT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
pub const SYSTEMCTL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 600;

pub const KINDS: &[&str] = &[
    "apt",
    "apt-repo",
    "command",
    "fallback",
    "file",
    "service",
    "swapfile",
];

#[derive(Clone)]
pub struct ProviderFactory {
    fetcher: Arc<dyn KeyFetcher>,
}

impl ProviderFactory {
    pub fn new(fetcher: Arc<dyn KeyFetcher>) -> Self {
        Self { fetcher }
    }

    pub fn build(&self, kind: &str, params: &Value) -> anyhow::Result<ActionRef> {
        let action: ActionRef = match kind {
            "apt" => Arc::new(apt::AptProvider::new(parse(kind, params)?)?),
            "apt-repo" => Arc::new(apt_repo::AptRepoProvider::new(
                parse(kind, params)?,
                Arc::clone(&self.fetcher),
            )?),
            "command" => Arc::new(command::CommandProvider::new(parse(kind, params)?)?),
            "fallback" => Arc::new(fallback::FallbackProvider::new(self, parse(kind, params)?)?),
            "file" => Arc::new(file::FileProvider::new(parse(kind, params)?)?),
            "service" => Arc::new(service::ServiceProvider::new(parse(kind, params)?)?),
            "swapfile" => Arc::new(swap::SwapfileProvider::new(parse(kind, params)?)?),
            other => bail!(
                "unknown provider kind {:?} (known: {})",
                other,
                KINDS.join(", ")
            ),
        };
        Ok(action)
    }
}

fn parse<T: DeserializeOwned>(kind: &str, params: &Value) -> anyhow::Result<T> {
    let params = match params {
        Value::Null => Value::Object(Default::default()),
        other => other.clone(),
    };
    serde_json::from_value(params).with_context(|| format!("invalid params for {} provider", kind))
}

/// Binds every resolved step to a freshly built provider.
pub fn build_registry(
    factory: &ProviderFactory,
    steps: &[ResolvedStep],
) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for step in steps {
        let action = factory
            .build(&step.provider, &step.spec.params)
            .with_context(|| format!("step {}", step.spec.name))?;
        registry.register(step.spec.name.clone(), action);
    }
    Ok(registry)
}

/// Runs a mutating command, or only logs it in dry-run mode.
pub(crate) fn run(
    ctx: &ActionContext<'_>,
    program: &str,
    args: &[&str],
    opts: CommandOptions<'_>,
    timeout: Duration,
) -> ActionResult<()> {
    if ctx.dry_run {
        log::info!("DRY RUN: {}: would run {} {}", ctx.step, program, args.join(" "));
        return Ok(());
    }
    log::debug!("{}: running {} {}", ctx.step, program, args.join(" "));
    ctx.hal.command_status_with(program, args, opts, timeout)?;
    Ok(())
}
