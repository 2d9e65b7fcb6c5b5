use super::{run, DEFAULT_COMMAND_TIMEOUT_SECS, PROBE_TIMEOUT};
use anyhow::bail;
use bootkit_core::{Action, ActionContext, ActionResult, Applied};
use bootkit_hal::CommandOptions;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

fn default_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandParams {
    pub argv: Vec<String>,
    /// Probe; exit 0 means the command's effect is already in place.
    #[serde(default)]
    pub unless: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Runs an arbitrary argv; the escape hatch for one-off script steps.
#[derive(Debug)]
pub struct CommandProvider {
    params: CommandParams,
}

impl CommandProvider {
    pub fn new(params: CommandParams) -> anyhow::Result<Self> {
        if params.argv.is_empty() {
            bail!("command argv is empty");
        }
        if matches!(&params.unless, Some(unless) if unless.is_empty()) {
            bail!("command unless is empty");
        }
        Ok(Self { params })
    }

    fn already_satisfied(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        let Some(unless) = &self.params.unless else {
            return Ok(false);
        };
        let args: Vec<&str> = unless[1..].iter().map(String::as_str).collect();
        Ok(ctx.hal.command_succeeds(&unless[0], &args, PROBE_TIMEOUT)?)
    }
}

impl Action for CommandProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        if !ctx.dry_run && self.already_satisfied(ctx)? {
            log::info!("{}: unless-probe passed, nothing to do", ctx.step);
            return Ok(Applied::Done);
        }

        let env: Vec<(&str, &str)> = self
            .params
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let cwd = self.params.cwd.as_deref();
        let args: Vec<&str> = self.params.argv[1..].iter().map(String::as_str).collect();

        run(
            ctx,
            &self.params.argv[0],
            &args,
            CommandOptions { cwd, env: &env },
            Duration::from_secs(self.params.timeout_secs),
        )?;
        Ok(Applied::Done)
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        if self.params.unless.is_none() {
            return Ok(true);
        }
        self.already_satisfied(ctx)
    }

    fn describe(&self) -> String {
        format!("run {}", self.params.argv.join(" "))
    }
}
