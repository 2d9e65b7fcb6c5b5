//! Third-party apt repositories (MongoDB, Caddy, ...).
//!
//! The signing key is downloaded to `/etc/apt/keyrings/<name>.asc` and the
//! source entry is pinned to it with `signed-by`, so the key only vouches for
//! this one repository.

use super::file::{io_failure, write_file_atomic};
use super::{run, APT_TIMEOUT};
use crate::fetch::KeyFetcher;
use crate::providers::apt::APT_ENV;
use anyhow::bail;
use bootkit_core::{Action, ActionContext, ActionError, ActionResult, Applied};
use bootkit_hal::CommandOptions;
use serde::Deserialize;
use std::fs;
use std::sync::Arc;

const ARMORED_KEY_HEADER: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptRepoParams {
    pub name: String,
    pub key_url: String,
    pub uri: String,
    pub suite: String,
    #[serde(default)]
    pub components: Vec<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

pub struct AptRepoProvider {
    params: AptRepoParams,
    fetcher: Arc<dyn KeyFetcher>,
}

impl AptRepoProvider {
    pub fn new(params: AptRepoParams, fetcher: Arc<dyn KeyFetcher>) -> anyhow::Result<Self> {
        if params.name.is_empty()
            || !params
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            bail!("invalid repository name {:?}", params.name);
        }
        if !params.key_url.starts_with("https://") && !params.key_url.starts_with("http://") {
            bail!("key_url must be an http(s) URL: {}", params.key_url);
        }
        Ok(Self { params, fetcher })
    }

    pub fn keyring_path(&self) -> String {
        format!("/etc/apt/keyrings/{}.asc", self.params.name)
    }

    pub fn list_path(&self) -> String {
        format!("/etc/apt/sources.list.d/{}.list", self.params.name)
    }

    /// One-line-style source entry.
    pub fn source_line(&self) -> String {
        let mut options = Vec::new();
        if let Some(arch) = &self.params.arch {
            options.push(format!("arch={}", arch));
        }
        options.push(format!("signed-by={}", self.keyring_path()));

        let mut line = format!(
            "deb [{}] {} {}",
            options.join(" "),
            self.params.uri,
            self.params.suite
        );
        for component in &self.params.components {
            line.push(' ');
            line.push_str(component);
        }
        line.push('\n');
        line
    }
}

impl Action for AptRepoProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let keyring = ctx.host_path(&self.keyring_path());
        let list = ctx.host_path(&self.list_path());

        if ctx.dry_run {
            log::info!(
                "DRY RUN: {}: would fetch {} into {}",
                ctx.step,
                self.params.key_url,
                keyring.display()
            );
            log::info!(
                "DRY RUN: {}: would write {}: {}",
                ctx.step,
                list.display(),
                self.source_line().trim_end()
            );
        } else {
            let key = self.fetcher.fetch(&self.params.key_url)?;
            if !String::from_utf8_lossy(&key).contains(ARMORED_KEY_HEADER) {
                return Err(ActionError::permanent(format!(
                    "{} is not an ASCII-armored PGP public key",
                    self.params.key_url
                )));
            }
            write_file_atomic(&keyring, &key, Some(0o644))
                .map_err(|err| io_failure(&keyring, err))?;
            write_file_atomic(&list, self.source_line().as_bytes(), Some(0o644))
                .map_err(|err| io_failure(&list, err))?;
            log::info!("{}: added apt source {}", ctx.step, list.display());
        }

        run(
            ctx,
            "apt-get",
            &["update"],
            CommandOptions {
                cwd: None,
                env: APT_ENV,
            },
            APT_TIMEOUT,
        )?;
        Ok(Applied::Done)
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        let list = fs::read_to_string(ctx.host_path(&self.list_path())).unwrap_or_default();
        Ok(list == self.source_line() && ctx.host_path(&self.keyring_path()).is_file())
    }

    fn describe(&self) -> String {
        format!("add apt repository {} ({})", self.params.name, self.params.uri)
    }
}
