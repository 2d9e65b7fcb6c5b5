use super::{run, APT_TIMEOUT, PROBE_TIMEOUT};
use anyhow::bail;
use bootkit_core::{Action, ActionContext, ActionResult, Applied};
use bootkit_hal::CommandOptions;
use serde::Deserialize;

pub const APT_ENV: &[(&str, &str)] = &[("DEBIAN_FRONTEND", "noninteractive")];

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AptParams {
    pub packages: Vec<String>,
    /// Refresh package lists before installing.
    #[serde(default)]
    pub update: bool,
    #[serde(default)]
    pub no_install_recommends: bool,
}

#[derive(Debug)]
pub struct AptProvider {
    params: AptParams,
}

impl AptProvider {
    pub fn new(params: AptParams) -> anyhow::Result<Self> {
        if params.packages.is_empty() {
            bail!("apt packages list is empty");
        }
        if let Some(bad) = params
            .packages
            .iter()
            .find(|p| p.is_empty() || p.starts_with('-'))
        {
            bail!("invalid package name {:?}", bad);
        }
        Ok(Self { params })
    }
}

/// `dpkg-query` status check for a single package.
pub fn is_installed(ctx: &ActionContext<'_>, package: &str) -> ActionResult<bool> {
    let output = ctx
        .hal
        .command_output("dpkg-query", &["-W", "-f=${Status}", package], PROBE_TIMEOUT)?;
    Ok(output.status.success()
        && String::from_utf8_lossy(&output.stdout).contains("install ok installed"))
}

impl Action for AptProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let opts = CommandOptions {
            cwd: None,
            env: APT_ENV,
        };
        if self.params.update {
            run(ctx, "apt-get", &["update"], opts, APT_TIMEOUT)?;
        }

        let mut args = vec!["install", "-y"];
        if self.params.no_install_recommends {
            args.push("--no-install-recommends");
        }
        args.extend(self.params.packages.iter().map(String::as_str));
        run(ctx, "apt-get", &args, opts, APT_TIMEOUT)?;
        Ok(Applied::Done)
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        for package in &self.params.packages {
            if !is_installed(ctx, package)? {
                log::warn!("{}: package {} is not installed", ctx.step, package);
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("apt install {}", self.params.packages.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::harness::Harness;
    use bootkit_hal::{FakeResponse, Operation};

    fn provider(packages: &[&str], update: bool) -> AptProvider {
        AptProvider::new(AptParams {
            packages: packages.iter().map(|s| s.to_string()).collect(),
            update,
            no_install_recommends: false,
        })
        .unwrap()
    }

    #[test]
    fn installs_noninteractively() {
        let h = Harness::new();
        provider(&["ufw", "fail2ban"], true)
            .apply(&h.ctx("base-packages", false))
            .unwrap();
        assert_eq!(
            h.hal.command_lines(),
            vec!["apt-get update", "apt-get install -y ufw fail2ban"]
        );
        assert!(h.hal.operations().iter().all(|op| matches!(
            op,
            Operation::Command { env, .. }
                if env == &vec![("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string())]
        )));
    }

    #[test]
    fn verify_checks_every_package() {
        let h = Harness::new();
        h.hal
            .respond("dpkg-query -W -f=${Status} ufw", FakeResponse::ok("install ok installed"));
        h.hal.respond(
            "dpkg-query -W -f=${Status} fail2ban",
            FakeResponse::ok("deinstall ok config-files"),
        );
        let ctx = h.ctx("base-packages", false);
        assert!(provider(&["ufw"], false).verify(&ctx).unwrap());
        assert!(!provider(&["ufw", "fail2ban"], false).verify(&ctx).unwrap());
    }

    #[test]
    fn failed_install_is_retryable() {
        let h = Harness::new();
        h.hal.fail_times("apt-get install", 1);
        let err = provider(&["mongodb-org"], false)
            .apply(&h.ctx("mongodb", false))
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn rejects_option_like_package_names() {
        assert!(AptProvider::new(AptParams {
            packages: vec!["--purge".into()],
            update: false,
            no_install_recommends: false,
        })
        .is_err());
    }
}
