use super::{run, SYSTEMCTL_TIMEOUT};
use anyhow::bail;
use bootkit_core::{Action, ActionContext, ActionResult, Applied};
use bootkit_hal::CommandOptions;
use serde::Deserialize;

fn yes() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceParams {
    pub unit: String,
    #[serde(default = "yes")]
    pub enable: bool,
    #[serde(default = "yes")]
    pub start: bool,
    /// Restart instead of start, to pick up freshly written config.
    #[serde(default)]
    pub restart: bool,
}

/// systemd unit state via `systemctl`.
#[derive(Debug)]
pub struct ServiceProvider {
    params: ServiceParams,
}

impl ServiceProvider {
    pub fn new(params: ServiceParams) -> anyhow::Result<Self> {
        if params.unit.is_empty() || params.unit.starts_with('-') {
            bail!("invalid unit name {:?}", params.unit);
        }
        if !params.enable && !params.start && !params.restart {
            bail!("service {} has nothing to do", params.unit);
        }
        Ok(Self { params })
    }

    fn running_wanted(&self) -> bool {
        self.params.start || self.params.restart
    }
}

impl Action for ServiceProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let unit = self.params.unit.as_str();
        let opts = CommandOptions::default();
        if self.params.enable {
            run(ctx, "systemctl", &["enable", unit], opts, SYSTEMCTL_TIMEOUT)?;
        }
        if self.params.restart {
            run(ctx, "systemctl", &["restart", unit], opts, SYSTEMCTL_TIMEOUT)?;
        } else if self.params.start {
            run(ctx, "systemctl", &["start", unit], opts, SYSTEMCTL_TIMEOUT)?;
        }
        Ok(Applied::Done)
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        let unit = self.params.unit.as_str();
        if self.params.enable
            && !ctx
                .hal
                .command_succeeds("systemctl", &["is-enabled", "--quiet", unit], SYSTEMCTL_TIMEOUT)?
        {
            return Ok(false);
        }
        if self.running_wanted()
            && !ctx
                .hal
                .command_succeeds("systemctl", &["is-active", "--quiet", unit], SYSTEMCTL_TIMEOUT)?
        {
            return Ok(false);
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        let verb = match (self.params.enable, self.running_wanted()) {
            (true, true) => "enable and start",
            (true, false) => "enable",
            _ => "start",
        };
        format!("{} {}", verb, self.params.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::harness::Harness;
    use bootkit_hal::FakeResponse;

    fn provider(restart: bool) -> ServiceProvider {
        ServiceProvider::new(ServiceParams {
            unit: "fail2ban".into(),
            enable: true,
            start: true,
            restart,
        })
        .unwrap()
    }

    #[test]
    fn enables_then_starts_or_restarts() {
        let h = Harness::new();
        provider(false).apply(&h.ctx("fail2ban", false)).unwrap();
        provider(true).apply(&h.ctx("fail2ban", false)).unwrap();
        assert_eq!(
            h.hal.command_lines(),
            vec![
                "systemctl enable fail2ban",
                "systemctl start fail2ban",
                "systemctl enable fail2ban",
                "systemctl restart fail2ban",
            ]
        );
    }

    #[test]
    fn inactive_unit_fails_verification() {
        let h = Harness::new();
        h.hal.respond("systemctl is-active", FakeResponse::exit(3));
        assert!(!provider(false).verify(&h.ctx("fail2ban", false)).unwrap());

        let h = Harness::new();
        assert!(provider(false).verify(&h.ctx("fail2ban", false)).unwrap());
    }

    #[test]
    fn rejects_noop_service() {
        assert!(ServiceProvider::new(ServiceParams {
            unit: "mongod".into(),
            enable: false,
            start: false,
            restart: false,
        })
        .is_err());
    }
}
