//! Primary/fallback pair as one step.
//!
//! The primary provider runs first; if it fails (or its post-condition does
//! not hold) the fallback runs and the step reports `FallbackUsed`. When both
//! fail the fallback's error is returned, transient-ness included.

use super::ProviderFactory;
use bootkit_core::{Action, ActionContext, ActionError, ActionRef, ActionResult, Applied};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NestedProvider {
    pub provider: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackParams {
    pub primary: NestedProvider,
    pub fallback: NestedProvider,
}

pub struct FallbackProvider {
    primary: ActionRef,
    fallback: ActionRef,
}

impl FallbackProvider {
    pub fn new(factory: &ProviderFactory, params: FallbackParams) -> anyhow::Result<Self> {
        Ok(Self {
            primary: factory.build(&params.primary.provider, &params.primary.params)?,
            fallback: factory.build(&params.fallback.provider, &params.fallback.params)?,
        })
    }

    pub fn from_actions(primary: ActionRef, fallback: ActionRef) -> Self {
        Self { primary, fallback }
    }

    fn try_primary(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let applied = self.primary.apply(ctx)?;
        if !ctx.dry_run && !self.primary.verify(ctx)? {
            return Err(ActionError::permanent("primary post-condition check failed"));
        }
        Ok(applied)
    }
}

impl Action for FallbackProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let primary_err = match self.try_primary(ctx) {
            Ok(applied) => return Ok(applied),
            Err(err) => err,
        };
        log::warn!(
            "{}: {} failed ({}); trying {}",
            ctx.step,
            self.primary.describe(),
            primary_err,
            self.fallback.describe()
        );

        match self.fallback.apply(ctx) {
            Ok(_) => Ok(Applied::Fallback(format!(
                "{} failed: {}; used {}",
                self.primary.describe(),
                primary_err.message(),
                self.fallback.describe()
            ))),
            Err(err) => {
                log::error!("{}: fallback also failed: {}", ctx.step, err);
                Err(err)
            }
        }
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        Ok(self.primary.verify(ctx)? || self.fallback.verify(ctx)?)
    }

    fn describe(&self) -> String {
        format!(
            "{} (fallback: {})",
            self.primary.describe(),
            self.fallback.describe()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::harness::Harness;
    use std::sync::Arc;

    fn ok() -> ActionRef {
        Arc::new(|_ctx: &ActionContext<'_>| -> ActionResult<Applied> { Ok(Applied::Done) })
    }

    fn failing(err: ActionError) -> ActionRef {
        Arc::new(move |_ctx: &ActionContext<'_>| -> ActionResult<Applied> { Err(err.clone()) })
    }

    #[test]
    fn primary_success_is_plain_success() {
        let h = Harness::new();
        let provider = FallbackProvider::from_actions(ok(), failing(ActionError::permanent("x")));
        assert_eq!(provider.apply(&h.ctx("caddy", false)).unwrap(), Applied::Done);
    }

    #[test]
    fn primary_failure_uses_fallback() {
        let h = Harness::new();
        let provider =
            FallbackProvider::from_actions(failing(ActionError::permanent("no candidate")), ok());
        match provider.apply(&h.ctx("caddy", false)).unwrap() {
            Applied::Fallback(note) => assert!(note.contains("no candidate")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fallback_error_keeps_its_kind() {
        let h = Harness::new();
        let provider = FallbackProvider::from_actions(
            failing(ActionError::permanent("no candidate")),
            failing(ActionError::transient("download timed out")),
        );
        let err = provider.apply(&h.ctx("caddy", false)).unwrap_err();
        assert_eq!(err, ActionError::transient("download timed out"));
    }

    #[test]
    fn failed_primary_verification_triggers_fallback() {
        struct Unverified;
        impl Action for Unverified {
            fn apply(&self, _ctx: &ActionContext<'_>) -> ActionResult<Applied> {
                Ok(Applied::Done)
            }
            fn verify(&self, _ctx: &ActionContext<'_>) -> ActionResult<bool> {
                Ok(false)
            }
        }
        let h = Harness::new();
        let provider = FallbackProvider::from_actions(Arc::new(Unverified), ok());
        assert!(matches!(
            provider.apply(&h.ctx("dotnet", false)).unwrap(),
            Applied::Fallback(_)
        ));
        // Dry runs never verify, so the primary "succeeds".
        assert_eq!(provider.apply(&h.ctx("dotnet", true)).unwrap(), Applied::Done);
    }
}
