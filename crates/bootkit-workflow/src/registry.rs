use bootkit_core::{Action, ActionRef, Step, StepSpec};
use bootkit_error::{ProvisionError, ProvisionResult};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Step name → provider action.
///
/// Platform-specific behaviour is chosen by whoever fills the registry: a
/// later `register` for the same name replaces the earlier binding.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    actions: BTreeMap<String, ActionRef>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name`, returning the binding it replaced.
    pub fn register(&mut self, name: impl Into<String>, action: ActionRef) -> Option<ActionRef> {
        let name = name.into();
        let previous = self.actions.insert(name.clone(), action);
        if previous.is_some() {
            log::debug!("Provider for step {} overridden", name);
        }
        previous
    }

    pub fn register_action<A: Action + 'static>(
        &mut self,
        name: impl Into<String>,
        action: A,
    ) -> Option<ActionRef> {
        self.register(name, Arc::new(action))
    }

    pub fn resolve(&self, name: &str) -> ProvisionResult<ActionRef> {
        self.actions
            .get(name)
            .cloned()
            .ok_or_else(|| ProvisionError::UnknownStep(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Resolves every spec; fails on the first step without a provider.
    pub fn bind(&self, specs: Vec<StepSpec>) -> ProvisionResult<Vec<Step>> {
        specs
            .into_iter()
            .map(|spec| {
                let action = self.resolve(&spec.name)?;
                Ok(Step::new(spec, action))
            })
            .collect()
    }
}
