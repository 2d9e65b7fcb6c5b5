//! bootkit workflow engine.
//!
//! This crate holds the deterministic execution primitives: dependency
//! planning, provider binding, bounded retries and the step executor.
//! Concrete providers and the persistence backend come from callers.

pub mod executor;
pub mod planner;
pub mod registry;
pub mod retry;

use bootkit_core::StepSpec;
use bootkit_error::ProvisionResult;

pub use executor::{Executor, ExecutorOptions};
pub use planner::{order, plan, Plan};
pub use registry::ProviderRegistry;
pub use retry::RetryPolicy;

/// Binds every step to its provider, then orders the steps.
///
/// All errors surface here, before any action has run.
pub fn prepare(specs: Vec<StepSpec>, registry: &ProviderRegistry) -> ProvisionResult<Plan> {
    let steps = registry.bind(specs)?;
    plan(steps)
}
