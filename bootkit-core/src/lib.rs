//! bootkit core library.
//!
//! `bootkit-core` holds the shared step model, the durable state store, run
//! reports and the manifest schema used by the workflow engine and the
//! `bootkit` binary.

pub mod cancel;
pub mod config;
pub mod install_report;
pub mod logging;
pub mod state_manager;
pub mod step;

pub use bootkit_error::{ActionError, ActionResult, ProvisionError, ProvisionResult};
pub use cancel::CancelToken;
pub use install_report::{Counts, Report, ReportWriter, Reporter, StepReport};
pub use state_manager::{ExecutionRecord, JsonStateStore, MemoryStateStore, StateStore};
pub use step::{param_hash, Action, ActionContext, ActionRef, Applied, Outcome, Step, StepSpec};
