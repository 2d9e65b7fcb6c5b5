use std::io;
use thiserror::Error;

pub type HalResult<T> = Result<T, HalError>;
pub type ActionResult<T> = Result<T, ActionError>;
pub type ProvisionResult<T> = Result<T, ProvisionError>;

#[derive(Error, Debug)]
pub enum HalError {
    #[error("must run as root to apply changes (try sudo, or use --dry-run)")]
    PermissionDenied,

    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Command failed: {program} (exit={code:?}): {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out: {program} after {timeout_secs}s")]
    CommandTimeout { program: String, timeout_secs: u64 },

    #[error("Another run holds the lock: {0}")]
    Locked(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("nix errno: {0}")]
    Nix(#[from] nix::errno::Errno),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// Failure reported by a provider action.
///
/// `Transient` failures may succeed on a later attempt (network fetches, package
/// mirrors, timeouts) and are retried for retryable steps. `Permanent` failures
/// are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),
}

impl ActionError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

impl From<HalError> for ActionError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::CommandTimeout { .. } | HalError::CommandFailed { .. } => {
                ActionError::Transient(err.to_string())
            }
            other => ActionError::Permanent(other.to_string()),
        }
    }
}

/// Engine-level failures: everything that stops a run as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisionError {
    #[error("dependency cycle among steps: {}", .steps.join(", "))]
    Cycle { steps: Vec<String> },

    #[error("no provider registered for step: {0}")]
    UnknownStep(String),

    #[error("step {step} depends on unknown step {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("step {0} depends on itself")]
    SelfDependency(String),

    #[error("duplicate step name: {0}")]
    DuplicateStep(String),

    #[error("critical step {step} failed: {source}")]
    CriticalAction { step: String, source: ActionError },

    #[error("run cancelled before step {0}")]
    Cancelled(String),
}
