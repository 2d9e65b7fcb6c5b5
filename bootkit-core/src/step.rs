//! Step model: declarations, provider actions and per-step outcomes.

use bootkit_error::ActionResult;
use bootkit_hal::{PlatformFacts, ProcessOps};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Declared configuration of one provisioning step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSpec {
    pub name: String,
    /// Prerequisite step names. Duplicates are ignored.
    pub depends_on: Vec<String>,
    /// Everything the provider needs; hashed into the step's `param_hash`.
    pub params: Value,
    pub retryable: bool,
    pub critical: bool,
    pub description: Option<String>,
}

impl StepSpec {
    /// A critical, non-retryable step with no dependencies or params.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            params: Value::Null,
            retryable: false,
            critical: true,
            description: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn param_hash(&self) -> String {
        param_hash(&self.name, &self.params)
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hex SHA-256 of a step's name and canonical (key-sorted) JSON params.
pub fn param_hash(name: &str, params: &Value) -> String {
    let doc = serde_json::json!({ "step": name, "params": canonicalize(params) });
    format!("{:x}", Sha256::digest(doc.to_string().as_bytes()))
}

/// What a provider reports back after applying a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Done,
    /// The primary path failed and a fallback path succeeded.
    Fallback(String),
}

/// Explicit context handed to every provider action.
pub struct ActionContext<'a> {
    pub step: &'a str,
    pub params: &'a Value,
    /// 1-based attempt number.
    pub attempt: u32,
    pub dry_run: bool,
    pub facts: &'a PlatformFacts,
    /// Filesystem root that provider file writes are relative to.
    pub root: &'a Path,
    pub hal: &'a dyn ProcessOps,
}

impl ActionContext<'_> {
    /// Maps an absolute host path under the target root.
    pub fn host_path(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

/// A provider-supplied operation bound to a step.
pub trait Action: Send + Sync {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied>;

    /// Post-condition check run after a successful non-dry-run apply.
    fn verify(&self, _ctx: &ActionContext<'_>) -> ActionResult<bool> {
        Ok(true)
    }

    fn describe(&self) -> String {
        "custom action".to_string()
    }
}

impl<F> Action for F
where
    F: Fn(&ActionContext<'_>) -> ActionResult<Applied> + Send + Sync,
{
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        self(ctx)
    }
}

pub type ActionRef = Arc<dyn Action>;

/// A declared step bound to its resolved action.
#[derive(Clone)]
pub struct Step {
    pub spec: StepSpec,
    pub action: ActionRef,
}

impl Step {
    pub fn new(spec: StepSpec, action: ActionRef) -> Self {
        Self { spec, action }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("spec", &self.spec)
            .field("action", &self.action.describe())
            .finish()
    }
}

/// Final result of one step in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    FallbackUsed(String),
    Skipped(String),
    Failed(String),
    FailedNonCritical(String),
}

impl Outcome {
    /// Success or fallback success: the step's post-condition now holds.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success | Outcome::FallbackUsed(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_) | Outcome::FailedNonCritical(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::FallbackUsed(_) => "fallback",
            Outcome::Skipped(_) => "skipped",
            Outcome::Failed(_) => "FAILED",
            Outcome::FailedNonCritical(_) => "failed (non-critical)",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "success"),
            Outcome::FallbackUsed(note)
            | Outcome::Skipped(note)
            | Outcome::Failed(note)
            | Outcome::FailedNonCritical(note) => write!(f, "{}: {}", self.label(), note),
        }
    }
}
