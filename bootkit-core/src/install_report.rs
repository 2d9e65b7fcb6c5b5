//! Run reports.
//!
//! The [`Reporter`] accumulates one entry per planned step, in plan order, and
//! produces the [`Report`] that is the sole user-visible surface of a run.
//! [`ReportWriter`] persists it as JSON next to the state file.

use crate::state_manager::{now_unix_ms, write_json_atomic};
use crate::step::Outcome;
use anyhow::Context;
use bootkit_error::{ActionError, ProvisionError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_REPORT_PATH: &str = "/var/lib/bootkit/report.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepReport {
    pub name: String,
    pub outcome: Outcome,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub duration_ms: u64,
}

impl StepReport {
    pub fn new(name: &str, outcome: Outcome) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            attempts: 0,
            duration_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Counts {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
    pub fallback: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostSummary {
    pub hostname: Option<String>,
    pub os_codename: String,
    pub effective_codename: String,
    pub architecture: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Report {
    pub report_version: u32,
    pub started_at_unix_ms: u64,
    pub ended_at_unix_ms: Option<u64>,
    pub dry_run: bool,
    #[serde(default)]
    pub host: Option<HostSummary>,
    pub steps: Vec<StepReport>,
    pub counts: Counts,
    /// Critical step whose failure stopped the run.
    #[serde(default)]
    pub aborted_by: Option<String>,
    /// First step left unfinished because the run was cancelled.
    #[serde(default)]
    pub cancelled_before: Option<String>,
}

impl Report {
    /// True unless a critical step failed or the run was cancelled.
    pub fn succeeded(&self) -> bool {
        self.aborted_by.is_none() && self.cancelled_before.is_none()
    }

    pub fn outcome_of(&self, step: &str) -> Option<&Outcome> {
        self.steps.iter().find(|s| s.name == step).map(|s| &s.outcome)
    }

    /// Names of steps in plan order.
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn non_critical_failures(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, Outcome::FailedNonCritical(_)))
            .collect()
    }

    /// The error that makes this run fail as a whole, if any.
    pub fn error(&self) -> Option<ProvisionError> {
        if let Some(step) = &self.aborted_by {
            let detail = match self.outcome_of(step) {
                Some(Outcome::Failed(msg)) => msg.clone(),
                _ => "unknown failure".to_string(),
            };
            return Some(ProvisionError::CriticalAction {
                step: step.clone(),
                source: ActionError::Permanent(detail),
            });
        }
        self.cancelled_before
            .as_ref()
            .map(|step| ProvisionError::Cancelled(step.clone()))
    }

    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        lines.push(if self.dry_run {
            "Run summary (dry run):".to_string()
        } else {
            "Run summary:".to_string()
        });
        for (idx, step) in self.steps.iter().enumerate() {
            lines.push(format!("{:02}. {:<24} {}", idx + 1, step.name, step.outcome));
        }
        lines.push(format!(
            "success={} fallback={} skipped={} failed={}",
            self.counts.success, self.counts.fallback, self.counts.skipped, self.counts.failed
        ));
        if let Some(step) = &self.aborted_by {
            lines.push(format!("Aborted: critical step {} failed", step));
        }
        if let Some(step) = &self.cancelled_before {
            lines.push(format!("Cancelled before step {}", step));
        }
        lines
    }
}

/// Accumulates step outcomes; no side effects.
#[derive(Debug, Clone)]
pub struct Reporter {
    report: Report,
}

impl Reporter {
    pub fn new(dry_run: bool) -> Self {
        Self {
            report: Report {
                report_version: 1,
                started_at_unix_ms: now_unix_ms(),
                ended_at_unix_ms: None,
                dry_run,
                host: None,
                steps: Vec::new(),
                counts: Counts::default(),
                aborted_by: None,
                cancelled_before: None,
            },
        }
    }

    pub fn with_host(mut self, host: HostSummary) -> Self {
        self.report.host = Some(host);
        self
    }

    pub fn collect(&mut self, step: &str, outcome: Outcome) {
        self.record(StepReport::new(step, outcome));
    }

    pub fn record(&mut self, entry: StepReport) {
        let counts = &mut self.report.counts;
        match entry.outcome {
            Outcome::Success => counts.success += 1,
            Outcome::FallbackUsed(_) => counts.fallback += 1,
            Outcome::Skipped(_) => counts.skipped += 1,
            Outcome::Failed(_) | Outcome::FailedNonCritical(_) => counts.failed += 1,
        }
        self.report.steps.push(entry);
    }

    pub fn mark_aborted(&mut self, step: &str) {
        self.report.aborted_by = Some(step.to_string());
    }

    pub fn mark_cancelled(&mut self, step: &str) {
        self.report.cancelled_before = Some(step.to_string());
    }

    pub fn summary(&self) -> Report {
        let mut report = self.report.clone();
        report.ended_at_unix_ms = Some(now_unix_ms());
        report
    }
}

#[derive(Debug, Clone)]
pub struct ReportWriter {
    path: PathBuf,
}

impl ReportWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, report: &Report) -> anyhow::Result<()> {
        write_json_atomic(&self.path, report).context("failed to persist run report")
    }
}
