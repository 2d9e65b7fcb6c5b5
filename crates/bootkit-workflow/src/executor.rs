//! Sequential step executor.
//!
//! Steps run strictly in plan order. A step whose success record matches its
//! current `param_hash` is skipped without touching its provider; everything
//! else is applied (with bounded retries when the step is retryable), verified,
//! and recorded. A critical failure stops the run; a non-critical one is
//! recorded and only blocks the steps that depend on it.

use crate::planner::Plan;
use crate::retry::RetryPolicy;
use bootkit_core::install_report::HostSummary;
use bootkit_core::{
    ActionContext, ActionError, Applied, CancelToken, ExecutionRecord, Outcome, Report, Reporter,
    StateStore, Step, StepReport,
};
use bootkit_hal::{PlatformFacts, ProcessOps};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

const CANCEL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub retry: RetryPolicy,
    pub dry_run: bool,
    /// Root that providers write host files under.
    pub root: PathBuf,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            dry_run: false,
            root: PathBuf::from("/"),
        }
    }
}

pub struct Executor<'a> {
    hal: &'a dyn ProcessOps,
    facts: &'a PlatformFacts,
    options: ExecutorOptions,
    cancel: CancelToken,
    host: Option<HostSummary>,
}

struct Attempted {
    result: Result<Applied, ActionError>,
    attempts: u32,
    /// Cancellation arrived while waiting to retry.
    cancelled: bool,
}

impl<'a> Executor<'a> {
    pub fn new(hal: &'a dyn ProcessOps, facts: &'a PlatformFacts) -> Self {
        Self {
            hal,
            facts,
            options: ExecutorOptions::default(),
            cancel: CancelToken::new(),
            host: None,
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_host(mut self, host: HostSummary) -> Self {
        self.host = Some(host);
        self
    }

    pub fn execute(&self, plan: &Plan, store: &mut dyn StateStore) -> Report {
        let mut reporter = Reporter::new(self.options.dry_run);
        if let Some(host) = &self.host {
            reporter = reporter.with_host(host.clone());
        }

        // Steps that did not reach success in this run.
        let mut blocked: HashSet<&str> = HashSet::new();
        let steps = plan.steps();

        for (idx, step) in steps.iter().enumerate() {
            let name = step.name();

            if self.cancel.is_cancelled() {
                log::warn!("Cancellation requested; stopping before step {}", name);
                reporter.mark_cancelled(name);
                skip_rest(&mut reporter, &steps[idx..], "cancelled");
                break;
            }

            let hash = step.spec.param_hash();
            match store.get(name, &hash) {
                Ok(Some(_)) => {
                    log::info!("Step {}: already applied, skipping", name);
                    reporter.collect(name, Outcome::Skipped("already applied".to_string()));
                    continue;
                }
                Ok(None) => {}
                Err(err) => {
                    log::error!("Step {}: state lookup failed: {:#}", name, err);
                    reporter.collect(name, Outcome::Failed(format!("state lookup failed: {:#}", err)));
                    reporter.mark_aborted(name);
                    skip_rest(&mut reporter, &steps[idx + 1..], &abort_reason(name));
                    break;
                }
            }

            if let Some(dep) = step
                .spec
                .depends_on
                .iter()
                .find(|dep| blocked.contains(dep.as_str()))
            {
                log::warn!("Step {}: skipped, dependency {} did not succeed", name, dep);
                reporter.collect(name, Outcome::Skipped(format!("dependency {} failed", dep)));
                blocked.insert(name);
                continue;
            }

            let started = Instant::now();
            let attempted = self.run_step(step);
            let duration_ms = started.elapsed().as_millis() as u64;

            if attempted.cancelled {
                let detail = match &attempted.result {
                    Err(err) => format!("cancelled during retry after: {}", err),
                    Ok(_) => "cancelled during retry".to_string(),
                };
                reporter.record(StepReport {
                    name: name.to_string(),
                    outcome: Outcome::Skipped(detail),
                    attempts: attempted.attempts,
                    duration_ms,
                });
                reporter.mark_cancelled(name);
                skip_rest(&mut reporter, &steps[idx + 1..], "cancelled");
                break;
            }

            let outcome = match attempted.result {
                Ok(applied) => {
                    let outcome = match applied {
                        Applied::Done => Outcome::Success,
                        Applied::Fallback(note) => Outcome::FallbackUsed(note),
                    };
                    if self.options.dry_run {
                        outcome
                    } else {
                        match store.put(ExecutionRecord::new(name, &hash, outcome.clone())) {
                            Ok(()) => outcome,
                            Err(err) => {
                                log::error!("Step {}: applied but not recorded: {:#}", name, err);
                                self.abort(
                                    &mut reporter,
                                    steps,
                                    idx,
                                    StepReport {
                                        name: name.to_string(),
                                        outcome: Outcome::Failed(format!(
                                            "applied but state not recorded: {:#}",
                                            err
                                        )),
                                        attempts: attempted.attempts,
                                        duration_ms,
                                    },
                                );
                                break;
                            }
                        }
                    }
                }
                Err(err) if step.spec.critical => {
                    log::error!("Step {}: critical failure: {}", name, err);
                    self.abort(
                        &mut reporter,
                        steps,
                        idx,
                        StepReport {
                            name: name.to_string(),
                            outcome: Outcome::Failed(err.to_string()),
                            attempts: attempted.attempts,
                            duration_ms,
                        },
                    );
                    break;
                }
                Err(err) => {
                    log::warn!("Step {}: failed (non-critical), continuing: {}", name, err);
                    blocked.insert(name);
                    Outcome::FailedNonCritical(err.to_string())
                }
            };

            if outcome.is_success() {
                log::info!("Step {}: {}", name, outcome);
            }
            reporter.record(StepReport {
                name: name.to_string(),
                outcome,
                attempts: attempted.attempts,
                duration_ms,
            });
        }

        reporter.summary()
    }

    fn abort(&self, reporter: &mut Reporter, steps: &[Step], idx: usize, entry: StepReport) {
        let name = entry.name.clone();
        reporter.record(entry);
        reporter.mark_aborted(&name);
        skip_rest(reporter, &steps[idx + 1..], &abort_reason(&name));
    }

    fn run_step(&self, step: &Step) -> Attempted {
        let max_attempts = self.options.retry.attempts_for(step.spec.retryable);
        let mut attempt = 1;

        loop {
            let ctx = ActionContext {
                step: step.name(),
                params: &step.spec.params,
                attempt,
                dry_run: self.options.dry_run,
                facts: self.facts,
                root: &self.options.root,
                hal: self.hal,
            };

            log::info!(
                "Step {}: applying (attempt {}/{})",
                step.name(),
                attempt,
                max_attempts
            );
            let result = step.action.apply(&ctx).and_then(|applied| {
                if self.options.dry_run || step.action.verify(&ctx)? {
                    Ok(applied)
                } else {
                    Err(ActionError::transient("post-condition check failed"))
                }
            });

            match result {
                Ok(applied) => {
                    return Attempted {
                        result: Ok(applied),
                        attempts: attempt,
                        cancelled: false,
                    }
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.options.retry.backoff_for(attempt);
                    log::warn!(
                        "Step {}: attempt {} failed ({}); retrying in {:?}",
                        step.name(),
                        attempt,
                        err,
                        delay
                    );
                    if !self.sleep_unless_cancelled(delay) {
                        log::warn!("Step {}: cancelled between attempts", step.name());
                        return Attempted {
                            result: Err(err),
                            attempts: attempt,
                            cancelled: true,
                        };
                    }
                    attempt += 1;
                }
                Err(err) => {
                    return Attempted {
                        result: Err(err),
                        attempts: attempt,
                        cancelled: false,
                    }
                }
            }
        }
    }

    /// Returns false if cancelled before or during the wait.
    fn sleep_unless_cancelled(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

fn abort_reason(step: &str) -> String {
    format!("not run: critical step {} failed", step)
}

fn skip_rest(reporter: &mut Reporter, rest: &[Step], reason: &str) {
    for step in rest {
        reporter.collect(step.name(), Outcome::Skipped(reason.to_string()));
    }
}
