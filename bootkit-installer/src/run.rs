//! Subcommand implementations.

use crate::cancel::install_ctrlc_handler;
use crate::cli::{Cli, Command};
use crate::fetch::{HttpKeyFetcher, KeyFetcher, DEFAULT_FETCH_TIMEOUT};
use crate::lock::RunLock;
use crate::providers::{build_registry, ProviderFactory};
use crate::settings::{retry_policy, run_paths, RunPaths};
use anyhow::Context;
use bootkit_core::config::{load_manifest, parse_manifest, Manifest, ResolvedStep};
use bootkit_core::install_report::HostSummary;
use bootkit_core::{CancelToken, JsonStateStore, Report, ReportWriter, StateStore};
use bootkit_hal::{probe, Hal, HostInfoOps, LinuxHal, PlatformFacts, SystemHal};
use bootkit_workflow::{prepare, Executor, ExecutorOptions, Plan};
use std::fmt;
use std::process::ExitCode;
use std::sync::Arc;

pub const BUNDLED_MANIFEST: &str = include_str!("../manifests/ubuntu-bootstrap.toml");

pub fn load(cli: &Cli) -> anyhow::Result<Manifest> {
    match &cli.manifest {
        Some(path) => load_manifest(path),
        None => parse_manifest(BUNDLED_MANIFEST).context("bundled manifest is invalid"),
    }
}

/// Everything resolved before a plan can be built.
#[derive(Debug)]
pub struct Session {
    pub manifest: Manifest,
    pub facts: PlatformFacts,
    pub effective_codename: String,
    pub steps: Vec<ResolvedStep>,
    pub paths: RunPaths,
}

impl Session {
    pub fn open(cli: &Cli, host: &dyn HostInfoOps) -> anyhow::Result<Self> {
        let manifest = load(cli)?;
        let facts = probe(host, cli.codename.as_deref(), cli.arch.as_deref())
            .context("platform probe failed")?;
        let (effective_codename, steps) = manifest.resolve(&facts)?;
        let paths = run_paths(cli, &manifest.settings);
        log::info!(
            "Host codename {} (effective {}), arch {}, {} steps",
            facts.os_codename,
            effective_codename,
            facts.architecture,
            steps.len()
        );
        Ok(Self {
            manifest,
            facts,
            effective_codename,
            steps,
            paths,
        })
    }

    /// Builds providers and orders the steps; nothing has run yet.
    pub fn plan(&self, fetcher: Arc<dyn KeyFetcher>) -> anyhow::Result<Plan> {
        let factory = ProviderFactory::new(fetcher);
        let registry = build_registry(&factory, &self.steps)?;
        let specs = self.steps.iter().map(|s| s.spec.clone()).collect();
        Ok(prepare(specs, &registry)?)
    }

    pub fn host_summary(&self, host: &dyn HostInfoOps) -> HostSummary {
        HostSummary {
            hostname: host.hostname().ok().flatten(),
            os_codename: self.facts.os_codename.clone(),
            effective_codename: self.effective_codename.clone(),
            architecture: self.facts.architecture.clone(),
        }
    }
}

pub fn dispatch(cli: &Cli) -> anyhow::Result<ExitCode> {
    let hal = LinuxHal::new();
    let session = Session::open(cli, &hal)?;
    let fetcher: Arc<dyn KeyFetcher> = Arc::new(HttpKeyFetcher::new(DEFAULT_FETCH_TIMEOUT)?);

    match &cli.command {
        Command::Plan => {
            let plan = session.plan(fetcher)?;
            print_plan(&session, &plan);
            Ok(ExitCode::SUCCESS)
        }
        Command::Apply => {
            let plan = session.plan(fetcher)?;
            print_plan(&session, &plan);
            let cancel = CancelToken::new();
            install_ctrlc_handler(&cancel)?;
            let report = apply(cli, &session, &plan, &hal, cancel)?;
            for line in report.summary_lines() {
                println!("{}", line);
            }
            match report.error() {
                Some(err) => {
                    eprintln!("bootkit: {}", err);
                    Ok(ExitCode::FAILURE)
                }
                None => Ok(ExitCode::SUCCESS),
            }
        }
        Command::Status => {
            let plan = session.plan(fetcher)?;
            let store = JsonStateStore::open(&session.paths.state)?;
            for row in status_rows(&plan, &store)? {
                println!("{}", row);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Forget { name } => {
            let _lock = RunLock::acquire(&session.paths.lock)?;
            let mut store = JsonStateStore::open(&session.paths.state)?;
            if store.remove(name)? {
                println!("Forgot {}; it will run on the next apply.", name);
            } else {
                println!("No record for {}.", name);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_plan(session: &Session, plan: &Plan) {
    println!(
        "Platform: {} ({}), arch {}",
        session.facts.os_codename, session.effective_codename, session.facts.architecture
    );
    print!("{}", plan);
}

/// Executes `plan` against the host behind `hal`.
///
/// Non-dry runs need root and the run lock. The report is persisted unless
/// this is a dry run.
pub fn apply<H>(
    cli: &Cli,
    session: &Session,
    plan: &Plan,
    hal: &H,
    cancel: CancelToken,
) -> anyhow::Result<Report>
where
    H: SystemHal + Hal,
{
    let _lock = if cli.dry_run {
        None
    } else {
        hal.ensure_root()?;
        Some(RunLock::acquire(&session.paths.lock)?)
    };

    let mut store = JsonStateStore::open(&session.paths.state)?;
    let options = ExecutorOptions {
        retry: retry_policy(&session.manifest.settings),
        dry_run: cli.dry_run,
        root: cli.root.clone(),
    };
    let report = Executor::new(hal, &session.facts)
        .with_options(options)
        .with_cancel(cancel)
        .with_host(session.host_summary(hal))
        .execute(plan, &mut store);

    if !cli.dry_run {
        let writer = ReportWriter::new(&session.paths.report);
        if let Err(err) = writer.write(&report) {
            log::error!("{:#}", err);
        } else {
            log::info!("Report written to {}", writer.path().display());
        }
    }
    Ok(report)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Applied,
    Pending,
    /// A record exists but for different params.
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub name: String,
    pub state: StepState,
}

impl fmt::Display for StatusRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self.state {
            StepState::Applied => "applied",
            StepState::Pending => "pending",
            StepState::Changed => "changed",
        };
        write!(f, "{:<24} {}", self.name, label)
    }
}

pub fn status_rows(plan: &Plan, store: &dyn StateStore) -> anyhow::Result<Vec<StatusRow>> {
    plan.steps()
        .iter()
        .map(|step| {
            let state = match store.latest(step.name())? {
                None => StepState::Pending,
                Some(record) if record.param_hash == step.spec.param_hash() => StepState::Applied,
                Some(_) => StepState::Changed,
            };
            Ok(StatusRow {
                name: step.name().to_string(),
                state,
            })
        })
        .collect()
}
