use bootkit_core::{ActionResult, CancelToken, JsonStateStore, Outcome};
use bootkit_hal::{FakeHal, FakeResponse, HalError};
use bootkit_installer::cli::Cli;
use bootkit_installer::fetch::KeyFetcher;
use bootkit_installer::run::{apply, status_rows, Session, StepState};
use clap::Parser;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

struct ArmoredKey;

impl KeyFetcher for ArmoredKey {
    fn fetch(&self, _url: &str) -> ActionResult<Vec<u8>> {
        Ok(b"-----BEGIN PGP PUBLIC KEY BLOCK-----\nstub\n-----END PGP PUBLIC KEY BLOCK-----\n".to_vec())
    }
}

fn cli(dir: &Path, codename: &str, extra: &[&str], command: &str) -> Cli {
    let state = dir.join("state.json");
    let report = dir.join("report.json");
    let lock = dir.join("bootkit.lock");
    let root = dir.join("root");
    let mut argv: Vec<String> = vec![
        "bootkit".into(),
        "--codename".into(),
        codename.into(),
        "--arch".into(),
        "amd64".into(),
        "--state".into(),
        state.display().to_string(),
        "--report".into(),
        report.display().to_string(),
        "--lock".into(),
        lock.display().to_string(),
        "--root".into(),
        root.display().to_string(),
    ];
    argv.extend(extra.iter().map(|s| s.to_string()));
    argv.push(command.into());
    Cli::try_parse_from(argv).unwrap()
}

/// A fake host on which every installed package and swap probe looks healthy.
fn healthy_host(dir: &TempDir) -> FakeHal {
    let hal = FakeHal::new().with_hostname("web-1");
    hal.respond("dpkg-query", FakeResponse::ok("install ok installed"));
    let device = dir.path().join("root/swapfile").display().to_string();
    hal.respond("swapon --show", FakeResponse::ok(device));
    hal
}

#[test]
fn noble_plan_keeps_declaration_order() {
    let dir = tempdir().unwrap();
    let hal = FakeHal::new();
    let session = Session::open(&cli(dir.path(), "noble", &[], "plan"), &hal).unwrap();
    assert_eq!(session.effective_codename, "noble");

    let plan = session.plan(Arc::new(ArmoredKey)).unwrap();
    assert_eq!(
        plan.names(),
        vec![
            "apt-update",
            "base-packages",
            "dotnet",
            "mongodb-repo",
            "mongodb",
            "mongod-service",
            "caddy-repo",
            "caddy",
            "ufw-rules",
            "ufw-enable",
            "swapfile",
            "fail2ban-jail",
            "fail2ban",
            "python-tooling",
        ]
    );
    let rendered = plan.to_string();
    assert!(rendered.contains("MongoDB 8.0 apt repository"));
    assert_eq!(hal.operation_count(), 0);
}

#[test]
fn unsupported_release_uses_jammy_repositories() {
    let dir = tempdir().unwrap();
    let hal = FakeHal::new();
    let session = Session::open(&cli(dir.path(), "oracular", &[], "plan"), &hal).unwrap();
    assert_eq!(session.facts.os_codename, "oracular");
    assert_eq!(session.effective_codename, "jammy");

    let repo = session
        .steps
        .iter()
        .find(|s| s.spec.name == "mongodb-repo")
        .unwrap();
    assert_eq!(repo.spec.params["suite"], "jammy/mongodb-org/7.0");
    assert_eq!(repo.spec.params["arch"], "amd64");
}

#[test]
fn focal_installs_dotnet_with_the_script() {
    let dir = tempdir().unwrap();
    let hal = FakeHal::new();
    let session = Session::open(&cli(dir.path(), "focal", &[], "plan"), &hal).unwrap();
    let dotnet = session.steps.iter().find(|s| s.spec.name == "dotnet").unwrap();
    assert_eq!(dotnet.provider, "command");
    assert!(dotnet.spec.params.get("packages").is_none());
}

#[test]
fn dry_run_touches_nothing() {
    let dir = tempdir().unwrap();
    let hal = FakeHal::new();
    let cli = cli(dir.path(), "noble", &["--dry-run"], "apply");
    let session = Session::open(&cli, &hal).unwrap();
    let plan = session.plan(Arc::new(ArmoredKey)).unwrap();

    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();

    assert!(report.dry_run);
    assert!(report.succeeded());
    assert_eq!(report.counts.success, plan.len());
    assert_eq!(hal.operation_count(), 0);
    assert!(!dir.path().join("state.json").exists());
    assert!(!dir.path().join("report.json").exists());
    assert!(!dir.path().join("root").exists());
}

#[test]
fn full_apply_then_rerun_is_a_noop() {
    let dir = tempdir().unwrap();
    let hal = healthy_host(&dir);
    let cli = cli(dir.path(), "noble", &[], "apply");
    let session = Session::open(&cli, &hal).unwrap();
    let plan = session.plan(Arc::new(ArmoredKey)).unwrap();

    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert!(report.succeeded(), "{:#?}", report.steps);
    assert_eq!(report.counts.success, 14);
    assert_eq!(report.host.as_ref().unwrap().hostname.as_deref(), Some("web-1"));

    let root = dir.path().join("root");
    assert!(root.join("etc/apt/sources.list.d/mongodb-org-8.0.list").is_file());
    assert!(root.join("etc/fail2ban/jail.d/bootkit.local").is_file());
    assert!(fs::read_to_string(root.join("etc/fstab"))
        .unwrap()
        .contains("/swapfile none swap sw 0 0"));
    assert!(hal
        .command_lines()
        .contains(&"apt-get install -y dotnet-sdk-8.0".to_string()));

    let written: bootkit_core::Report =
        serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(written.steps.len(), 14);

    hal.clear();
    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert_eq!(hal.operation_count(), 0);
    assert!(report
        .steps
        .iter()
        .all(|s| s.outcome == Outcome::Skipped("already applied".into())));

    let store = JsonStateStore::open(dir.path().join("state.json")).unwrap();
    assert!(status_rows(&plan, &store)
        .unwrap()
        .iter()
        .all(|row| row.state == StepState::Applied));
}

#[test]
fn mongodb_failure_is_best_effort() {
    let dir = tempdir().unwrap();
    let hal = healthy_host(&dir);
    hal.fail_times("apt-get install -y mongodb-org", 10);
    let cli = cli(dir.path(), "noble", &[], "apply");
    let session = Session::open(&cli, &hal).unwrap();
    let plan = session.plan(Arc::new(ArmoredKey)).unwrap();

    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();

    assert!(report.succeeded());
    assert!(matches!(
        report.outcome_of("mongodb"),
        Some(Outcome::FailedNonCritical(_))
    ));
    assert_eq!(
        report.outcome_of("mongod-service"),
        Some(&Outcome::Skipped("dependency mongodb failed".into()))
    );
    assert_eq!(report.outcome_of("python-tooling"), Some(&Outcome::Success));
    let mongodb = report.steps.iter().find(|s| s.name == "mongodb").unwrap();
    assert_eq!(mongodb.attempts, 3);
}

#[test]
fn apply_requires_root_unless_dry_run() {
    let dir = tempdir().unwrap();
    let hal = FakeHal::new().unprivileged();
    let real = cli(dir.path(), "noble", &[], "apply");
    let session = Session::open(&real, &hal).unwrap();
    let plan = session.plan(Arc::new(ArmoredKey)).unwrap();

    let err = apply(&real, &session, &plan, &hal, CancelToken::new()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<HalError>(),
        Some(HalError::PermissionDenied)
    ));
    assert_eq!(hal.operation_count(), 0);
    assert!(!dir.path().join("state.json").exists());

    let dry = cli(dir.path(), "noble", &["--dry-run"], "apply");
    let report = apply(&dry, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert!(report.succeeded());
}
