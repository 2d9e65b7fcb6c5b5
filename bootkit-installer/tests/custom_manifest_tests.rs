use bootkit_core::{CancelToken, JsonStateStore, Outcome, StateStore};
use bootkit_hal::FakeHal;
use bootkit_installer::cli::Cli;
use bootkit_installer::fetch::HttpKeyFetcher;
use bootkit_installer::run::{apply, status_rows, Session, StepState};
use clap::Parser;
use httpmock::Method::GET;
use httpmock::MockServer;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const KEY: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----\nmQINBF\n-----END PGP PUBLIC KEY BLOCK-----\n";

fn manifest(key_url: &str, motd: &str) -> String {
    format!(
        r#"
[settings]
max_attempts = 2
initial_backoff_ms = 0
max_backoff_ms = 0

[[steps]]
name = "caddy-repo"
provider = "apt-repo"
retryable = true
[steps.params]
name = "caddy-stable"
key_url = "{key_url}"
uri = "https://dl.cloudsmith.io/public/caddy/stable/deb/debian"
suite = "any-version"
components = ["main"]

[[steps]]
name = "motd"
provider = "file"
depends_on = ["caddy-repo"]
[steps.params]
path = "/etc/motd"
content = "{motd}"
"#
    )
}

fn cli(dir: &Path, command: &str) -> Cli {
    Cli::try_parse_from([
        "bootkit".to_string(),
        "--manifest".into(),
        dir.join("bootkit.toml").display().to_string(),
        "--codename".into(),
        "noble".into(),
        "--state".into(),
        dir.join("state.json").display().to_string(),
        "--report".into(),
        dir.join("report.json").display().to_string(),
        "--lock".into(),
        dir.join("bootkit.lock").display().to_string(),
        "--root".into(),
        dir.join("root").display().to_string(),
        command.into(),
    ])
    .unwrap()
}

fn fetcher() -> Arc<HttpKeyFetcher> {
    Arc::new(HttpKeyFetcher::new(Duration::from_secs(5)).unwrap())
}

#[test]
fn key_is_downloaded_once_and_changes_are_detected() {
    let server = MockServer::start();
    let key = server.mock(|when, then| {
        when.method(GET).path("/gpg.key");
        then.status(200).body(KEY);
    });
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("bootkit.toml"),
        manifest(&server.url("/gpg.key"), "hello"),
    )
    .unwrap();

    let hal = FakeHal::new();
    let cli = cli(dir.path(), "apply");
    let session = Session::open(&cli, &hal).unwrap();
    let plan = session.plan(fetcher()).unwrap();

    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert!(report.succeeded(), "{:#?}", report.steps);
    key.assert_hits(1);
    let root = dir.path().join("root");
    assert_eq!(
        fs::read_to_string(root.join("etc/apt/keyrings/caddy-stable.asc")).unwrap(),
        KEY
    );
    assert_eq!(fs::read_to_string(root.join("etc/motd")).unwrap(), "hello");

    // Re-run: nothing fetched, nothing executed.
    hal.clear();
    apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    key.assert_hits(1);
    assert_eq!(hal.operation_count(), 0);

    // Edit one step; only it is reported as changed and re-run.
    fs::write(
        dir.path().join("bootkit.toml"),
        manifest(&server.url("/gpg.key"), "hello again"),
    )
    .unwrap();
    let session = Session::open(&cli, &hal).unwrap();
    let plan = session.plan(fetcher()).unwrap();
    let store = JsonStateStore::open(dir.path().join("state.json")).unwrap();
    let rows = status_rows(&plan, &store).unwrap();
    assert_eq!(rows[0].state, StepState::Applied);
    assert_eq!(rows[1].state, StepState::Changed);
    drop(store);

    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert_eq!(
        report.outcome_of("caddy-repo"),
        Some(&Outcome::Skipped("already applied".into()))
    );
    assert_eq!(report.outcome_of("motd"), Some(&Outcome::Success));
    assert_eq!(fs::read_to_string(root.join("etc/motd")).unwrap(), "hello again");
    key.assert_hits(1);
}

#[test]
fn missing_key_aborts_and_forget_reruns() {
    let server = MockServer::start();
    let mut missing = server.mock(|when, then| {
        when.method(GET).path("/gpg.key");
        then.status(404);
    });
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("bootkit.toml"),
        manifest(&server.url("/gpg.key"), "hello"),
    )
    .unwrap();

    let hal = FakeHal::new();
    let cli = cli(dir.path(), "apply");
    let session = Session::open(&cli, &hal).unwrap();
    let plan = session.plan(fetcher()).unwrap();

    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert_eq!(report.aborted_by.as_deref(), Some("caddy-repo"));
    // 404 is permanent: a single attempt despite retryable = true.
    missing.assert_hits(1);
    assert_eq!(
        report.outcome_of("motd"),
        Some(&Outcome::Skipped("not run: critical step caddy-repo failed".into()))
    );
    assert!(report.error().is_some());

    let written: bootkit_core::Report =
        serde_json::from_str(&fs::read_to_string(dir.path().join("report.json")).unwrap())
            .unwrap();
    assert_eq!(written.aborted_by.as_deref(), Some("caddy-repo"));

    missing.delete();
    server.mock(|when, then| {
        when.method(GET).path("/gpg.key");
        then.status(200).body(KEY);
    });
    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert!(report.succeeded());

    let mut store = JsonStateStore::open(dir.path().join("state.json")).unwrap();
    assert!(store.remove("motd").unwrap());
    assert!(!store.remove("motd").unwrap());
    drop(store);

    hal.clear();
    let report = apply(&cli, &session, &plan, &hal, CancelToken::new()).unwrap();
    assert_eq!(report.outcome_of("motd"), Some(&Outcome::Success));
    assert_eq!(hal.operation_count(), 0);
}
