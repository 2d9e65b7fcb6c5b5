//! Fake HAL implementation for testing.
//!
//! This implementation records all operations without executing them,
//! allowing CI-safe testing of providers without root privileges or a real
//! package manager. Responses can be scripted per command prefix.

use super::{CommandOptions, HostInfoOps, OsReleaseInfo, ProcessOps};
use crate::HalResult;
#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Output};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Operation records for testing and verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Command {
        program: String,
        args: Vec<String>,
        env: Vec<(String, String)>,
        timeout_secs: u64,
    },
}

impl Operation {
    /// `program arg1 arg2 ...`
    pub fn command_line(&self) -> String {
        match self {
            Operation::Command { program, args, .. } => {
                let mut line = program.clone();
                for arg in args {
                    line.push(' ');
                    line.push_str(arg);
                }
                line
            }
        }
    }
}

/// Scripted result for a faked command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeResponse {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl FakeResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code,
            stdout: String::new(),
            stderr: format!("simulated exit {code}"),
        }
    }
}

/// Shared state for FakeHal operations.
#[derive(Debug, Clone, Default)]
struct FakeHalState {
    /// All operations that were recorded
    operations: Vec<Operation>,
    /// Persistent responses keyed by command-line prefix
    responses: Vec<(String, FakeResponse)>,
    /// One-shot failures keyed by command-line prefix, with remaining count
    failures: Vec<(String, usize)>,
}

/// Fake HAL implementation that records operations without executing them.
#[derive(Debug, Clone)]
pub struct FakeHal {
    state: Arc<Mutex<FakeHalState>>,
    os_release: OsReleaseInfo,
    machine_arch: String,
    hostname: Option<String>,
    root: bool,
}

impl Default for FakeHal {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHal {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeHalState::default())),
            os_release: OsReleaseInfo::default(),
            machine_arch: "x86_64".to_string(),
            hostname: None,
            root: true,
        }
    }

    pub fn with_os_release(mut self, info: OsReleaseInfo) -> Self {
        self.os_release = info;
        self
    }

    pub fn with_machine_arch(mut self, arch: &str) -> Self {
        self.machine_arch = arch.to_string();
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    /// Pretend to run without root privileges.
    pub fn unprivileged(mut self) -> Self {
        self.root = false;
        self
    }

    pub fn is_root(&self) -> bool {
        self.root
    }

    /// Every command whose command line starts with `prefix` gets `response`.
    pub fn respond(&self, prefix: &str, response: FakeResponse) {
        self.state
            .lock()
            .unwrap()
            .responses
            .push((prefix.to_string(), response));
    }

    /// The next `times` commands matching `prefix` exit with status 1.
    pub fn fail_times(&self, prefix: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((prefix.to_string(), times));
    }

    /// Get all recorded operations.
    pub fn operations(&self) -> Vec<Operation> {
        self.state.lock().unwrap().operations.clone()
    }

    /// Recorded command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.operations().iter().map(Operation::command_line).collect()
    }

    /// Get the number of operations recorded.
    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operations.len()
    }

    /// Check if a specific operation was recorded.
    pub fn has_operation(&self, check: impl Fn(&Operation) -> bool) -> bool {
        self.state.lock().unwrap().operations.iter().any(check)
    }

    /// Clear all recorded operations.
    pub fn clear(&self) {
        self.state.lock().unwrap().operations.clear();
    }

    fn record_operation(&self, op: Operation) -> FakeResponse {
        let line = op.command_line();
        let mut state = self.state.lock().unwrap();
        state.operations.push(op);

        if let Some((_, remaining)) = state
            .failures
            .iter_mut()
            .find(|(prefix, remaining)| *remaining > 0 && line.starts_with(prefix.as_str()))
        {
            *remaining -= 1;
            return FakeResponse::exit(1);
        }

        state
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| FakeResponse::ok(""))
    }
}

#[cfg(unix)]
fn exit_status(code: i32) -> ExitStatus {
    ExitStatus::from_raw(code << 8)
}

impl ProcessOps for FakeHal {
    fn command_output_with(
        &self,
        program: &str,
        args: &[&str],
        opts: CommandOptions<'_>,
        timeout: Duration,
    ) -> HalResult<Output> {
        let response = self.record_operation(Operation::Command {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            env: opts
                .env
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout_secs: timeout.as_secs(),
        });

        Ok(Output {
            status: exit_status(response.code),
            stdout: response.stdout.into_bytes(),
            stderr: response.stderr.into_bytes(),
        })
    }
}

impl HostInfoOps for FakeHal {
    fn hostname(&self) -> HalResult<Option<String>> {
        Ok(self.hostname.clone())
    }

    fn os_release(&self) -> HalResult<OsReleaseInfo> {
        Ok(self.os_release.clone())
    }

    fn machine_arch(&self) -> String {
        self.machine_arch.clone()
    }
}
