//! Linux HAL implementation using real processes and files.

use super::{CommandOptions, HostInfoOps, OsReleaseInfo, ProcessOps};
use crate::os_release::parse_os_release;
use crate::{HalError, HalResult};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;
use wait_timeout::ChildExt;

const OS_RELEASE_PATHS: &[&str] = &["/etc/os-release", "/usr/lib/os-release"];

/// Real HAL implementation for Linux systems.
#[derive(Debug, Clone, Default)]
pub struct LinuxHal {
    os_release_path: Option<PathBuf>,
}

impl LinuxHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads os-release from `path` instead of the system locations.
    pub fn with_os_release_path(path: impl Into<PathBuf>) -> Self {
        Self {
            os_release_path: Some(path.into()),
        }
    }
}

fn map_command_err(program: &str, err: std::io::Error) -> HalError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return HalError::CommandNotFound(program.to_string());
    }
    HalError::Io(err)
}

/// Collects a child pipe on its own thread so a chatty process cannot block
/// on a full pipe while we wait on it.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn collect(handle: JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

fn output_with_timeout(program: &str, cmd: &mut Command, timeout: Duration) -> HalResult<Output> {
    // Never let a provisioning command sit waiting on a prompt.
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn().map_err(|e| map_command_err(program, e))?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let Some(status) = child.wait_timeout(timeout).map_err(HalError::Io)? else {
        let pid = child.id();
        if let Err(err) = child.kill() {
            log::warn!("{} (pid {}): kill after timeout failed: {}", program, pid, err);
        }
        let _ = child.wait();
        let _ = collect(stdout);
        let tail = collect(stderr);
        log::error!(
            "{} (pid {}) killed after {:?}; last stderr: {}",
            program,
            pid,
            timeout,
            String::from_utf8_lossy(stderr_tail(&tail)).trim()
        );
        return Err(HalError::CommandTimeout {
            program: program.to_string(),
            timeout_secs: timeout.as_secs(),
        });
    };

    Ok(Output {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

/// Last few hundred bytes, enough to show why apt or curl hung.
fn stderr_tail(buf: &[u8]) -> &[u8] {
    const TAIL: usize = 512;
    &buf[buf.len().saturating_sub(TAIL)..]
}

impl ProcessOps for LinuxHal {
    fn command_output_with(
        &self,
        program: &str,
        args: &[&str],
        opts: CommandOptions<'_>,
        timeout: Duration,
    ) -> HalResult<Output> {
        log::debug!("exec: {} {}", program, args.join(" "));
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(cwd) = opts.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in opts.env {
            cmd.env(key, value);
        }
        output_with_timeout(program, &mut cmd, timeout)
    }
}

impl HostInfoOps for LinuxHal {
    fn hostname(&self) -> HalResult<Option<String>> {
        match fs::read_to_string("/etc/hostname") {
            Ok(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(HalError::Io(err)),
        }
    }

    fn os_release(&self) -> HalResult<OsReleaseInfo> {
        if let Some(path) = &self.os_release_path {
            return Ok(parse_os_release(&fs::read_to_string(path)?));
        }
        for path in OS_RELEASE_PATHS {
            match fs::read_to_string(path) {
                Ok(content) => return Ok(parse_os_release(&content)),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(HalError::Io(err)),
            }
        }
        Ok(OsReleaseInfo::default())
    }

    fn machine_arch(&self) -> String {
        std::env::consts::ARCH.to_string()
    }
}
