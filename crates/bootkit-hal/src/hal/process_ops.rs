//! Process execution helpers.
//!
//! External commands are "world-touching" and must go through the HAL so
//! providers can be tested without spawning real processes.

use crate::HalResult;
use bootkit_error::HalError;
use std::path::Path;
use std::process::Output;
use std::time::Duration;

/// Extra knobs for a single command invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandOptions<'a> {
    pub cwd: Option<&'a Path>,
    pub env: &'a [(&'a str, &'a str)],
}

/// Process execution trait (external command runner).
pub trait ProcessOps {
    /// Runs a command and returns its output whatever the exit status.
    fn command_output_with(
        &self,
        program: &str,
        args: &[&str],
        opts: CommandOptions<'_>,
        timeout: Duration,
    ) -> HalResult<Output>;

    /// Runs a command and fails unless it exits successfully.
    fn command_status_with(
        &self,
        program: &str,
        args: &[&str],
        opts: CommandOptions<'_>,
        timeout: Duration,
    ) -> HalResult<()> {
        let output = self.command_output_with(program, args, opts, timeout)?;
        if !output.status.success() {
            return Err(HalError::CommandFailed {
                program: program.to_string(),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn command_output(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<Output> {
        self.command_output_with(program, args, CommandOptions::default(), timeout)
    }

    fn command_status(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<()> {
        self.command_status_with(program, args, CommandOptions::default(), timeout)
    }

    /// Runs a probe command; a non-zero exit is `Ok(false)`, not an error.
    fn command_succeeds(&self, program: &str, args: &[&str], timeout: Duration) -> HalResult<bool> {
        let output = self.command_output(program, args, timeout)?;
        Ok(output.status.success())
    }
}
