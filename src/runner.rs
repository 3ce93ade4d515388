//! Subprocess execution used by the AWS CLI gateway.
//!
//! The gateway shells out to the provider's CLI rather than linking an SDK,
//! so every invocation flows through [`CommandRunner`]. Tests substitute a
//! scripted double to drive deterministic outcomes without spawning
//! processes.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised while spawning or capturing a command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when the command cannot be started.
    #[error("failed to start {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// OS-level error message.
        message: String,
    },
    /// Raised when captured output is not valid UTF-8.
    #[error("output from {program} was not valid UTF-8")]
    InvalidUtf8 {
        /// Program whose output could not be decoded.
        program: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments and environment overrides,
    /// capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started and
    /// [`RunnerError::InvalidUtf8`] if its output cannot be decoded.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, RunnerError>;
}

/// Production runner backed by [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, RunnerError> {
        let mut command = Command::new(program);
        command.args(args);
        for (key, value) in envs {
            command.env(key, value);
        }

        let output = command.output().map_err(|err| RunnerError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        })?;

        let stdout =
            String::from_utf8(output.stdout).map_err(|_| RunnerError::InvalidUtf8 {
                program: program.to_owned(),
            })?;
        let stderr =
            String::from_utf8(output.stderr).map_err(|_| RunnerError::InvalidUtf8 {
                program: program.to_owned(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout,
            stderr,
        })
    }
}
