//! Error type for the AWS CLI gateway.

use thiserror::Error;

use crate::runner::RunnerError;

/// Errors raised while driving the `aws` CLI.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum AwsError {
    /// Raised when the CLI process cannot be spawned or captured.
    #[error(transparent)]
    Runner(#[from] RunnerError),
    /// Raised when the CLI exits with a non-zero status.
    #[error("`{command}` failed with status {code:?}: {stderr}")]
    Command {
        /// Command line that failed, without credentials.
        command: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Trimmed standard error from the CLI.
        stderr: String,
    },
    /// Raised when CLI output cannot be decoded as the expected JSON shape.
    #[error("could not parse output of `{command}`: {message}")]
    Parse {
        /// Command line whose output was malformed.
        command: String,
        /// Decoder error message.
        message: String,
    },
    /// Raised when the provider reports a state string this tool does not
    /// know.
    #[error("provider reported unknown {kind} state {value:?}")]
    UnknownState {
        /// Kind of resource reporting the state.
        kind: &'static str,
        /// Unrecognised state string.
        value: String,
    },
}
