//! SSH execution contract consumed by the instance orchestration layer.
//!
//! Every remote interaction goes through [`SshConnection`]. A returned `Err`
//! is a transport failure (the command may not have run at all); a returned
//! `Ok` carries the remote command's own exit code, which callers must check
//! separately. The two signals are orthogonal.

use std::io::{Read, Write};

use thiserror::Error;

mod process;

pub use process::ProcessSshConnection;

/// Captured output of a remote command that ran to completion.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code reported by the remote command.
    pub exit_code: i32,
}

impl CommandOutput {
    /// Builds an output from its parts.
    #[must_use]
    pub fn new(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Returns `true` when the remote command exited with status zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of a command whose standard output was streamed to a writer.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StreamOutput {
    /// Captured standard error.
    pub stderr: String,
    /// Exit code reported by the remote command.
    pub exit_code: i32,
}

/// Transport failures raised by an [`SshConnection`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// The SSH client could not be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Client binary that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// The session broke down. The client may still have observed the
    /// remote exit status before failing.
    #[error("{message}")]
    Session {
        /// Human-readable description of the failure.
        message: String,
        /// Remote exit status, when one was reported.
        exit_code: Option<i32>,
    },
    /// Copying data between the local side and the remote command failed.
    #[error("stream failed: {message}")]
    Io {
        /// I/O error string.
        message: String,
    },
}

impl SshError {
    /// Shorthand for a [`SshError::Session`] without an exit status.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
            exit_code: None,
        }
    }

    /// Description of the failure without its variant prefix. For a broken
    /// session this is the client's stderr.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Spawn { message, .. } | Self::Session { message, .. } | Self::Io { message } => {
                message
            }
        }
    }

    /// Remote exit status carried alongside the transport failure, if any.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Session { exit_code, .. } => *exit_code,
            Self::Spawn { .. } | Self::Io { .. } => None,
        }
    }
}

/// Remote command execution over an established SSH session.
///
/// Implementations are not required to be safe for concurrent use; callers
/// serialise access to a single connection.
pub trait SshConnection {
    /// Runs `cmd` to completion, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] when the command could not be delivered or its
    /// result could not be observed.
    fn run(&self, cmd: &str) -> Result<CommandOutput, SshError>;

    /// Runs `cmd`, copying its stdout into `writer` as it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] on transport or copy failures.
    fn stream(&self, cmd: &str, writer: &mut dyn Write) -> Result<StreamOutput, SshError>;

    /// Runs `cmd`, feeding `reader` into its stdin until exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`SshError`] on transport or copy failures.
    fn stream_stdin(&self, cmd: &str, reader: &mut dyn Read) -> Result<CommandOutput, SshError>;

    /// User the session authenticates as.
    fn username(&self) -> &str;
}

#[cfg(test)]
mod tests;
