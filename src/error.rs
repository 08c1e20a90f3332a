//! Tagged error kinds for instance operations and the phase aggregator.
//!
//! Every failure names the operation, the job (when there is one) and the
//! instance, and remote-exit failures carry the captured output so an
//! operator can diagnose without opening a second session.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

use crate::ssh::SshError;

/// Remote operation an error originated from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// `pre-backup-lock` script.
    PreBackupLock,
    /// `backup` script.
    Backup,
    /// `post-backup-unlock` script.
    PostBackupUnlock,
    /// `restore` script.
    Restore,
    /// `post-restore-unlock` script.
    PostRestoreUnlock,
    /// `metadata` script.
    Metadata,
    /// Script discovery via `find`.
    FindScripts,
    /// `stat` of the artifact root.
    CheckArtifactDirectory,
    /// `mkdir -p` ahead of a restore stream.
    CreateArtifactDirectory,
    /// Tar stream from the instance.
    StreamFromRemote,
    /// Tar stream to the instance.
    StreamToRemote,
    /// `du` of an artifact directory.
    Size,
    /// `shasum` over an artifact directory.
    Checksum,
    /// Removal of one artifact directory.
    Delete,
    /// Removal of the artifact root.
    Cleanup,
}

impl Operation {
    /// Operator-facing label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::PreBackupLock => "pre backup lock",
            Self::Backup => "backup",
            Self::PostBackupUnlock => "unlock",
            Self::Restore => "restore",
            Self::PostRestoreUnlock => "post-restore-unlock",
            Self::Metadata => "metadata",
            Self::FindScripts => "script discovery",
            Self::CheckArtifactDirectory => "artifact directory check",
            Self::CreateArtifactDirectory => "artifact directory creation",
            Self::StreamFromRemote => "stream from remote",
            Self::StreamToRemote => "stream to remote",
            Self::Size => "size check",
            Self::Checksum => "checksum",
            Self::Delete => "delete",
            Self::Cleanup => "artifact directory cleanup",
        }
    }

    /// Returns `true` for operations that execute a job's lifecycle script.
    #[must_use]
    pub const fn is_script(self) -> bool {
        matches!(
            self,
            Self::PreBackupLock
                | Self::Backup
                | Self::PostBackupUnlock
                | Self::Restore
                | Self::PostRestoreUnlock
                | Self::Metadata
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What failed: an operation, optionally scoped to one job or artifact.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subject {
    /// Operation that failed.
    pub operation: Operation,
    /// Job or artifact name, when the operation is scoped to one.
    pub job: Option<String>,
}

impl Subject {
    /// Subject scoped to a job or artifact.
    #[must_use]
    pub fn for_job(operation: Operation, job: impl Into<String>) -> Self {
        Self {
            operation,
            job: Some(job.into()),
        }
    }

    /// Subject covering the whole instance.
    #[must_use]
    pub const fn instance_wide(operation: Operation) -> Self {
        Self {
            operation,
            job: None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.job {
            Some(ref job) if self.operation.is_script() => {
                write!(f, "{} script for job {job}", self.operation)
            }
            Some(ref job) => write!(f, "{} for artifact {job}", self.operation),
            None => write!(f, "{}", self.operation),
        }
    }
}

/// Coarse classification of an [`InstanceError`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The command could not be delivered or its session broke.
    Transport,
    /// The remote command ran and exited nonzero.
    RemoteExit,
    /// Remote output could not be parsed.
    Parse,
    /// Several independent failures.
    Aggregate,
}

/// Failure of an operation against one deployed instance.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InstanceError {
    /// The SSH transport failed.
    #[error("Error attempting to run {subject} on {instance}. Error: {source}")]
    Transport {
        /// What was being attempted.
        subject: Subject,
        /// Instance identifier (`name/id`).
        instance: String,
        /// Underlying transport error.
        #[source]
        source: SshError,
    },
    /// The remote command exited nonzero.
    #[error(
        "{subject} failed on {instance}.\nExit code: {exit_code}\nStdout: {stdout}\nStderr: {stderr}"
    )]
    RemoteExit {
        /// What was being attempted.
        subject: Subject,
        /// Instance identifier (`name/id`).
        instance: String,
        /// Remote exit status.
        exit_code: i32,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Remote output did not parse.
    #[error("{subject} on {instance} returned invalid output: {message}")]
    Parse {
        /// What was being attempted.
        subject: Subject,
        /// Instance identifier (`name/id`).
        instance: String,
        /// Parser error text.
        message: String,
    },
    /// Several failures from one phase.
    #[error("{0}")]
    Aggregate(AggregateError),
}

impl InstanceError {
    /// Returns the error's tag.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::RemoteExit { .. } => ErrorKind::RemoteExit,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Aggregate(_) => ErrorKind::Aggregate,
        }
    }

    /// Subject of a leaf error; `None` for aggregates.
    #[must_use]
    pub const fn subject(&self) -> Option<&Subject> {
        match self {
            Self::Transport { subject, .. }
            | Self::RemoteExit { subject, .. }
            | Self::Parse { subject, .. } => Some(subject),
            Self::Aggregate(_) => None,
        }
    }

    /// Leaf errors in order; a leaf yields itself.
    #[must_use]
    pub fn leaves(&self) -> &[Self] {
        match self {
            Self::Aggregate(aggregate) => aggregate.errors(),
            leaf => std::slice::from_ref(leaf),
        }
    }
}

/// Ordered collection of independent failures.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AggregateError {
    errors: Vec<InstanceError>,
}

impl AggregateError {
    /// Failures in the order they occurred.
    #[must_use]
    pub fn errors(&self) -> &[InstanceError] {
        &self.errors
    }

    /// Number of failures.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `true` when no failure was recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consumes the aggregate, returning its failures.
    #[must_use]
    pub fn into_errors(self) -> Vec<InstanceError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.errors.len())?;
        for (position, err) in self.errors.iter().enumerate() {
            write!(f, "\nerror {}:\n{err}", position + 1)?;
        }
        Ok(())
    }
}

impl StdError for AggregateError {}

/// Outcome of running one phase across an instance's jobs.
pub type PhaseResult = Result<(), InstanceError>;

/// Folds failures into a single result: none is success, one is returned
/// unchanged, several become [`InstanceError::Aggregate`]. Nested aggregates
/// are flattened so each leaf is reported once.
///
/// # Errors
///
/// Returns the folded error when `errors` yields anything.
pub fn fold_errors(errors: impl IntoIterator<Item = InstanceError>) -> PhaseResult {
    let mut flattened = Vec::new();
    for err in errors {
        match err {
            InstanceError::Aggregate(aggregate) => flattened.extend(aggregate.into_errors()),
            leaf => flattened.push(leaf),
        }
    }

    match flattened.len() {
        0 => Ok(()),
        1 => flattened.pop().map_or(Ok(()), Err),
        _ => Err(InstanceError::Aggregate(AggregateError { errors: flattened })),
    }
}
