//! Per-instance backup and restore orchestration for BBR lifecycle scripts.
//!
//! A release job opts into backup and restore by installing scripts under
//! `/var/vcap/jobs/<job>/bin/bbr/`. This crate discovers those scripts on one
//! instance over SSH, drives each job through lock, backup, unlock and
//! restore, and moves the resulting artifacts as tar streams. Failures are
//! isolated per job and reported together.

pub mod config;
pub mod error;
pub mod instance;
pub mod logger;
pub mod ssh;
pub mod test_support;

pub use config::{ConfigError, InstanceConfig};
pub use error::{AggregateError, ErrorKind, InstanceError, Operation, PhaseResult, fold_errors};
pub use instance::{
    ARTIFACT_DIRECTORY, Artifact, BackupAndRestoreScripts, BackupChecksum, DeployedInstance,
    InstanceIdentifier, Job, JobFinder, JobSelection, Jobs, LockState, Metadata, Script, ScriptRole,
};
pub use logger::{LOG_TAG, Logger, SharedLogger, TracingLogger, init_tracing};
pub use ssh::{CommandOutput, ProcessSshConnection, SshConnection, SshError, StreamOutput};
