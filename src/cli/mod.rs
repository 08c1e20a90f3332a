//! Command-line interface definitions for the `bbr-instance` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::{Args, Parser};

/// Top-level CLI for the `bbr-instance` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bbr-instance",
    about = "Back up and restore the BBR jobs of a single deployed instance over SSH",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// List the jobs and lifecycle scripts found on the instance.
    #[command(name = "jobs", about = "List the jobs and lifecycle scripts found on the instance")]
    Jobs(InstanceArgs),
    /// Lock, back up and unlock every job, then download the artifacts.
    #[command(
        name = "backup",
        about = "Lock, back up and unlock every job, then download the artifacts"
    )]
    Backup(BackupCommand),
    /// Upload artifacts, restore every job, then unlock.
    #[command(name = "restore", about = "Upload artifacts, restore every job, then unlock")]
    Restore(RestoreCommand),
}

/// Identifies the instance to operate on.
#[derive(Debug, Args)]
pub(crate) struct InstanceArgs {
    /// Address of the instance to connect to.
    #[arg(long, value_name = "HOST")]
    pub(crate) host: String,
    /// Instance group name, used in logs and artifact paths.
    #[arg(long, value_name = "NAME")]
    pub(crate) instance_group: String,
    /// Index of the instance within its group.
    #[arg(long, value_name = "INDEX", default_value = "0")]
    pub(crate) index: String,
    /// Unique instance id.
    #[arg(long, value_name = "ID")]
    pub(crate) id: String,
}

/// Arguments for the `bbr-instance backup` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BackupCommand {
    /// Instance to back up.
    #[command(flatten)]
    pub(crate) instance: InstanceArgs,
    /// Local directory receiving one `<artifact>.tar` per job and
    /// `checksums.json`.
    #[arg(long, value_name = "DIR")]
    pub(crate) output: Utf8PathBuf,
}

/// Arguments for the `bbr-instance restore` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RestoreCommand {
    /// Instance to restore.
    #[command(flatten)]
    pub(crate) instance: InstanceArgs,
    /// Local directory holding the `<artifact>.tar` files of a backup.
    #[arg(long, value_name = "DIR")]
    pub(crate) input: Utf8PathBuf,
}
