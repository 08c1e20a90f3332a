//! Tar-stream transport for one job's artifact directory.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io::{Read, Write};

use shell_escape::unix::escape;

use crate::error::{InstanceError, Operation, Subject};
use crate::logger::{LOG_TAG, SharedLogger};
use crate::ssh::{CommandOutput, SshConnection, SshError};

use super::job::Job;
use super::{InstanceIdentifier, shell_word};

/// SHA-256 per file, keyed by path relative to the artifact directory.
pub type BackupChecksum = BTreeMap<String, String>;

/// One job's artifact on one instance, in one direction.
#[derive(Clone, Debug)]
pub struct Artifact<C> {
    name: String,
    is_named: bool,
    directory: String,
    instance: InstanceIdentifier,
    connection: C,
    logger: SharedLogger,
}

impl<C: SshConnection> Artifact<C> {
    /// Artifact the job's `backup` script writes.
    #[must_use]
    pub fn for_backup(
        job: &Job<C>,
        instance: &InstanceIdentifier,
        connection: C,
        logger: SharedLogger,
    ) -> Self {
        Self {
            name: job.backup_artifact_or_job_name().to_owned(),
            is_named: job.has_named_backup_artifact(),
            directory: job.backup_artifact_directory(),
            instance: instance.clone(),
            connection,
            logger,
        }
    }

    /// Artifact the job's `restore` script reads.
    #[must_use]
    pub fn for_restore(
        job: &Job<C>,
        instance: &InstanceIdentifier,
        connection: C,
        logger: SharedLogger,
    ) -> Self {
        Self {
            name: job.restore_artifact_or_job_name().to_owned(),
            is_named: job.has_named_restore_artifact(),
            directory: job.restore_artifact_directory(),
            instance: instance.clone(),
            connection,
            logger,
        }
    }

    /// Artifact name: the custom name or else the job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when the name came from job metadata.
    #[must_use]
    pub const fn has_custom_name(&self) -> bool {
        self.is_named
    }

    /// Remote artifact directory.
    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Instance group name.
    #[must_use]
    pub fn instance_name(&self) -> &str {
        &self.instance.name
    }

    /// Index within the instance group.
    #[must_use]
    pub fn instance_index(&self) -> &str {
        &self.instance.index
    }

    /// Instance id.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance.id
    }

    /// Streams the directory as a tar archive into `writer` without
    /// buffering the whole archive.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] when the transport fails or `tar` exits
    /// nonzero.
    pub fn stream_from_remote(&self, writer: &mut dyn Write) -> Result<(), InstanceError> {
        self.logger.debug(
            LOG_TAG,
            &format!("Streaming backup from instance {}", self.instance),
        );
        let command = format!("sudo tar -C {} -c .", shell_word(&self.directory));
        let output = self
            .connection
            .stream(&command, writer)
            .map_err(|err| self.transport(Operation::StreamFromRemote, err))?;
        self.logger
            .debug(LOG_TAG, &format!("Stderr: {}", output.stderr));

        self.check_exit(
            Operation::StreamFromRemote,
            CommandOutput::new(output.exit_code, "", output.stderr),
        )
    }

    /// Recreates the directory and unpacks the tar archive read from
    /// `reader` into it.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] tagged [`Operation::CreateArtifactDirectory`]
    /// when the directory cannot be created (nothing is streamed), or
    /// [`Operation::StreamToRemote`] when the transfer fails.
    pub fn stream_to_remote(&self, reader: &mut dyn Read) -> Result<(), InstanceError> {
        let mkdir = format!("sudo mkdir -p {}", shell_word(&self.directory));
        self.run_checked(&mkdir, Operation::CreateArtifactDirectory)?;

        self.logger.debug(
            LOG_TAG,
            &format!("Streaming backup to instance {}", self.instance),
        );
        let command = format!(
            "sudo sh -c {}",
            escape(Cow::Owned(format!(
                "tar -C {} -x",
                shell_word(&self.directory)
            )))
        );
        let output = self
            .connection
            .stream_stdin(&command, reader)
            .map_err(|err| self.transport(Operation::StreamToRemote, err))?;
        self.log_output(&output);

        self.check_exit(Operation::StreamToRemote, output)
    }

    /// Human-readable size of the directory as reported by `du -sh`.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] when the transport fails or `du` exits
    /// nonzero.
    pub fn size(&self) -> Result<String, InstanceError> {
        let command = format!("sudo du -sh {} | cut -f1", shell_word(&self.directory));
        let output = self.run_checked(&command, Operation::Size)?;
        Ok(output.stdout.trim().to_owned())
    }

    /// SHA-256 of every file in the directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] when the transport fails or `shasum` exits
    /// nonzero.
    pub fn checksum(&self) -> Result<BackupChecksum, InstanceError> {
        self.logger.debug(
            LOG_TAG,
            &format!("Calculating shasum for remote files on {}", self.instance),
        );
        let command = format!(
            "cd {}; sudo sh -c {}",
            shell_word(&self.directory),
            escape(Cow::Borrowed("find . -type f | xargs shasum -a 256"))
        );
        let output = self.run_checked(&command, Operation::Checksum)?;
        Ok(parse_checksums(&output.stdout))
    }

    /// Removes the directory.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] when the transport fails or `rm` exits
    /// nonzero. A transport failure takes precedence.
    pub fn delete(&self) -> Result<(), InstanceError> {
        let command = format!("sudo rm -rf {}", shell_word(&self.directory));
        self.run_checked(&command, Operation::Delete).map(drop)
    }

    fn run_checked(
        &self,
        command: &str,
        operation: Operation,
    ) -> Result<CommandOutput, InstanceError> {
        self.logger.debug(
            LOG_TAG,
            &format!("Running {operation} on {}", self.instance),
        );
        let output = self
            .connection
            .run(command)
            .map_err(|err| self.transport(operation, err))?;
        self.log_output(&output);

        if output.is_success() {
            Ok(output)
        } else {
            Err(self.remote_exit(operation, output))
        }
    }

    fn check_exit(&self, operation: Operation, output: CommandOutput) -> Result<(), InstanceError> {
        if output.is_success() {
            Ok(())
        } else {
            Err(self.remote_exit(operation, output))
        }
    }

    fn log_output(&self, output: &CommandOutput) {
        self.logger
            .debug(LOG_TAG, &format!("Stdout: {}", output.stdout));
        self.logger
            .debug(LOG_TAG, &format!("Stderr: {}", output.stderr));
    }

    fn transport(&self, operation: Operation, source: SshError) -> InstanceError {
        self.logger.debug(
            LOG_TAG,
            &format!(
                "Error running {operation} on instance {}. Error: {source}",
                self.instance
            ),
        );
        InstanceError::Transport {
            subject: Subject::for_job(operation, &self.name),
            instance: self.instance.to_string(),
            source,
        }
    }

    fn remote_exit(&self, operation: Operation, output: CommandOutput) -> InstanceError {
        InstanceError::RemoteExit {
            subject: Subject::for_job(operation, &self.name),
            instance: self.instance.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Parses `shasum` output (`<hash>  <path>` per line). The `-` entry
/// `shasum` prints for empty input is dropped, so an empty directory yields
/// an empty map.
#[must_use]
pub fn parse_checksums(output: &str) -> BackupChecksum {
    output
        .lines()
        .filter_map(|line| line.trim().split_once(' '))
        .map(|(hash, path)| (hash, path.trim()))
        .filter(|(_, path)| !path.is_empty() && *path != "-")
        .map(|(hash, path)| (path.to_owned(), hash.to_owned()))
        .collect()
}
