//! Remote discovery of lifecycle scripts and job metadata.

use std::collections::BTreeMap;

use crate::error::{InstanceError, Operation, Subject};
use crate::logger::{LOG_TAG, SharedLogger};
use crate::ssh::SshConnection;

use super::jobs::Jobs;
use super::metadata::Metadata;
use super::script::{BackupAndRestoreScripts, Script};
use super::{InstanceIdentifier, shell_word};

/// Lists every candidate script under the jobs root.
pub const FIND_SCRIPTS_COMMAND: &str = "find /var/vcap/jobs/*/bin/bbr/* -type f";

const MISSING_DIRECTORY: &str = "No such file or directory";

/// Builds [`Jobs`] from what is installed on an instance.
#[derive(Clone, Debug)]
pub struct JobFinder {
    logger: SharedLogger,
}

impl JobFinder {
    /// Creates a finder that reports progress through `logger`.
    #[must_use]
    pub const fn new(logger: SharedLogger) -> Self {
        Self { logger }
    }

    /// Finds the platform scripts on the instance, runs every `metadata`
    /// script, and groups the result into jobs.
    ///
    /// A missing jobs root means the instance has no jobs. Every other
    /// failure, including a metadata script failing or printing invalid
    /// YAML, aborts discovery.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] for transport failures, a `find` failure
    /// other than a missing directory, or any metadata failure.
    pub fn find_jobs<C: SshConnection + Clone>(
        &self,
        instance: &InstanceIdentifier,
        connection: &C,
    ) -> Result<Jobs<C>, InstanceError> {
        let identifier = instance.to_string();
        let scripts = self.find_scripts(&identifier, connection)?;

        let mut metadata = BTreeMap::new();
        for script in &scripts.metadata_only() {
            let job_metadata = self.fetch_metadata(&identifier, connection, script)?;
            metadata.insert(script.job_name().to_owned(), job_metadata);
        }

        Ok(Jobs::new(
            connection,
            &identifier,
            &self.logger,
            &scripts,
            &metadata,
        ))
    }

    fn find_scripts<C: SshConnection>(
        &self,
        identifier: &str,
        connection: &C,
    ) -> Result<BackupAndRestoreScripts, InstanceError> {
        let subject = Subject::instance_wide(Operation::FindScripts);
        let output = connection
            .run(FIND_SCRIPTS_COMMAND)
            .map_err(|source| InstanceError::Transport {
                subject: subject.clone(),
                instance: identifier.to_owned(),
                source,
            })?;

        if !output.is_success() {
            if output.stderr.contains(MISSING_DIRECTORY) {
                self.logger.debug(
                    LOG_TAG,
                    &format!("No lifecycle scripts installed on {identifier}"),
                );
                return Ok(BackupAndRestoreScripts::default());
            }
            let err = InstanceError::RemoteExit {
                subject,
                instance: identifier.to_owned(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            };
            self.logger.error(LOG_TAG, &err.to_string());
            return Err(err);
        }

        let scripts = BackupAndRestoreScripts::from_paths(
            output.stdout.lines().map(str::trim).filter(|line| !line.is_empty()),
        );
        for script in &scripts {
            self.logger.debug(
                LOG_TAG,
                &format!("{identifier}/{}/{}", script.job_name(), script.name()),
            );
        }
        Ok(scripts)
    }

    fn fetch_metadata<C: SshConnection>(
        &self,
        identifier: &str,
        connection: &C,
        script: &Script,
    ) -> Result<Metadata, InstanceError> {
        let subject = Subject::for_job(Operation::Metadata, script.job_name());
        self.logger.debug(LOG_TAG, &format!("> {script}"));

        let output = connection
            .run(&shell_word(script.as_str()))
            .map_err(|source| InstanceError::Transport {
                subject: subject.clone(),
                instance: identifier.to_owned(),
                source,
            })?;

        if !output.is_success() {
            return Err(InstanceError::RemoteExit {
                subject,
                instance: identifier.to_owned(),
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        Metadata::parse(&output.stdout).map_err(|err| InstanceError::Parse {
            subject,
            instance: identifier.to_owned(),
            message: err.to_string(),
        })
    }
}
