//! Phase orchestration across the jobs of one deployed instance.

use crate::error::{InstanceError, Operation, PhaseResult, Subject, fold_errors};
use crate::logger::{LOG_TAG, SharedLogger};
use crate::ssh::SshConnection;

use super::artifact::Artifact;
use super::job::Job;
use super::job_finder::JobFinder;
use super::jobs::Jobs;
use super::{ARTIFACT_DIRECTORY, InstanceIdentifier};

/// One VM and the jobs discovered on it.
///
/// Each phase visits every job in discovery order, keeps going past
/// failures, and reports them together. Ordering phases across instances is
/// the caller's job.
#[derive(Clone, Debug)]
pub struct DeployedInstance<C> {
    identifier: InstanceIdentifier,
    artifact_dir_created: bool,
    connection: C,
    logger: SharedLogger,
    jobs: Jobs<C>,
}

impl<C: SshConnection + Clone> DeployedInstance<C> {
    /// Wraps already-discovered jobs.
    #[must_use]
    pub const fn new(
        identifier: InstanceIdentifier,
        artifact_dir_created: bool,
        connection: C,
        logger: SharedLogger,
        jobs: Jobs<C>,
    ) -> Self {
        Self {
            identifier,
            artifact_dir_created,
            connection,
            logger,
            jobs,
        }
    }

    /// Discovers the instance's jobs over `connection`.
    ///
    /// # Errors
    ///
    /// Returns the discovery failure from [`JobFinder::find_jobs`].
    pub fn discover(
        identifier: InstanceIdentifier,
        connection: C,
        logger: SharedLogger,
    ) -> Result<Self, InstanceError> {
        let jobs = JobFinder::new(SharedLogger::clone(&logger)).find_jobs(&identifier, &connection)?;
        Ok(Self::new(identifier, false, connection, logger, jobs))
    }

    /// Instance group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.identifier.name
    }

    /// Index within the instance group.
    #[must_use]
    pub fn index(&self) -> &str {
        &self.identifier.index
    }

    /// Instance id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.identifier.id
    }

    /// Full identifier.
    #[must_use]
    pub const fn identifier(&self) -> &InstanceIdentifier {
        &self.identifier
    }

    /// Returns `true` once this run has created the artifact root.
    #[must_use]
    pub const fn artifact_dir_created(&self) -> bool {
        self.artifact_dir_created
    }

    /// Jobs on the instance, in discovery order.
    #[must_use]
    pub const fn jobs(&self) -> &Jobs<C> {
        &self.jobs
    }

    /// Returns `true` when any job has a `backup` script.
    #[must_use]
    pub fn is_backupable(&self) -> bool {
        self.jobs.any_are_backupable()
    }

    /// Returns `true` when any job has a `restore` script.
    #[must_use]
    pub fn is_restorable(&self) -> bool {
        self.jobs.any_are_restorable()
    }

    /// Custom backup artifact names declared by the jobs.
    #[must_use]
    pub fn custom_backup_artifact_names(&self) -> Vec<&str> {
        self.jobs.custom_backup_artifact_names()
    }

    /// Custom restore artifact names declared by the jobs.
    #[must_use]
    pub fn custom_restore_artifact_names(&self) -> Vec<&str> {
        self.jobs.custom_restore_artifact_names()
    }

    /// Checks whether the artifact root exists: `stat` exiting zero means
    /// yes, any other exit means no.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError::Transport`] when the check cannot run.
    pub fn artifact_dir_exists(&self) -> Result<bool, InstanceError> {
        let output = self
            .connection
            .run(&format!("stat {ARTIFACT_DIRECTORY}"))
            .map_err(|source| InstanceError::Transport {
                subject: Subject::instance_wide(Operation::CheckArtifactDirectory),
                instance: self.identifier.to_string(),
                source,
            })?;
        Ok(output.is_success())
    }

    /// Runs every job's `pre-backup-lock`.
    ///
    /// # Errors
    ///
    /// Returns every job failure, folded.
    pub fn pre_backup_lock(&mut self) -> PhaseResult {
        self.run_phase(Job::pre_backup_lock)
    }

    /// Runs every job's `backup`. The artifact root counts as created as
    /// soon as any job is backupable, whether or not its script succeeds.
    ///
    /// # Errors
    ///
    /// Returns every job failure, folded.
    pub fn backup(&mut self) -> PhaseResult {
        if self.is_backupable() {
            self.artifact_dir_created = true;
        }
        self.run_phase(Job::backup)
    }

    /// Runs every job's `post-backup-unlock`, including jobs whose lock
    /// failed or never ran.
    ///
    /// # Errors
    ///
    /// Returns every job failure, folded.
    pub fn post_backup_unlock(&mut self) -> PhaseResult {
        self.run_phase(Job::post_backup_unlock)
    }

    /// Runs every job's `restore`.
    ///
    /// # Errors
    ///
    /// Returns every job failure, folded.
    pub fn restore(&mut self) -> PhaseResult {
        self.run_phase(Job::restore)
    }

    /// Runs every job's `post-restore-unlock`.
    ///
    /// # Errors
    ///
    /// Returns every job failure, folded.
    pub fn post_restore_unlock(&mut self) -> PhaseResult {
        self.run_phase(Job::post_restore_unlock)
    }

    /// One backup artifact per job, backupable or not.
    #[must_use]
    pub fn artifacts_to_backup(&self) -> Vec<Artifact<C>> {
        self.jobs
            .iter()
            .map(|job| {
                Artifact::for_backup(
                    job,
                    &self.identifier,
                    self.connection.clone(),
                    SharedLogger::clone(&self.logger),
                )
            })
            .collect()
    }

    /// One restore artifact per job, restorable or not.
    #[must_use]
    pub fn artifacts_to_restore(&self) -> Vec<Artifact<C>> {
        self.jobs
            .iter()
            .map(|job| {
                Artifact::for_restore(
                    job,
                    &self.identifier,
                    self.connection.clone(),
                    SharedLogger::clone(&self.logger),
                )
            })
            .collect()
    }

    /// Removes the artifact root if this run created it.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] when removal fails.
    pub fn cleanup(&mut self) -> PhaseResult {
        if !self.artifact_dir_created {
            return Ok(());
        }
        self.remove_artifact_root()?;
        self.artifact_dir_created = false;
        Ok(())
    }

    /// Removes the artifact root left behind by an earlier run.
    ///
    /// # Errors
    ///
    /// Returns [`InstanceError`] when removal fails.
    pub fn cleanup_previous(&self) -> PhaseResult {
        self.remove_artifact_root()
    }

    fn remove_artifact_root(&self) -> PhaseResult {
        self.logger.debug(
            LOG_TAG,
            &format!("Cleaning up artifact directory on {}", self.identifier),
        );
        let subject = Subject::instance_wide(Operation::Cleanup);
        let output = self
            .connection
            .run(&format!("sudo rm -rf {ARTIFACT_DIRECTORY}"))
            .map_err(|source| InstanceError::Transport {
                subject: subject.clone(),
                instance: self.identifier.to_string(),
                source,
            })?;

        if output.is_success() {
            return Ok(());
        }
        let err = InstanceError::RemoteExit {
            subject,
            instance: self.identifier.to_string(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        };
        self.logger.error(LOG_TAG, &err.to_string());
        Err(err)
    }

    fn run_phase(&mut self, phase: fn(&mut Job<C>) -> PhaseResult) -> PhaseResult {
        fold_errors(self.jobs.iter_mut().filter_map(|job| phase(job).err()))
    }
}
