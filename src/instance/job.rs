//! One release job's lifecycle scripts and the phases they drive.

use crate::error::{InstanceError, Operation, PhaseResult, Subject, fold_errors};
use crate::logger::{LOG_TAG, SharedLogger};
use crate::ssh::{CommandOutput, SshConnection, SshError};

use super::metadata::Metadata;
use super::script::{BackupAndRestoreScripts, Script, ScriptRole};
use super::{artifact_directory, shell_word};

/// Where a job stands in the lock/unlock cycle of the current run.
///
/// Tracked for observation only; unlock phases run regardless of state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LockState {
    /// No lock held, or the last unlock succeeded.
    #[default]
    Unlocked,
    /// `pre-backup-lock` succeeded and no unlock has succeeded since.
    Locked,
    /// An unlock script ran but failed, so the job may still be quiesced.
    Unlocking,
}

/// Lifecycle scripts and metadata of one job on one instance.
///
/// Any script may be absent, which turns the matching phase into a no-op.
#[derive(Clone, Debug)]
pub struct Job<C> {
    name: String,
    metadata: Metadata,
    backup_script: Option<Script>,
    restore_script: Option<Script>,
    pre_backup_lock_script: Option<Script>,
    post_backup_unlock_script: Option<Script>,
    post_restore_unlock_script: Option<Script>,
    connection: C,
    instance_identifier: String,
    logger: SharedLogger,
    lock_state: LockState,
}

impl<C: SshConnection> Job<C> {
    /// Builds a job from its scripts. The job takes its name from the first
    /// script; returns `None` when `scripts` is empty.
    #[must_use]
    pub fn new(
        connection: C,
        instance_identifier: impl Into<String>,
        logger: SharedLogger,
        scripts: &BackupAndRestoreScripts,
        metadata: Metadata,
    ) -> Option<Self> {
        let name = scripts.iter().next()?.job_name().to_owned();
        if name.is_empty() {
            return None;
        }

        Some(Self {
            name,
            metadata,
            backup_script: scripts.first_with_role(ScriptRole::Backup),
            restore_script: scripts.first_with_role(ScriptRole::Restore),
            pre_backup_lock_script: scripts.first_with_role(ScriptRole::PreBackupLock),
            post_backup_unlock_script: scripts.first_with_role(ScriptRole::PostBackupUnlock),
            post_restore_unlock_script: scripts.single_post_restore_unlock_script(),
            connection,
            instance_identifier: instance_identifier.into(),
            logger,
            lock_state: LockState::Unlocked,
        })
    }

    /// Job name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Metadata the job declared.
    #[must_use]
    pub const fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Identifier used in log lines (`name/id`).
    #[must_use]
    pub fn instance_identifier(&self) -> &str {
        &self.instance_identifier
    }

    /// Lock state observed so far in this run.
    #[must_use]
    pub const fn lock_state(&self) -> LockState {
        self.lock_state
    }

    /// Custom backup artifact name, if declared.
    #[must_use]
    pub fn backup_artifact_name(&self) -> Option<&str> {
        self.metadata.backup_name()
    }

    /// Custom restore artifact name, if declared.
    #[must_use]
    pub fn restore_artifact_name(&self) -> Option<&str> {
        self.metadata.restore_name()
    }

    /// Artifact name for backup: the custom name or else the job name.
    #[must_use]
    pub fn backup_artifact_or_job_name(&self) -> &str {
        self.backup_artifact_name().unwrap_or(&self.name)
    }

    /// Artifact name for restore: the custom name or else the job name.
    #[must_use]
    pub fn restore_artifact_or_job_name(&self) -> &str {
        self.restore_artifact_name().unwrap_or(&self.name)
    }

    /// Remote directory the backup script writes into.
    #[must_use]
    pub fn backup_artifact_directory(&self) -> String {
        artifact_directory(self.backup_artifact_or_job_name())
    }

    /// Remote directory the restore script reads from.
    #[must_use]
    pub fn restore_artifact_directory(&self) -> String {
        artifact_directory(self.restore_artifact_or_job_name())
    }

    /// Returns `true` when the job has a `backup` script.
    #[must_use]
    pub const fn has_backup(&self) -> bool {
        self.backup_script.is_some()
    }

    /// Returns `true` when the job has a `restore` script.
    #[must_use]
    pub const fn has_restore(&self) -> bool {
        self.restore_script.is_some()
    }

    /// Returns `true` when metadata names the backup artifact.
    #[must_use]
    pub fn has_named_backup_artifact(&self) -> bool {
        self.backup_artifact_name().is_some()
    }

    /// Returns `true` when metadata names the restore artifact.
    #[must_use]
    pub fn has_named_restore_artifact(&self) -> bool {
        self.restore_artifact_name().is_some()
    }

    /// `backup` script, if present.
    #[must_use]
    pub const fn backup_script(&self) -> Option<&Script> {
        self.backup_script.as_ref()
    }

    /// `restore` script, if present.
    #[must_use]
    pub const fn restore_script(&self) -> Option<&Script> {
        self.restore_script.as_ref()
    }

    /// `pre-backup-lock` script, if present.
    #[must_use]
    pub const fn pre_backup_lock_script(&self) -> Option<&Script> {
        self.pre_backup_lock_script.as_ref()
    }

    /// `post-backup-unlock` script, if present.
    #[must_use]
    pub const fn post_backup_unlock_script(&self) -> Option<&Script> {
        self.post_backup_unlock_script.as_ref()
    }

    /// `post-restore-unlock` script, if present.
    #[must_use]
    pub const fn post_restore_unlock_script(&self) -> Option<&Script> {
        self.post_restore_unlock_script.as_ref()
    }

    /// Runs `pre-backup-lock` under `sudo`.
    ///
    /// # Errors
    ///
    /// Returns the transport and remote-exit failures of the script, folded
    /// into one error.
    pub fn pre_backup_lock(&mut self) -> PhaseResult {
        let Some(script) = self.pre_backup_lock_script.clone() else {
            return Ok(());
        };
        self.logger.debug(LOG_TAG, &format!("> {script}"));
        self.logger.info(
            LOG_TAG,
            &format!(
                "Locking {} on {} for backup...",
                self.name, self.instance_identifier
            ),
        );

        let command = format!("sudo {}", shell_word(script.as_str()));
        let result = self.run_script(&command, Operation::PreBackupLock);
        if result.is_ok() {
            self.lock_state = LockState::Locked;
        }
        result
    }

    /// Creates the backup artifact directory and runs `backup` with the
    /// artifact directory exported.
    ///
    /// # Errors
    ///
    /// Returns the transport and remote-exit failures of the script, folded
    /// into one error.
    pub fn backup(&mut self) -> PhaseResult {
        let Some(script) = self.backup_script.clone() else {
            return Ok(());
        };
        self.logger.debug(LOG_TAG, &format!("> {script}"));
        self.logger.info(
            LOG_TAG,
            &format!("Backing up {} on {}...", self.name, self.instance_identifier),
        );

        let directory = self.backup_artifact_directory();
        let command = format!(
            "sudo mkdir -p {} && sudo {} {}",
            shell_word(&directory),
            artifact_directory_variables(&directory),
            shell_word(script.as_str())
        );
        self.run_script(&command, Operation::Backup)
    }

    /// Runs `post-backup-unlock` under `sudo`.
    ///
    /// # Errors
    ///
    /// Returns the transport and remote-exit failures of the script, folded
    /// into one error.
    pub fn post_backup_unlock(&mut self) -> PhaseResult {
        let Some(script) = self.post_backup_unlock_script.clone() else {
            return Ok(());
        };
        self.unlock(&script, Operation::PostBackupUnlock)
    }

    /// Runs `restore` with the restore artifact directory exported.
    ///
    /// # Errors
    ///
    /// Returns the transport and remote-exit failures of the script, folded
    /// into one error.
    pub fn restore(&mut self) -> PhaseResult {
        let Some(script) = self.restore_script.clone() else {
            return Ok(());
        };
        self.logger.debug(LOG_TAG, &format!("> {script}"));
        self.logger.info(
            LOG_TAG,
            &format!("Restoring {} on {}...", self.name, self.instance_identifier),
        );

        let command = format!(
            "sudo {} {}",
            artifact_directory_variables(&self.restore_artifact_directory()),
            shell_word(script.as_str())
        );
        self.run_script(&command, Operation::Restore)
    }

    /// Runs `post-restore-unlock` under `sudo`.
    ///
    /// # Errors
    ///
    /// Returns the transport and remote-exit failures of the script, folded
    /// into one error.
    pub fn post_restore_unlock(&mut self) -> PhaseResult {
        let Some(script) = self.post_restore_unlock_script.clone() else {
            return Ok(());
        };
        self.unlock(&script, Operation::PostRestoreUnlock)
    }

    fn unlock(&mut self, script: &Script, operation: Operation) -> PhaseResult {
        self.logger.debug(LOG_TAG, &format!("> {script}"));
        self.logger.info(
            LOG_TAG,
            &format!("Unlocking {} on {}...", self.name, self.instance_identifier),
        );

        let command = format!("sudo {}", shell_word(script.as_str()));
        let result = self.run_script(&command, operation);
        self.lock_state = if result.is_ok() {
            LockState::Unlocked
        } else {
            LockState::Unlocking
        };
        result
    }

    fn run_script(&self, command: &str, operation: Operation) -> PhaseResult {
        self.logger.debug(
            LOG_TAG,
            &format!("Running {operation} on {}", self.instance_identifier),
        );
        let result = self.connection.run(command);
        if let Ok(ref output) = result {
            self.logger.debug(LOG_TAG, &format!("Stdout: {}", output.stdout));
            self.logger.debug(LOG_TAG, &format!("Stderr: {}", output.stderr));
        }
        self.logger.info(LOG_TAG, "Done.");

        match result {
            Ok(output) => self.check_exit(operation, output),
            Err(err) => {
                let observed = err
                    .exit_code()
                    .filter(|code| *code != 0)
                    .map(|code| CommandOutput::new(code, "", err.message()));
                let mut failures = vec![self.transport_failure(operation, err)];
                if let Some(output) = observed {
                    failures.push(self.remote_exit(operation, output));
                }
                fold_errors(failures)
            }
        }
    }

    fn check_exit(&self, operation: Operation, output: CommandOutput) -> PhaseResult {
        if output.is_success() {
            return Ok(());
        }
        Err(self.remote_exit(operation, output))
    }

    fn transport_failure(&self, operation: Operation, source: SshError) -> InstanceError {
        let err = InstanceError::Transport {
            subject: Subject::for_job(operation, &self.name),
            instance: self.instance_identifier.clone(),
            source,
        };
        self.logger.error(LOG_TAG, &err.to_string());
        err
    }

    fn remote_exit(&self, operation: Operation, output: CommandOutput) -> InstanceError {
        self.logger.error(
            LOG_TAG,
            &format!(
                "{operation} script for job {} failed on {}.\nStdout: {}\nStderr: {}",
                self.name, self.instance_identifier, output.stdout, output.stderr
            ),
        );
        InstanceError::RemoteExit {
            subject: Subject::for_job(operation, &self.name),
            instance: self.instance_identifier.clone(),
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Both variables point at the same directory; scripts written against
/// either name keep working.
fn artifact_directory_variables(directory: &str) -> String {
    let value = shell_word(&format!("{directory}/")).into_owned();
    format!("BBR_ARTIFACT_DIRECTORY={value} ARTIFACT_DIRECTORY={value}")
}
