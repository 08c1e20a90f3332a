//! Tests for single-job phases.

use std::sync::Arc;

use rstest::rstest;

use super::super::*;
use super::fixtures::{connection, job, job_with_metadata, logger, named};
use crate::error::{ErrorKind, InstanceError, Operation};
use crate::ssh::SshError;
use crate::test_support::{RecordingLogger, ScriptedConnection};

const BACKUP: &str = "/var/vcap/jobs/redis-server/bin/bbr/backup";
const RESTORE: &str = "/var/vcap/jobs/redis-server/bin/bbr/restore";
const LOCK: &str = "/var/vcap/jobs/redis-server/bin/bbr/pre-backup-lock";
const UNLOCK: &str = "/var/vcap/jobs/redis-server/bin/bbr/post-backup-unlock";
const RESTORE_UNLOCK: &str = "/var/vcap/jobs/redis-server/bin/bbr/post-restore-unlock";

#[rstest]
fn phases_without_scripts_make_no_remote_calls(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    let mut job = job(&connection, &logger, &["/var/vcap/jobs/redis-server/bin/bbr/metadata"]);

    job.pre_backup_lock().expect("no-op lock");
    job.backup().expect("no-op backup");
    job.post_backup_unlock().expect("no-op unlock");
    job.restore().expect("no-op restore");
    job.post_restore_unlock().expect("no-op restore unlock");

    assert!(connection.invocations().is_empty());
    assert!(logger.records().is_empty());
}

#[rstest]
fn backup_creates_directory_and_exports_both_variables(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    let mut job = job(&connection, &logger, &[BACKUP]);

    job.backup().expect("backup should succeed");

    assert_eq!(
        connection.commands(),
        [format!(
            "sudo mkdir -p /var/vcap/store/bbr-backup/redis-server && sudo \
             BBR_ARTIFACT_DIRECTORY=/var/vcap/store/bbr-backup/redis-server/ \
             ARTIFACT_DIRECTORY=/var/vcap/store/bbr-backup/redis-server/ {BACKUP}"
        )]
    );
    let stdout = logger.stdout_contents();
    assert!(stdout.contains(&format!("DEBUG - > {BACKUP}\n")));
    assert!(stdout.contains("INFO - Backing up redis-server on redis/abc-123...\n"));
    assert!(stdout.contains("INFO - Done.\n"));
}

#[rstest]
fn backup_uses_custom_artifact_name(connection: ScriptedConnection, logger: Arc<RecordingLogger>) {
    let mut job = job_with_metadata(&connection, &logger, &[BACKUP], named(Some("shared"), None));

    job.backup().expect("backup should succeed");

    assert_eq!(job.backup_artifact_directory(), "/var/vcap/store/bbr-backup/shared");
    assert_eq!(job.restore_artifact_directory(), "/var/vcap/store/bbr-backup/redis-server");
    let commands = connection.commands();
    let command = commands.first().expect("backup command");
    assert!(command.contains("BBR_ARTIFACT_DIRECTORY=/var/vcap/store/bbr-backup/shared/"));
}

#[rstest]
fn restore_exports_restore_directory(connection: ScriptedConnection, logger: Arc<RecordingLogger>) {
    let mut job = job_with_metadata(&connection, &logger, &[RESTORE], named(None, Some("shared")));

    job.restore().expect("restore should succeed");

    assert_eq!(
        connection.commands(),
        [format!(
            "sudo BBR_ARTIFACT_DIRECTORY=/var/vcap/store/bbr-backup/shared/ \
             ARTIFACT_DIRECTORY=/var/vcap/store/bbr-backup/shared/ {RESTORE}"
        )]
    );
    assert!(logger
        .stdout_contents()
        .contains("INFO - Restoring redis-server on redis/abc-123...\n"));
}

#[rstest]
fn lock_and_unlock_run_under_sudo_and_track_state(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    let mut job = job(&connection, &logger, &[LOCK, UNLOCK]);
    assert_eq!(job.lock_state(), LockState::Unlocked);

    job.pre_backup_lock().expect("lock should succeed");
    assert_eq!(job.lock_state(), LockState::Locked);

    job.post_backup_unlock().expect("unlock should succeed");
    assert_eq!(job.lock_state(), LockState::Unlocked);

    assert_eq!(connection.commands(), [format!("sudo {LOCK}"), format!("sudo {UNLOCK}")]);
    let stdout = logger.stdout_contents();
    assert!(stdout.contains("INFO - Locking redis-server on redis/abc-123 for backup...\n"));
    assert!(stdout.contains("INFO - Unlocking redis-server on redis/abc-123...\n"));
}

#[rstest]
fn unlock_runs_even_when_never_locked(connection: ScriptedConnection, logger: Arc<RecordingLogger>) {
    let mut job = job(&connection, &logger, &[RESTORE_UNLOCK]);

    job.post_restore_unlock().expect("unlock should succeed");

    assert_eq!(connection.commands(), [format!("sudo {RESTORE_UNLOCK}")]);
}

#[rstest]
fn failing_unlock_reports_output_and_leaves_job_unlocking(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    connection.push_success();
    connection.push_output(1, "i'm a stdout", "i'm a stderr");
    let mut job = job(&connection, &logger, &[LOCK, UNLOCK]);
    job.pre_backup_lock().expect("lock should succeed");

    let err = job.post_backup_unlock().expect_err("unlock should fail");

    assert_eq!(err.kind(), ErrorKind::RemoteExit);
    assert_eq!(
        err.subject().map(|subject| subject.operation),
        Some(Operation::PostBackupUnlock)
    );
    let text = err.to_string();
    assert!(text.contains("unlock script for job redis-server failed on redis/abc-123."));
    assert!(text.contains("Exit code: 1"));
    assert!(text.contains("Stdout: i'm a stdout"));
    assert!(text.contains("Stderr: i'm a stderr"));
    assert!(logger.stderr_contents().contains(
        "ERROR - unlock script for job redis-server failed on redis/abc-123.\nStdout: i'm a stdout\nStderr: i'm a stderr\n"
    ));
    assert_eq!(job.lock_state(), LockState::Unlocking);
}

#[rstest]
fn transport_failure_is_logged_and_returned(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    connection.push_transport_error(SshError::session("connection reset"));
    let mut job = job(&connection, &logger, &[LOCK]);

    let err = job.pre_backup_lock().expect_err("lock should fail");

    assert_eq!(err.kind(), ErrorKind::Transport);
    assert_eq!(job.lock_state(), LockState::Unlocked);
    assert!(logger.stderr_contents().contains(
        "ERROR - Error attempting to run pre backup lock script for job redis-server on redis/abc-123. Error: connection reset\n"
    ));
}

#[rstest]
fn transport_failure_with_exit_code_folds_both_signals(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    connection.push_transport_error(SshError::Session {
        message: String::from("session dropped"),
        exit_code: Some(3),
    });
    let mut job = job(&connection, &logger, &[RESTORE]);

    let err = job.restore().expect_err("restore should fail");

    assert_eq!(err.kind(), ErrorKind::Aggregate);
    let kinds = err.leaves().iter().map(InstanceError::kind).collect::<Vec<_>>();
    assert_eq!(kinds, [ErrorKind::Transport, ErrorKind::RemoteExit]);
    assert!(err.to_string().contains("session dropped"));
    assert!(err.to_string().contains("Exit code: 3"));
    let remote = err
        .leaves()
        .iter()
        .find(|leaf| leaf.kind() == ErrorKind::RemoteExit)
        .expect("remote exit leaf");
    assert!(
        remote.to_string().ends_with("Stderr: session dropped"),
        "client stderr should reach the remote exit failure, got: {remote}"
    );
}

#[rstest]
fn accessors_reflect_scripts_and_metadata(
    connection: ScriptedConnection,
    logger: Arc<RecordingLogger>,
) {
    let job = job_with_metadata(
        &connection,
        &logger,
        &[BACKUP, RESTORE_UNLOCK],
        named(Some("shared"), None),
    );

    assert_eq!(job.name(), "redis-server");
    assert_eq!(job.instance_identifier(), "redis/abc-123");
    assert!(job.has_backup());
    assert!(!job.has_restore());
    assert!(job.has_named_backup_artifact());
    assert!(!job.has_named_restore_artifact());
    assert_eq!(job.backup_artifact_name(), Some("shared"));
    assert_eq!(job.restore_artifact_or_job_name(), "redis-server");
    assert_eq!(job.backup_script().map(Script::as_str), Some(BACKUP));
    assert_eq!(job.post_restore_unlock_script().map(Script::as_str), Some(RESTORE_UNLOCK));
    assert!(job.pre_backup_lock_script().is_none());
}

#[rstest]
fn job_requires_at_least_one_script(connection: ScriptedConnection, logger: Arc<RecordingLogger>) {
    let job = Job::new(
        connection,
        "redis/abc-123",
        super::fixtures::shared(&logger),
        &BackupAndRestoreScripts::default(),
        Metadata::default(),
    );

    assert!(job.is_none());
}
