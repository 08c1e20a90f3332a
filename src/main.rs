//! Binary entry point for the `bbr-instance` CLI.

use std::collections::BTreeMap;
use std::io::{self, BufReader, BufWriter, Write};
use std::process;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;

use bbr_instance::{
    ARTIFACT_DIRECTORY, BackupChecksum, DeployedInstance, InstanceConfig, InstanceError,
    InstanceIdentifier, Jobs, LOG_TAG, Logger, PhaseResult, ProcessSshConnection, ScriptRole,
    SshConnection, TracingLogger, fold_errors, init_tracing,
};

mod cli;

use cli::{BackupCommand, Cli, InstanceArgs, RestoreCommand};

/// File written next to the tarballs, mapping artifact to file to SHA-256.
const CHECKSUMS_FILE: &str = "checksums.json";

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("logging setup failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Instance(#[from] InstanceError),
    #[error("Directory {dir} already exists on instance {0}", dir = ARTIFACT_DIRECTORY)]
    ArtifactDirectoryExists(String),
    #[error("instance {0} has no backupable jobs")]
    NothingToBackup(String),
    #[error("instance {0} has no restorable jobs")]
    NothingToRestore(String),
    #[error("{path}: {message}")]
    LocalIo { path: Utf8PathBuf, message: String },
    #[error("failed to encode checksums: {0}")]
    Checksums(String),
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(&cli) {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn dispatch(cli: &Cli) -> Result<(), CliError> {
    let config =
        InstanceConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    config
        .validate()
        .map_err(|err| CliError::Config(err.to_string()))?;
    init_tracing(&config.log_level).map_err(|err| CliError::Logging(err.to_string()))?;

    match cli {
        Cli::Jobs(args) => list_jobs(&config, args),
        Cli::Backup(command) => backup(&config, command),
        Cli::Restore(command) => restore(&config, command),
    }
}

fn connect(
    config: &InstanceConfig,
    args: &InstanceArgs,
) -> Result<DeployedInstance<ProcessSshConnection>, CliError> {
    let identifier = InstanceIdentifier::new(&args.instance_group, &args.index, &args.id);
    let connection = ProcessSshConnection::new(config, &args.host);
    Ok(DeployedInstance::discover(
        identifier,
        connection,
        TracingLogger::shared(),
    )?)
}

fn list_jobs(config: &InstanceConfig, args: &InstanceArgs) -> Result<(), CliError> {
    let instance = connect(config, args)?;
    write!(io::stdout(), "{}", render_jobs(instance.jobs())).ok();
    Ok(())
}

fn backup(config: &InstanceConfig, command: &BackupCommand) -> Result<(), CliError> {
    let mut instance = connect(config, &command.instance)?;
    ensure_clean(&instance)?;
    if !instance.is_backupable() {
        return Err(CliError::NothingToBackup(instance.identifier().to_string()));
    }
    Dir::create_ambient_dir_all(&command.output, ambient_authority())
        .map_err(|err| local_io(&command.output, &err))?;

    let result = run_backup_phases(&mut instance)
        .map_err(CliError::from)
        .and_then(|()| download_artifacts(&instance, &command.output));
    let cleaned = instance.cleanup();
    result?;
    cleaned?;
    TracingLogger.info(LOG_TAG, &format!("Backup of {} complete.", instance.identifier()));
    Ok(())
}

fn restore(config: &InstanceConfig, command: &RestoreCommand) -> Result<(), CliError> {
    let mut instance = connect(config, &command.instance)?;
    ensure_clean(&instance)?;
    if !instance.is_restorable() {
        return Err(CliError::NothingToRestore(instance.identifier().to_string()));
    }

    let result = upload_artifacts(&instance, &command.input)
        .and_then(|()| run_restore_phases(&mut instance).map_err(CliError::from));
    let cleaned = instance.cleanup_previous();
    result?;
    cleaned?;
    TracingLogger.info(LOG_TAG, &format!("Restore of {} complete.", instance.identifier()));
    Ok(())
}

fn ensure_clean<C: SshConnection + Clone>(instance: &DeployedInstance<C>) -> Result<(), CliError> {
    if instance.artifact_dir_exists()? {
        return Err(CliError::ArtifactDirectoryExists(
            instance.identifier().to_string(),
        ));
    }
    Ok(())
}

/// Backup only runs once every lock succeeded; unlock is always attempted.
fn run_backup_phases<C: SshConnection + Clone>(instance: &mut DeployedInstance<C>) -> PhaseResult {
    let locked = instance.pre_backup_lock();
    let backed_up = if locked.is_ok() {
        instance.backup()
    } else {
        Ok(())
    };
    let unlocked = instance.post_backup_unlock();
    fold_errors([locked, backed_up, unlocked].into_iter().filter_map(Result::err))
}

fn run_restore_phases<C: SshConnection + Clone>(instance: &mut DeployedInstance<C>) -> PhaseResult {
    let restored = instance.restore();
    let unlocked = instance.post_restore_unlock();
    fold_errors([restored, unlocked].into_iter().filter_map(Result::err))
}

fn download_artifacts<C: SshConnection + Clone>(
    instance: &DeployedInstance<C>,
    output: &Utf8Path,
) -> Result<(), CliError> {
    let dir = open_local_dir(output)?;
    let mut checksums: BTreeMap<String, BackupChecksum> = BTreeMap::new();
    let artifacts = instance.artifacts_to_backup();

    for (job, artifact) in instance.jobs().iter().zip(&artifacts) {
        if !job.has_backup() {
            continue;
        }
        let file_name = tarball_name(artifact.name());
        let path = output.join(&file_name);
        let file = dir.create(&file_name).map_err(|err| local_io(&path, &err))?;
        let mut writer = BufWriter::new(file);
        artifact.stream_from_remote(&mut writer)?;
        writer.flush().map_err(|err| local_io(&path, &err))?;

        let size = artifact.size()?;
        tracing::info!(artifact = artifact.name(), %size, path = %path, "downloaded artifact");
        checksums.insert(artifact.name().to_owned(), artifact.checksum()?);
    }

    write_checksums(&dir, output, &checksums)
}

fn upload_artifacts<C: SshConnection + Clone>(
    instance: &DeployedInstance<C>,
    input: &Utf8Path,
) -> Result<(), CliError> {
    let dir = open_local_dir(input)?;
    let artifacts = instance.artifacts_to_restore();

    for (job, artifact) in instance.jobs().iter().zip(&artifacts) {
        if !job.has_restore() {
            continue;
        }
        let file_name = tarball_name(artifact.name());
        let path = input.join(&file_name);
        let file = dir.open(&file_name).map_err(|err| local_io(&path, &err))?;
        artifact.stream_to_remote(&mut BufReader::new(file))?;
        tracing::info!(artifact = artifact.name(), path = %path, "uploaded artifact");
    }
    Ok(())
}

fn write_checksums(
    dir: &Dir,
    directory: &Utf8Path,
    checksums: &BTreeMap<String, BackupChecksum>,
) -> Result<(), CliError> {
    let encoded =
        serde_json::to_string_pretty(checksums).map_err(|err| CliError::Checksums(err.to_string()))?;
    dir.write(CHECKSUMS_FILE, encoded)
        .map_err(|err| local_io(&directory.join(CHECKSUMS_FILE), &err))
}

fn open_local_dir(directory: &Utf8Path) -> Result<Dir, CliError> {
    Dir::open_ambient_dir(directory, ambient_authority()).map_err(|err| local_io(directory, &err))
}

fn tarball_name(artifact_name: &str) -> String {
    format!("{artifact_name}.tar")
}

fn render_jobs<C: SshConnection>(jobs: &Jobs<C>) -> String {
    let mut rendered = String::new();
    for job in jobs {
        let roles = [
            (ScriptRole::PreBackupLock, job.pre_backup_lock_script()),
            (ScriptRole::Backup, job.backup_script()),
            (ScriptRole::PostBackupUnlock, job.post_backup_unlock_script()),
            (ScriptRole::Restore, job.restore_script()),
            (ScriptRole::PostRestoreUnlock, job.post_restore_unlock_script()),
        ]
        .into_iter()
        .filter(|(_, script)| script.is_some())
        .filter_map(|(role, _)| role.file_name())
        .collect::<Vec<_>>()
        .join(", ");

        rendered.push_str(job.name());
        rendered.push('\n');
        rendered.push_str(&format!("  scripts: {roles}\n"));
        if job.has_backup() {
            rendered.push_str(&format!(
                "  backup artifact: {}\n",
                job.backup_artifact_or_job_name()
            ));
        }
        if job.has_restore() {
            rendered.push_str(&format!(
                "  restore artifact: {}\n",
                job.restore_artifact_or_job_name()
            ));
        }
    }
    rendered
}

fn local_io(path: &Utf8Path, err: &io::Error) -> CliError {
    CliError::LocalIo {
        path: path.to_owned(),
        message: err.to_string(),
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use bbr_instance::test_support::{RecordingLogger, ScriptedConnection};
    use bbr_instance::{ErrorKind, SharedLogger};
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;

    struct Harness {
        connection: ScriptedConnection,
        instance: DeployedInstance<ScriptedConnection>,
    }

    fn harness(find_output: &str) -> Harness {
        let connection = ScriptedConnection::new();
        connection.respond_when("find /var/vcap/jobs", 0, find_output, "");
        let logger: SharedLogger = Arc::new(RecordingLogger::new());
        let instance = DeployedInstance::discover(
            InstanceIdentifier::new("redis", "0", "abc-123"),
            connection.clone(),
            logger,
        )
        .expect("discovery should succeed");
        Harness {
            connection,
            instance,
        }
    }

    #[fixture]
    fn lockable() -> Harness {
        harness(
            "/var/vcap/jobs/redis/bin/bbr/pre-backup-lock\n\
             /var/vcap/jobs/redis/bin/bbr/backup\n\
             /var/vcap/jobs/redis/bin/bbr/post-backup-unlock\n\
             /var/vcap/jobs/redis/bin/bbr/restore\n\
             /var/vcap/jobs/redis/bin/bbr/post-restore-unlock\n\
             /var/vcap/jobs/broker/bin/bbr/restore\n",
        )
    }

    fn scripts_run(connection: &ScriptedConnection) -> Vec<String> {
        connection
            .commands()
            .into_iter()
            .filter(|command| !command.starts_with("find "))
            .filter_map(|command| command.rsplit('/').next().map(str::to_owned))
            .collect()
    }

    #[rstest]
    fn backup_phases_run_in_order(mut lockable: Harness) {
        run_backup_phases(&mut lockable.instance).expect("phases should succeed");

        assert_eq!(
            scripts_run(&lockable.connection),
            ["pre-backup-lock", "backup", "post-backup-unlock"]
        );
    }

    #[rstest]
    fn failed_lock_skips_backup_but_still_unlocks(mut lockable: Harness) {
        lockable
            .connection
            .respond_when("pre-backup-lock", 1, "", "cannot lock");

        let err = run_backup_phases(&mut lockable.instance).expect_err("lock fails");

        assert_eq!(err.kind(), ErrorKind::RemoteExit);
        assert_eq!(
            scripts_run(&lockable.connection),
            ["pre-backup-lock", "post-backup-unlock"]
        );
        assert!(!lockable.instance.artifact_dir_created());
    }

    #[rstest]
    fn restore_phases_unlock_after_failed_restore(mut lockable: Harness) {
        lockable
            .connection
            .respond_when("jobs/broker/bin/bbr/restore", 1, "", "broker down");

        let err = run_restore_phases(&mut lockable.instance).expect_err("restore fails");

        assert!(err.to_string().contains("restore script for job broker failed"));
        assert_eq!(
            scripts_run(&lockable.connection),
            ["restore", "restore", "post-restore-unlock"]
        );
    }

    #[rstest]
    fn download_writes_tarballs_and_checksums(mut lockable: Harness) {
        let output = TempDir::new().expect("temp dir");
        let output_path =
            Utf8PathBuf::from_path_buf(output.path().to_path_buf()).expect("utf8 temp dir");
        lockable.connection.set_stream_payload(b"redis tar");
        lockable
            .connection
            .respond_when("shasum", 0, "abc123  ./dump.rdb\n", "");
        run_backup_phases(&mut lockable.instance).expect("phases should succeed");

        download_artifacts(&lockable.instance, &output_path).expect("download should succeed");

        let tarball = fs::read(output_path.join("redis.tar")).expect("tarball written");
        assert_eq!(tarball, b"redis tar");
        assert!(!output_path.join("broker.tar").exists());
        let checksums = fs::read_to_string(output_path.join(CHECKSUMS_FILE)).expect("checksums");
        let decoded: BTreeMap<String, BackupChecksum> =
            serde_json::from_str(&checksums).expect("valid json");
        assert_eq!(
            decoded
                .get("redis")
                .and_then(|files| files.get("./dump.rdb"))
                .map(String::as_str),
            Some("abc123")
        );
    }

    #[rstest]
    fn upload_streams_each_restorable_tarball(lockable: Harness) {
        let input = TempDir::new().expect("temp dir");
        let input_path =
            Utf8PathBuf::from_path_buf(input.path().to_path_buf()).expect("utf8 temp dir");
        fs::write(input_path.join("redis.tar"), b"redis tar").expect("write redis tarball");
        fs::write(input_path.join("broker.tar"), b"broker tar").expect("write broker tarball");

        upload_artifacts(&lockable.instance, &input_path).expect("upload should succeed");

        assert_eq!(
            lockable.connection.received_stdin(),
            [b"redis tar".to_vec(), b"broker tar".to_vec()]
        );
    }

    #[rstest]
    fn upload_reports_missing_tarball(lockable: Harness) {
        let input = TempDir::new().expect("temp dir");
        let input_path =
            Utf8PathBuf::from_path_buf(input.path().to_path_buf()).expect("utf8 temp dir");

        let err = upload_artifacts(&lockable.instance, &input_path).expect_err("tarball missing");

        assert!(
            matches!(err, CliError::LocalIo { ref path, .. } if path.ends_with("redis.tar")),
            "unexpected error: {err}"
        );
    }

    #[rstest]
    fn ensure_clean_refuses_existing_artifact_directory(lockable: Harness) {
        lockable.connection.respond_when("stat ", 0, "", "");

        let err = ensure_clean(&lockable.instance).expect_err("directory exists");

        assert_eq!(
            err.to_string(),
            "Directory /var/vcap/store/bbr-backup already exists on instance redis/abc-123"
        );
    }

    #[rstest]
    fn render_jobs_lists_roles_and_artifacts(lockable: Harness) {
        assert_eq!(
            render_jobs(lockable.instance.jobs()),
            "redis\n  scripts: pre-backup-lock, backup, post-backup-unlock, restore, post-restore-unlock\n  \
             backup artifact: redis\n  restore artifact: redis\n\
             broker\n  scripts: restore\n  restore artifact: broker\n"
        );
    }

    #[rstest]
    fn write_error_renders_message() {
        let mut buffer = Vec::new();

        write_error(&mut buffer, &CliError::NothingToBackup(String::from("redis/abc")));

        assert_eq!(
            String::from_utf8(buffer).expect("utf8"),
            "instance redis/abc has no backupable jobs\n"
        );
    }
}
