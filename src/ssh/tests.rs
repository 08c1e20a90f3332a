//! Tests for the process-backed SSH connection.
//!
//! A stand-in `ssh` script executes the final argument with `sh -c`, so the
//! real process plumbing (pipes, exit codes, stdin forwarding) is exercised
//! without a network.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Cursor, Read, Write};
use std::os::unix::fs::PermissionsExt;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;
use crate::config::InstanceConfig;
use crate::test_support::instance_config;

struct FakeSsh {
    _dir: TempDir,
    config: InstanceConfig,
}

#[fixture]
fn fake_ssh() -> FakeSsh {
    let dir = TempDir::new().expect("create temp dir for fake ssh");
    let script = dir.path().join("ssh");
    fs::write(&script, "#!/bin/sh\nfor last; do :; done\nexec sh -c \"$last\"\n")
        .expect("write fake ssh script");
    let mut permissions = fs::metadata(&script)
        .expect("stat fake ssh script")
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(&script, permissions).expect("make fake ssh executable");

    let config = InstanceConfig {
        ssh_bin: script.to_string_lossy().into_owned(),
        ..instance_config()
    };
    FakeSsh { _dir: dir, config }
}

#[rstest]
fn run_captures_output_and_exit_code(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");

    let output = connection
        .run("printf out && printf err 1>&2; exit 3")
        .expect("transport should succeed");

    assert_eq!(output, CommandOutput::new(3, "out", "err"));
}

#[rstest]
fn run_reports_client_failure_as_transport_error(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");

    let err = connection
        .run("printf 'connection refused' 1>&2; exit 255")
        .expect_err("status 255 belongs to the ssh client");

    assert_eq!(err.exit_code(), Some(255));
    assert!(
        err.to_string().contains("connection refused"),
        "expected client stderr in error, got: {err}"
    );
}

#[rstest]
fn run_reports_spawn_failure() {
    let config = InstanceConfig {
        ssh_bin: String::from("definitely-not-a-real-ssh-binary"),
        ..instance_config()
    };
    let connection = ProcessSshConnection::new(&config, "10.0.0.1");

    let err = connection.run("true").expect_err("spawn should fail");

    assert!(matches!(err, SshError::Spawn { .. }), "got {err:?}");
    assert_eq!(err.exit_code(), None);
}

#[rstest]
fn stream_copies_stdout_into_writer(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");
    let mut sink = Vec::new();

    let output = connection
        .stream("printf 'tar bytes' && printf warn 1>&2", &mut sink)
        .expect("stream should succeed");

    assert_eq!(sink, b"tar bytes");
    assert_eq!(output.stderr, "warn");
    assert_eq!(output.exit_code, 0);
}

#[rstest]
fn stream_stdin_feeds_reader_to_remote(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");
    let mut reader = Cursor::new(b"archive contents".to_vec());

    let output = connection
        .stream_stdin("cat; exit 4", &mut reader)
        .expect("stream should succeed");

    assert_eq!(output, CommandOutput::new(4, "archive contents", ""));
}

#[rstest]
fn stream_stdin_keeps_exit_status_when_remote_stops_reading(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");
    let mut reader = io::repeat(0).take(4 * 1024 * 1024);

    let output = connection
        .stream_stdin(
            "printf 'tar: Cannot open: Permission denied' 1>&2; exit 2",
            &mut reader,
        )
        .expect("remote failure is not a transport failure");

    assert_eq!(output.exit_code, 2);
    assert_eq!(output.stderr, "tar: Cannot open: Permission denied");
}

struct ClosedWriter;

impl Write for ClosedWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::from(io::ErrorKind::BrokenPipe))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[rstest]
fn stream_keeps_exit_status_when_copy_breaks_after_remote_failure(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");

    let output = connection
        .stream("printf partial; printf 'disk gone' 1>&2; exit 5", &mut ClosedWriter)
        .expect("remote failure is not a transport failure");

    assert_eq!(output.exit_code, 5);
    assert_eq!(output.stderr, "disk gone");
}

#[rstest]
fn stream_reports_broken_pipe_when_remote_succeeded(fake_ssh: FakeSsh) {
    let connection = ProcessSshConnection::new(&fake_ssh.config, "10.0.0.1");

    let err = connection
        .stream("printf partial", &mut ClosedWriter)
        .expect_err("a truncated copy of a successful command is a transport failure");

    assert!(matches!(err, SshError::Io { .. }), "got {err:?}");
}

#[rstest]
fn build_args_applies_ssh_options() {
    let config = InstanceConfig {
        ssh_user: String::from("vcap"),
        ssh_port: 2222,
        ssh_identity_file: Some(String::from("/keys/id_ed25519")),
        ..instance_config()
    };
    let connection = ProcessSshConnection::new(&config, "10.0.0.1");

    let args = connection.build_args("sudo true");
    let rendered = args
        .iter()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    assert_eq!(
        rendered,
        "-p 2222 -i /keys/id_ed25519 -o BatchMode=yes -o StrictHostKeyChecking=no \
         -o UserKnownHostsFile=/dev/null vcap@10.0.0.1 sudo true"
    );
    assert_eq!(args.last(), Some(&OsString::from("sudo true")));
    assert_eq!(connection.username(), "vcap");
}
