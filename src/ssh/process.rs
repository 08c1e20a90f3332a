//! [`SshConnection`] backed by the system `ssh` client.

use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

use crate::config::InstanceConfig;

use super::{CommandOutput, SshConnection, SshError, StreamOutput};

/// Exit status the OpenSSH client reserves for its own failures.
const SSH_CLIENT_FAILURE: i32 = 255;

/// Connection that shells out to `ssh` once per remote command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProcessSshConnection {
    ssh_bin: String,
    user: String,
    host: String,
    port: u16,
    identity_file: Option<String>,
    batch_mode: bool,
    strict_host_key_checking: bool,
    known_hosts_file: String,
}

impl ProcessSshConnection {
    /// Builds a connection to `host` using the SSH settings in `config`.
    #[must_use]
    pub fn new(config: &InstanceConfig, host: impl Into<String>) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            user: config.ssh_user.clone(),
            host: host.into(),
            port: config.ssh_port,
            identity_file: config.ssh_identity_file.clone(),
            batch_mode: config.ssh_batch_mode,
            strict_host_key_checking: config.ssh_strict_host_key_checking,
            known_hosts_file: config.ssh_known_hosts_file.clone(),
        }
    }

    /// Host the connection targets.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub(crate) fn build_args(&self, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(self.port.to_string())];

        if let Some(ref identity_file) = self.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_home(identity_file)));
        }

        if self.batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.known_hosts_file
            )));
        }

        args.push(OsString::from(format!("{}@{}", self.user, self.host)));
        args.push(OsString::from(remote_command));
        args
    }

    fn spawn(&self, remote_command: &str, stdin: Stdio) -> Result<Child, SshError> {
        Command::new(&self.ssh_bin)
            .args(self.build_args(remote_command))
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| SshError::Spawn {
                program: self.ssh_bin.clone(),
                message: err.to_string(),
            })
    }

    fn exit_code(&self, status: ExitStatus, stderr: &str) -> Result<i32, SshError> {
        match status.code() {
            Some(SSH_CLIENT_FAILURE) => Err(SshError::Session {
                message: format!(
                    "{} to {}@{} failed: {}",
                    self.ssh_bin,
                    self.user,
                    self.host,
                    stderr.trim()
                ),
                exit_code: Some(SSH_CLIENT_FAILURE),
            }),
            Some(code) => Ok(code),
            None => Err(SshError::session(format!(
                "{} to {}@{} terminated without an exit status",
                self.ssh_bin, self.user, self.host
            ))),
        }
    }
}

impl SshConnection for ProcessSshConnection {
    fn run(&self, cmd: &str) -> Result<CommandOutput, SshError> {
        let output = self
            .spawn(cmd, Stdio::null())?
            .wait_with_output()
            .map_err(|err| io_error(&err))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = self.exit_code(output.status, &stderr)?;

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    fn stream(&self, cmd: &str, writer: &mut dyn Write) -> Result<StreamOutput, SshError> {
        let mut child = self.spawn(cmd, Stdio::null())?;
        let mut child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| SshError::session("ssh stdout was not captured"))?;
        let child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| SshError::session("ssh stderr was not captured"))?;

        let (copied, stderr_drained) = thread::scope(|scope| {
            let stderr_reader = scope.spawn(move || drain(child_stderr));
            let copied = io::copy(&mut child_stdout, writer).and_then(|_| writer.flush());
            // An early writer failure must not leave the client blocked on a full pipe.
            drop(child_stdout);
            (copied, stderr_reader.join())
        });
        let stderr = join_drained(stderr_drained)?;
        let status = child.wait().map_err(|err| io_error(&err))?;
        let exit_code = settle_copy(copied, self.exit_code(status, &stderr))?;

        Ok(StreamOutput { stderr, exit_code })
    }

    fn stream_stdin(&self, cmd: &str, reader: &mut dyn Read) -> Result<CommandOutput, SshError> {
        let mut child = self.spawn(cmd, Stdio::piped())?;
        let mut child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| SshError::session("ssh stdin was not captured"))?;
        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| SshError::session("ssh stdout was not captured"))?;
        let child_stderr = child
            .stderr
            .take()
            .ok_or_else(|| SshError::session("ssh stderr was not captured"))?;

        let (copied, stdout_drained, stderr_drained) = thread::scope(|scope| {
            let stdout_reader = scope.spawn(move || drain(child_stdout));
            let stderr_reader = scope.spawn(move || drain(child_stderr));
            let copied = io::copy(reader, &mut child_stdin);
            // Closing stdin signals end-of-stream to the remote tar.
            drop(child_stdin);
            (copied, stdout_reader.join(), stderr_reader.join())
        });
        let stdout = join_drained(stdout_drained)?;
        let stderr = join_drained(stderr_drained)?;
        let status = child.wait().map_err(|err| io_error(&err))?;
        let exit_code = settle_copy(copied, self.exit_code(status, &stderr))?;

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    fn username(&self) -> &str {
        &self.user
    }
}

fn drain(mut source: impl Read) -> io::Result<String> {
    let mut buffer = Vec::new();
    source.read_to_end(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn join_drained(joined: thread::Result<io::Result<String>>) -> Result<String, SshError> {
    joined
        .map_err(|_| SshError::session("output reader thread panicked"))?
        .map_err(|err| io_error(&err))
}

/// A broken pipe paired with a nonzero remote exit is the remote command
/// failing mid-transfer, so the exit status is reported instead.
fn settle_copy<T>(
    copied: io::Result<T>,
    exit_code: Result<i32, SshError>,
) -> Result<i32, SshError> {
    match (copied, exit_code) {
        (Err(err), Ok(code)) if err.kind() == io::ErrorKind::BrokenPipe && code != 0 => {
            Ok(code)
        }
        (Err(err), _) => Err(io_error(&err)),
        (Ok(_), exit) => exit,
    }
}

fn io_error(err: &io::Error) -> SshError {
    SshError::Io {
        message: err.to_string(),
    }
}

/// Expands a leading `~/` using `HOME`, leaving the path untouched otherwise.
fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => format!("{}/{rest}", home.to_string_lossy()),
        _ => path.to_owned(),
    }
}
