//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::{DEFAULT_SSH_USER, InstanceConfig};
use crate::logger::Logger;
use crate::ssh::{CommandOutput, SshConnection, SshError, StreamOutput};

/// Which [`SshConnection`] method received a command.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InvocationKind {
    /// [`SshConnection::run`].
    Run,
    /// [`SshConnection::stream`].
    Stream,
    /// [`SshConnection::stream_stdin`].
    StreamStdin,
}

/// Records a single command sent through [`ScriptedConnection`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Invocation {
    /// Method that received the command.
    pub kind: InvocationKind,
    /// Remote command line.
    pub command: String,
}

#[derive(Clone, Debug)]
enum Response {
    Output(CommandOutput),
    Transport(SshError),
}

#[derive(Debug, Default)]
struct State {
    rules: Vec<(String, Response)>,
    queue: VecDeque<Response>,
    invocations: Vec<Invocation>,
    stream_payload: Vec<u8>,
    received_stdin: Vec<Vec<u8>>,
}

/// Scripted SSH connection.
///
/// A command is answered by the first rule whose fragment it contains, then
/// by the FIFO queue, and otherwise by an empty successful output. Clones
/// share state, so a test keeps one handle while the code under test owns
/// another.
#[derive(Clone, Debug)]
pub struct ScriptedConnection {
    state: Arc<Mutex<State>>,
    username: String,
}

impl Default for ScriptedConnection {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            username: String::from(DEFAULT_SSH_USER),
        }
    }
}

impl ScriptedConnection {
    /// Creates a connection with no scripted responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful empty output.
    pub fn push_success(&self) {
        self.push_output(0, "", "");
    }

    /// Queues an output.
    pub fn push_output(&self, exit_code: i32, stdout: &str, stderr: &str) {
        self.lock()
            .queue
            .push_back(Response::Output(CommandOutput::new(exit_code, stdout, stderr)));
    }

    /// Queues a transport failure.
    pub fn push_transport_error(&self, error: SshError) {
        self.lock().queue.push_back(Response::Transport(error));
    }

    /// Answers every command containing `fragment` with an output.
    pub fn respond_when(&self, fragment: &str, exit_code: i32, stdout: &str, stderr: &str) {
        self.lock().rules.push((
            fragment.to_owned(),
            Response::Output(CommandOutput::new(exit_code, stdout, stderr)),
        ));
    }

    /// Answers every command containing `fragment` with a transport failure.
    pub fn fail_when(&self, fragment: &str, error: SshError) {
        self.lock()
            .rules
            .push((fragment.to_owned(), Response::Transport(error)));
    }

    /// Bytes written to the caller's writer by successful `stream` calls.
    pub fn set_stream_payload(&self, payload: &[u8]) {
        payload.clone_into(&mut self.lock().stream_payload);
    }

    /// Snapshot of every command received so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.lock().invocations.clone()
    }

    /// Command lines received so far, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.lock()
            .invocations
            .iter()
            .map(|invocation| invocation.command.clone())
            .collect()
    }

    /// Number of commands received through `run`.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.lock()
            .invocations
            .iter()
            .filter(|invocation| invocation.kind == InvocationKind::Run)
            .count()
    }

    /// Bytes read from the caller for each `stream_stdin` call.
    #[must_use]
    pub fn received_stdin(&self) -> Vec<Vec<u8>> {
        self.lock().received_stdin.clone()
    }

    fn respond(&self, kind: InvocationKind, command: &str) -> Result<CommandOutput, SshError> {
        let mut state = self.lock();
        state.invocations.push(Invocation {
            kind,
            command: command.to_owned(),
        });
        let matched = state
            .rules
            .iter()
            .find(|(fragment, _)| command.contains(fragment.as_str()))
            .map(|(_, response)| response.clone());
        let response = matched.unwrap_or_else(|| {
            state
                .queue
                .pop_front()
                .unwrap_or_else(|| Response::Output(CommandOutput::default()))
        });

        match response {
            Response::Output(output) => Ok(output),
            Response::Transport(error) => Err(error),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SshConnection for ScriptedConnection {
    fn run(&self, cmd: &str) -> Result<CommandOutput, SshError> {
        self.respond(InvocationKind::Run, cmd)
    }

    fn stream(&self, cmd: &str, writer: &mut dyn Write) -> Result<StreamOutput, SshError> {
        let output = self.respond(InvocationKind::Stream, cmd)?;
        let payload = self.lock().stream_payload.clone();
        writer.write_all(&payload).map_err(|err| SshError::Io {
            message: err.to_string(),
        })?;
        Ok(StreamOutput {
            stderr: output.stderr,
            exit_code: output.exit_code,
        })
    }

    fn stream_stdin(&self, cmd: &str, reader: &mut dyn Read) -> Result<CommandOutput, SshError> {
        let mut received = Vec::new();
        reader
            .read_to_end(&mut received)
            .map_err(|err| SshError::Io {
                message: err.to_string(),
            })?;
        self.lock().received_stdin.push(received);
        self.respond(InvocationKind::StreamStdin, cmd)
    }

    fn username(&self) -> &str {
        &self.username
    }
}

/// Severity of a [`LogRecord`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Progress.
    Info,
    /// Failure summary.
    Error,
}

/// One message captured by [`RecordingLogger`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    /// Severity.
    pub level: LogLevel,
    /// Tag passed by the caller.
    pub tag: String,
    /// Message text.
    pub message: String,
}

/// [`Logger`] that keeps every message for assertions.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordingLogger {
    /// Creates an empty logger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record so far.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.lock().clone()
    }

    /// Debug and info messages, one `LEVEL - message` line each.
    #[must_use]
    pub fn stdout_contents(&self) -> String {
        self.render(|level| level != LogLevel::Error)
    }

    /// Error messages, one `ERROR - message` line each.
    #[must_use]
    pub fn stderr_contents(&self) -> String {
        self.render(|level| level == LogLevel::Error)
    }

    fn render(&self, include: impl Fn(LogLevel) -> bool) -> String {
        self.lock()
            .iter()
            .filter(|record| include(record.level))
            .map(|record| {
                let label = match record.level {
                    LogLevel::Debug => "DEBUG",
                    LogLevel::Info => "INFO",
                    LogLevel::Error => "ERROR",
                };
                format!("{label} - {}\n", record.message)
            })
            .collect()
    }

    fn record(&self, level: LogLevel, tag: &str, message: &str) {
        self.lock().push(LogRecord {
            level,
            tag: tag.to_owned(),
            message: message.to_owned(),
        });
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Logger for RecordingLogger {
    fn debug(&self, tag: &str, message: &str) {
        self.record(LogLevel::Debug, tag, message);
    }

    fn info(&self, tag: &str, message: &str) {
        self.record(LogLevel::Info, tag, message);
    }

    fn error(&self, tag: &str, message: &str) {
        self.record(LogLevel::Error, tag, message);
    }
}

/// Configuration matching the shipped defaults.
#[must_use]
pub fn instance_config() -> InstanceConfig {
    InstanceConfig {
        ssh_bin: String::from("ssh"),
        ssh_user: String::from(DEFAULT_SSH_USER),
        ssh_port: 22,
        ssh_identity_file: None,
        ssh_batch_mode: true,
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        log_level: String::from("info"),
    }
}
