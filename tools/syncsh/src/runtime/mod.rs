use crate::errors::SyncshError;
use crate::types::{ChildStatus, ShellRequest};
use std::fs::File;
use std::io::Write;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};

pub trait ProcessRunner: Send + Sync {
    /// Runs the request with stdout and stderr redirected into the given files.
    fn run_captured(
        &self,
        request: &ShellRequest,
        stdout: &File,
        stderr: &File,
    ) -> Result<ChildStatus, SyncshError>;

    /// Runs the request attached to the real terminal.
    fn run_foreground(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError>;

    /// Hands the process over to the request. Only returns on failure where the
    /// platform can replace the process image.
    fn replace(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError>;
}

pub trait Terminal: Send + Sync {
    fn write_stdout(&self, bytes: &[u8]) -> Result<(), SyncshError>;
    fn write_stderr(&self, bytes: &[u8]) -> Result<(), SyncshError>;
    fn flush(&self) -> Result<(), SyncshError>;
}

fn command_for(request: &ShellRequest) -> Command {
    let mut cmd = Command::new(&request.program);
    cmd.args(&request.args);
    for (key, value) in &request.env {
        cmd.env(key, value);
    }
    cmd
}

#[cfg(unix)]
fn child_status(status: ExitStatus) -> ChildStatus {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => ChildStatus::Exited(code),
        (None, Some(signal)) => ChildStatus::Signaled(signal),
        (None, None) => ChildStatus::Exited(-1),
    }
}

#[cfg(not(unix))]
fn child_status(status: ExitStatus) -> ChildStatus {
    ChildStatus::Exited(status.code().unwrap_or(-1))
}

fn spawn_and_wait(mut cmd: Command, request: &ShellRequest) -> Result<ChildStatus, SyncshError> {
    let mut child = cmd.spawn().map_err(|source| SyncshError::Spawn {
        program: request.display_program(),
        source,
    })?;
    let status = child.wait().map_err(|source| SyncshError::Wait {
        program: request.display_program(),
        source,
    })?;
    Ok(child_status(status))
}

#[derive(Debug, Default)]
pub struct ProductionProcessRunner;

impl ProcessRunner for ProductionProcessRunner {
    fn run_captured(
        &self,
        request: &ShellRequest,
        stdout: &File,
        stderr: &File,
    ) -> Result<ChildStatus, SyncshError> {
        let stdout = stdout.try_clone().map_err(SyncshError::CaptureBuffer)?;
        let stderr = stderr.try_clone().map_err(SyncshError::CaptureBuffer)?;
        let mut cmd = command_for(request);
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));
        spawn_and_wait(cmd, request)
    }

    fn run_foreground(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError> {
        spawn_and_wait(command_for(request), request)
    }

    #[cfg(unix)]
    fn replace(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError> {
        use std::os::unix::process::CommandExt;
        let source = command_for(request).exec();
        Err(SyncshError::Exec {
            program: request.display_program(),
            source,
        })
    }

    #[cfg(not(unix))]
    fn replace(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError> {
        spawn_and_wait(command_for(request), request)
    }
}

#[derive(Debug, Default)]
pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_stdout(&self, bytes: &[u8]) -> Result<(), SyncshError> {
        std::io::stdout()
            .lock()
            .write_all(bytes)
            .map_err(|e| SyncshError::io("write stdout", e))
    }

    fn write_stderr(&self, bytes: &[u8]) -> Result<(), SyncshError> {
        std::io::stderr()
            .lock()
            .write_all(bytes)
            .map_err(|e| SyncshError::io("write stderr", e))
    }

    fn flush(&self) -> Result<(), SyncshError> {
        std::io::stdout()
            .lock()
            .flush()
            .map_err(|e| SyncshError::io("flush stdout", e))?;
        std::io::stderr()
            .lock()
            .flush()
            .map_err(|e| SyncshError::io("flush stderr", e))
    }
}

pub struct ProductionRuntime {
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            process_runner: Arc::new(ProductionProcessRunner),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// One write observed by a [`FakeTerminal`], in order across both streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalWrite {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Flush,
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<TerminalWrite>>>,
}

impl FakeTerminal {
    pub fn writes(&self) -> Vec<TerminalWrite> {
        locked(&self.writes).clone()
    }

    pub fn stdout_bytes(&self) -> Vec<u8> {
        self.collect(|write| match write {
            TerminalWrite::Stdout(bytes) => Some(bytes),
            _ => None,
        })
    }

    pub fn stderr_bytes(&self) -> Vec<u8> {
        self.collect(|write| match write {
            TerminalWrite::Stderr(bytes) => Some(bytes),
            _ => None,
        })
    }

    /// Both streams concatenated in write order.
    pub fn combined_bytes(&self) -> Vec<u8> {
        self.collect(|write| match write {
            TerminalWrite::Stdout(bytes) | TerminalWrite::Stderr(bytes) => Some(bytes),
            TerminalWrite::Flush => None,
        })
    }

    fn collect(&self, pick: impl Fn(&TerminalWrite) -> Option<&Vec<u8>>) -> Vec<u8> {
        locked(&self.writes)
            .iter()
            .filter_map(pick)
            .flat_map(|bytes| bytes.iter().copied())
            .collect()
    }
}

impl Terminal for FakeTerminal {
    fn write_stdout(&self, bytes: &[u8]) -> Result<(), SyncshError> {
        locked(&self.writes).push(TerminalWrite::Stdout(bytes.to_vec()));
        Ok(())
    }

    fn write_stderr(&self, bytes: &[u8]) -> Result<(), SyncshError> {
        locked(&self.writes).push(TerminalWrite::Stderr(bytes.to_vec()));
        Ok(())
    }

    fn flush(&self) -> Result<(), SyncshError> {
        locked(&self.writes).push(TerminalWrite::Flush);
        Ok(())
    }
}

/// Canned behaviour for one [`FakeProcessRunner`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeRun {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status: ChildStatus,
}

impl FakeRun {
    pub fn exited(code: i32, stdout: &str, stderr: &str) -> Self {
        Self {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            status: ChildStatus::Exited(code),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Captured,
    Foreground,
    Replace,
}

#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<Vec<FakeRun>>>,
    calls: Arc<Mutex<Vec<(RunKind, ShellRequest)>>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, run: FakeRun) {
        locked(&self.responses).push(run);
    }

    pub fn calls(&self) -> Vec<(RunKind, ShellRequest)> {
        locked(&self.calls).clone()
    }

    fn next(&self, kind: RunKind, request: &ShellRequest) -> Result<FakeRun, SyncshError> {
        locked(&self.calls).push((kind, request.clone()));
        let mut responses = locked(&self.responses);
        if responses.is_empty() {
            return Err(SyncshError::Spawn {
                program: request.display_program(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no fake response queued",
                ),
            });
        }
        Ok(responses.remove(0))
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run_captured(
        &self,
        request: &ShellRequest,
        stdout: &File,
        stderr: &File,
    ) -> Result<ChildStatus, SyncshError> {
        let run = self.next(RunKind::Captured, request)?;
        let mut stdout = stdout;
        let mut stderr = stderr;
        stdout
            .write_all(&run.stdout)
            .map_err(SyncshError::CaptureBuffer)?;
        stderr
            .write_all(&run.stderr)
            .map_err(SyncshError::CaptureBuffer)?;
        Ok(run.status)
    }

    fn run_foreground(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError> {
        Ok(self.next(RunKind::Foreground, request)?.status)
    }

    fn replace(&self, request: &ShellRequest) -> Result<ChildStatus, SyncshError> {
        Ok(self.next(RunKind::Replace, request)?.status)
    }
}
