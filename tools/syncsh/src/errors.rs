use crate::runtime::Terminal;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Exit status for failures of the wrapper itself, as opposed to the wrapped command.
pub const EXIT_INTERNAL: i32 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "Warning",
            Self::Fatal => "Error",
        }
    }
}

#[derive(Debug, Error)]
pub enum SyncshError {
    #[error("cannot create capture buffer: {0}")]
    CaptureBuffer(#[source] io::Error),
    #[error("cannot spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot execute {program}: {source}")]
    Exec {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("no lock file: set SYNCSH_LOCKFILE or SYNCSH_TEE, or run from make")]
    NoLockTarget,
    #[error("{what} must be an absolute path: {}", .path.display())]
    RelativePath { what: &'static str, path: PathBuf },
    #[error("cannot resolve makefile {}: {source}", .path.display())]
    Makefile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open lock file {}: {source}", .path.display())]
    LockUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open tee file {}: {source}", .path.display())]
    TeeUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot open lock file {} to serialize recipe: {source}", .path.display())]
    MutexUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot lock {} at offset {offset}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },
    #[error("invalid SYNCSH_SERIALIZE pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SyncshError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::LockUnavailable { .. } | Self::TeeUnavailable { .. } => Severity::Warning,
            _ => Severity::Fatal,
        }
    }
}

/// Context threaded through the call chain so messages can name the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    prog: String,
}

impl Diagnostics {
    pub fn new(prog: impl Into<String>) -> Self {
        Self { prog: prog.into() }
    }

    pub fn from_argv0(argv0: Option<&OsStr>) -> Self {
        let prog = argv0
            .and_then(|arg| Path::new(arg).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "syncsh".to_string());
        Self { prog }
    }

    pub fn prog(&self) -> &str {
        &self.prog
    }

    pub fn render(&self, error: &SyncshError) -> String {
        format!("{}: {}: {error}\n", self.prog, error.severity().as_str())
    }

    /// Writes the message to stderr; returns the exit code when the error is fatal.
    pub fn report(&self, terminal: &dyn Terminal, error: &SyncshError) -> Option<i32> {
        let _ = terminal.write_stderr(self.render(error).as_bytes());
        match error.severity() {
            Severity::Warning => None,
            Severity::Fatal => Some(EXIT_INTERNAL),
        }
    }
}
