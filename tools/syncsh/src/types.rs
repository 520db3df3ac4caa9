use regex::Regex;
use serde::Serialize;
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ChildStatus {
    Exited(i32),
    Signaled(i32),
}

impl ChildStatus {
    /// Exit code to surface as our own; signals follow the shell's 128+N convention.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal,
        }
    }

    pub fn success(self) -> bool {
        self == Self::Exited(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellRequest {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(OsString, OsString)>,
}

impl ShellRequest {
    pub fn new(program: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        Self {
            program: program.into(),
            args,
            env: Vec::new(),
        }
    }

    pub fn display_program(&self) -> String {
        self.program.display().to_string()
    }

    /// Program and arguments joined by spaces, for audit lines.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct Selector {
    pub pattern: String,
    pub regex: Regex,
}

impl Selector {
    pub fn matches(&self, recipe: &str) -> bool {
        self.regex.is_match(recipe)
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub shell: PathBuf,
    pub shell_args: Vec<OsString>,
    pub recipe: String,
    pub verbose: Option<String>,
    pub headline: Option<String>,
    pub tee: Option<PathBuf>,
    pub tee_separator: Option<String>,
    pub lock_file: Option<PathBuf>,
    pub selector: Option<Selector>,
    pub makefile_list: Option<String>,
    pub interactive: bool,
}

impl Invocation {
    pub fn shell_request(&self) -> ShellRequest {
        ShellRequest::new(self.shell.clone(), self.shell_args.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSource {
    LockFile,
    Tee,
    Makefile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "discipline", rename_all = "snake_case")]
pub enum Discipline {
    OutputFlush,
    ExecutionMutex { offset: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub path: PathBuf,
    pub source: TargetSource,
    pub discipline: Discipline,
}
