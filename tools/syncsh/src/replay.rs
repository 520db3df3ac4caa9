use crate::capture::{replay_into, CaptureBuffers};
use crate::errors::{Diagnostics, SyncshError};
use crate::lock::{acquire, LockGuard, LockMode, FLUSH_OFFSET};
use crate::logging::EventLog;
use crate::runtime::{ProcessRunner, Terminal};
use crate::types::{ChildStatus, Discipline, Invocation, SyncTarget, TargetSource};
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::time::Instant;

pub struct ReplayContext<'a> {
    pub diag: &'a Diagnostics,
    pub events: &'a EventLog,
    pub process_runner: &'a dyn ProcessRunner,
    pub terminal: &'a dyn Terminal,
}

impl ReplayContext<'_> {
    fn warn(&self, error: &SyncshError) {
        self.diag.report(self.terminal, error);
        self.events
            .warn("warning", json!({ "message": error.to_string() }));
    }
}

/// Files shared with other invocations: the tee and the lock anchor.
///
/// When the anchor *is* the tee, one descriptor serves both; closing a second
/// descriptor of the same file would drop our record locks.
#[derive(Debug, Default)]
struct SharedFiles {
    tee: Option<File>,
    anchor: Option<File>,
    anchor_is_tee: bool,
}

impl SharedFiles {
    /// Opens the tee and the lock anchor. Failing to open either is a warning,
    /// except that `anchor_required` turns a missing anchor into an error.
    fn open(
        invocation: &Invocation,
        target: &SyncTarget,
        anchor_required: bool,
        ctx: &ReplayContext<'_>,
    ) -> Result<Self, SyncshError> {
        let tee = invocation.tee.as_deref().and_then(|path| {
            open_tee(path)
                .map_err(|source| {
                    ctx.warn(&SyncshError::TeeUnavailable {
                        path: path.to_path_buf(),
                        source,
                    })
                })
                .ok()
        });

        if invocation.tee.as_deref() == Some(target.path.as_path()) {
            if anchor_required && tee.is_none() {
                return Err(SyncshError::MutexUnavailable {
                    path: target.path.clone(),
                    source: std::io::Error::other("tee file could not be opened"),
                });
            }
            return Ok(Self {
                tee,
                anchor: None,
                anchor_is_tee: true,
            });
        }

        let anchor = match open_anchor(&target.path, target.source == TargetSource::LockFile) {
            Ok(file) => Some(file),
            Err(source) if anchor_required => {
                return Err(SyncshError::MutexUnavailable {
                    path: target.path.clone(),
                    source,
                })
            }
            Err(source) => {
                ctx.warn(&SyncshError::LockUnavailable {
                    path: target.path.clone(),
                    source,
                });
                None
            }
        };
        Ok(Self {
            tee,
            anchor,
            anchor_is_tee: false,
        })
    }

    fn anchor(&self) -> Option<&File> {
        if self.anchor_is_tee {
            self.tee.as_ref()
        } else {
            self.anchor.as_ref()
        }
    }

    fn lock(
        &self,
        path: &Path,
        offset: u64,
        ctx: &ReplayContext<'_>,
    ) -> Result<Option<LockGuard<'_>>, SyncshError> {
        let Some(anchor) = self.anchor() else {
            return Ok(None);
        };
        let started = Instant::now();
        let guard = acquire(anchor, path, offset)?;
        ctx.events.info(
            "lock_acquired",
            json!({
                "path": path.display().to_string(),
                "offset": offset,
                "mode": guard.mode(),
                "waited_ms": started.elapsed().as_millis() as u64,
            }),
        );
        Ok(Some(guard))
    }
}

fn open_tee(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    options.open(path)
}

// Opened for writing only because record locks need a writable descriptor;
// nothing is ever written through it.
fn open_anchor(path: &Path, create: bool) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(create)
        .truncate(false)
        .open(path)
}

/// Runs the recipe under the target's discipline and replays its output as
/// one uninterrupted block.
pub fn execute(
    invocation: &Invocation,
    target: &SyncTarget,
    ctx: &ReplayContext<'_>,
) -> Result<ChildStatus, SyncshError> {
    match target.discipline {
        Discipline::OutputFlush => run_output_flush(invocation, target, ctx),
        Discipline::ExecutionMutex { offset } => {
            run_execution_mutex(invocation, target, offset, ctx)
        }
    }
}

fn run_output_flush(
    invocation: &Invocation,
    target: &SyncTarget,
    ctx: &ReplayContext<'_>,
) -> Result<ChildStatus, SyncshError> {
    let mut capture = CaptureBuffers::new()?;
    let status = run_child(invocation, &capture, ctx)?;
    capture.rewind()?;

    let shared = SharedFiles::open(invocation, target, false, ctx)?;
    let guard = shared.lock(&target.path, FLUSH_OFFSET, ctx)?;
    emit_block(invocation, &mut capture, shared.tee.as_ref(), ctx)?;
    drop(guard);
    Ok(status)
}

fn run_execution_mutex(
    invocation: &Invocation,
    target: &SyncTarget,
    offset: u64,
    ctx: &ReplayContext<'_>,
) -> Result<ChildStatus, SyncshError> {
    let shared = SharedFiles::open(invocation, target, true, ctx)?;
    let exec_guard = shared.lock(&target.path, offset, ctx)?;

    let mut capture = CaptureBuffers::new()?;
    let status = run_child(invocation, &capture, ctx)?;
    capture.rewind()?;

    // A whole-file fallback lock already excludes every flusher.
    let flush_guard = match exec_guard.as_ref().map(LockGuard::mode) {
        Some(LockMode::WholeFile) => None,
        _ => shared.lock(&target.path, FLUSH_OFFSET, ctx)?,
    };
    emit_block(invocation, &mut capture, shared.tee.as_ref(), ctx)?;
    drop(flush_guard);
    drop(exec_guard);
    Ok(status)
}

fn run_child(
    invocation: &Invocation,
    capture: &CaptureBuffers,
    ctx: &ReplayContext<'_>,
) -> Result<ChildStatus, SyncshError> {
    let request = invocation.shell_request();
    let status = ctx
        .process_runner
        .run_captured(&request, &capture.stdout, &capture.stderr)?;
    ctx.events.info(
        "child_exit",
        json!({ "recipe": invocation.recipe, "status": status }),
    );
    Ok(status)
}

/// Writes headline, recipe echo, stdout and stderr, in that order, to the
/// real streams and the tee. Callers hold the flush lock.
pub fn emit_block(
    invocation: &Invocation,
    capture: &mut CaptureBuffers,
    tee: Option<&File>,
    ctx: &ReplayContext<'_>,
) -> Result<(), SyncshError> {
    let mut tee = tee;
    if let Some(file) = tee.as_mut() {
        file.seek(SeekFrom::End(0))
            .map_err(|e| SyncshError::io("seek tee file", e))?;
    }
    let tee_line = |tee: &mut Option<&File>, text: &str| -> Result<(), SyncshError> {
        if let Some(file) = tee.as_mut() {
            file.write_all(text.as_bytes())
                .and_then(|()| file.write_all(b"\n"))
                .map_err(|e| SyncshError::io("write tee file", e))?;
        }
        Ok(())
    };

    if let Some(separator) = &invocation.tee_separator {
        tee_line(&mut tee, separator)?;
    }
    if let Some(headline) = &invocation.headline {
        ctx.terminal.write_stdout(format!("{headline}\n").as_bytes())?;
        tee_line(&mut tee, headline)?;
    }
    if let Some(prefix) = &invocation.verbose {
        let echo = format!("{prefix}{}", invocation.recipe);
        ctx.terminal.write_stdout(format!("{echo}\n").as_bytes())?;
        tee_line(&mut tee, &echo)?;
    }

    let stdout_bytes = replay_into(
        &mut capture.stdout,
        |chunk| ctx.terminal.write_stdout(chunk),
        tee.as_mut().map(|file| file as &mut dyn Write),
    )?;
    // Stdout is line-buffered; a trailing partial line must land before stderr.
    ctx.terminal.flush()?;
    let stderr_bytes = replay_into(
        &mut capture.stderr,
        |chunk| ctx.terminal.write_stderr(chunk),
        tee.as_mut().map(|file| file as &mut dyn Write),
    )?;

    if let Some(separator) = &invocation.tee_separator {
        tee_line(&mut tee, separator)?;
    }
    ctx.terminal.flush()?;

    ctx.events.info(
        "block_emitted",
        json!({
            "stdout_bytes": stdout_bytes,
            "stderr_bytes": stderr_bytes,
            "tee": tee.is_some(),
        }),
    );
    Ok(())
}
