//! Blocking, exclusive, cross-process locks anchored to a shared file.
//!
//! The preferred primitive is a one-byte POSIX record lock (`fcntl(F_SETLKW)`)
//! at a chosen offset, so unrelated offsets of the same file serialize
//! independently. Where record locks are unavailable the whole file is locked
//! with `flock`-style locking instead; every offset then shares one lock.
//!
//! Both kinds are owned by the process and released by the kernel if it dies.
//! Record locks are also dropped when *any* descriptor of the file is closed
//! by this process, so callers must keep a single handle per path open for as
//! long as a guard lives.

use crate::errors::SyncshError;
use fs2::FileExt;
use serde::Serialize;
use std::fs::File;
use std::io;
use std::path::Path;

/// Offset of the mutex guarding output emission.
pub const FLUSH_OFFSET: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    ByteRange,
    WholeFile,
}

#[derive(Debug)]
pub struct LockGuard<'a> {
    file: &'a File,
    offset: u64,
    mode: LockMode,
}

impl LockGuard<'_> {
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = match self.mode {
            LockMode::ByteRange => unlock_range(self.file, self.offset),
            LockMode::WholeFile => FileExt::unlock(self.file),
        };
    }
}

/// Blocks until this process holds the exclusive lock at `offset` of `file`.
pub fn acquire<'a>(
    file: &'a File,
    path: &Path,
    offset: u64,
) -> Result<LockGuard<'a>, SyncshError> {
    let lock_error = |source: io::Error| SyncshError::Lock {
        path: path.to_path_buf(),
        offset,
        source,
    };

    match lock_range(file, offset) {
        Ok(()) => {
            return Ok(LockGuard {
                file,
                offset,
                mode: LockMode::ByteRange,
            })
        }
        Err(e) if !range_locks_unsupported(&e) => return Err(lock_error(e)),
        Err(_) => {}
    }

    loop {
        match FileExt::lock_exclusive(file) {
            Ok(()) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(lock_error(e)),
        }
    }
    Ok(LockGuard {
        file,
        offset,
        mode: LockMode::WholeFile,
    })
}

#[cfg(unix)]
fn range_locks_unsupported(error: &io::Error) -> bool {
    matches!(
        error.raw_os_error(),
        Some(libc::ENOLCK) | Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS)
    )
}

#[cfg(not(unix))]
fn range_locks_unsupported(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::Unsupported
}

#[cfg(unix)]
fn set_record_lock(
    file: &File,
    offset: u64,
    kind: libc::c_int,
    cmd: libc::c_int,
) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let start = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "lock offset out of range"))?;
    // SAFETY: `flock` is a plain C struct; all-zero is a valid value for every field.
    let mut record: libc::flock = unsafe { std::mem::zeroed() };
    record.l_type = kind as libc::c_short;
    record.l_whence = libc::SEEK_SET as libc::c_short;
    record.l_start = start;
    record.l_len = 1;

    loop {
        // SAFETY: the descriptor is borrowed from a live `File` and `record` outlives the call.
        let ret = unsafe { libc::fcntl(file.as_raw_fd(), cmd, &record as *const libc::flock) };
        if ret != -1 {
            return Ok(());
        }
        let error = io::Error::last_os_error();
        if error.kind() != io::ErrorKind::Interrupted {
            return Err(error);
        }
    }
}

#[cfg(unix)]
fn lock_range(file: &File, offset: u64) -> io::Result<()> {
    set_record_lock(file, offset, libc::F_WRLCK as libc::c_int, libc::F_SETLKW)
}

#[cfg(unix)]
fn unlock_range(file: &File, offset: u64) -> io::Result<()> {
    set_record_lock(file, offset, libc::F_UNLCK as libc::c_int, libc::F_SETLK)
}

#[cfg(not(unix))]
fn lock_range(_file: &File, _offset: u64) -> io::Result<()> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

#[cfg(not(unix))]
fn unlock_range(_file: &File, _offset: u64) -> io::Result<()> {
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::{acquire, LockMode, FLUSH_OFFSET};
    use std::fs::OpenOptions;

    fn open(path: &std::path::Path) -> std::fs::File {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .expect("open lock file")
    }

    #[test]
    fn guard_reports_byte_range_mode_on_local_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("anchor");
        let file = open(&path);

        let guard = acquire(&file, &path, 42).expect("lock");
        assert_eq!(guard.mode(), LockMode::ByteRange);
        assert_eq!(guard.offset(), 42);
    }

    #[test]
    fn distinct_offsets_can_be_held_together() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("anchor");
        let file = open(&path);

        let exec = acquire(&file, &path, 7).expect("execution lock");
        let flush = acquire(&file, &path, FLUSH_OFFSET).expect("flush lock");
        drop(flush);
        drop(exec);
    }
}
