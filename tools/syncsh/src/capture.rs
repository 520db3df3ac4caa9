use crate::errors::SyncshError;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

const CHUNK_BYTES: usize = 8192;

/// Anonymous, already-unlinked files holding a child's output until replay.
#[derive(Debug)]
pub struct CaptureBuffers {
    pub stdout: File,
    pub stderr: File,
}

impl CaptureBuffers {
    pub fn new() -> Result<Self, SyncshError> {
        Ok(Self {
            stdout: tempfile::tempfile().map_err(SyncshError::CaptureBuffer)?,
            stderr: tempfile::tempfile().map_err(SyncshError::CaptureBuffer)?,
        })
    }

    pub fn rewind(&mut self) -> Result<(), SyncshError> {
        self.stdout
            .seek(SeekFrom::Start(0))
            .map_err(SyncshError::CaptureBuffer)?;
        self.stderr
            .seek(SeekFrom::Start(0))
            .map_err(SyncshError::CaptureBuffer)?;
        Ok(())
    }
}

/// Streams `source` to `sink` chunk by chunk, also copying each chunk into `tee`.
pub fn replay_into(
    source: &mut File,
    mut sink: impl FnMut(&[u8]) -> Result<(), SyncshError>,
    mut tee: Option<&mut dyn Write>,
) -> Result<u64, SyncshError> {
    let mut buffer = [0u8; CHUNK_BYTES];
    let mut total = 0u64;
    loop {
        let read = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SyncshError::CaptureBuffer(e)),
        };
        let chunk = &buffer[..read];
        sink(chunk)?;
        if let Some(tee) = tee.as_deref_mut() {
            tee.write_all(chunk)
                .map_err(|e| SyncshError::io("write tee file", e))?;
        }
        total += read as u64;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::{replay_into, CaptureBuffers};
    use std::io::Write;

    #[test]
    fn rewound_buffers_replay_everything_in_chunks() {
        let mut capture = CaptureBuffers::new().expect("buffers");
        let payload = vec![b'x'; 20_000];
        capture.stdout.write_all(&payload).expect("fill");
        capture.rewind().expect("rewind");

        let mut seen = Vec::new();
        let mut tee = Vec::new();
        let total = replay_into(
            &mut capture.stdout,
            |chunk| {
                seen.extend_from_slice(chunk);
                Ok(())
            },
            Some(&mut tee),
        )
        .expect("replay");

        assert_eq!(total, 20_000);
        assert_eq!(seen, payload);
        assert_eq!(tee, payload);
    }

    #[test]
    fn empty_buffer_replays_nothing() {
        let mut capture = CaptureBuffers::new().expect("buffers");
        capture.rewind().expect("rewind");
        let total = replay_into(&mut capture.stderr, |_| Ok(()), None).expect("replay");
        assert_eq!(total, 0);
    }
}
