//! Upload body that streams a file region while reporting progress.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

use crate::TransferError;
use crate::progress::TransferTracker;
use crate::types::FileRegion;

/// Result of a buffered pull.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    /// More bytes remain in the region.
    Continue,
    /// The region is exhausted.
    Stop,
}

/// How the transport consumes a [`ProgressBodySource`]. Chosen once per
/// request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyStrategy {
    /// Repeated [`read`](ProgressBodySource::read) calls into a buffer of
    /// `chunk_size` bytes.
    Buffered { chunk_size: usize },
    /// One [`transfer_to`](ProgressBodySource::transfer_to) call into the
    /// transport's sink.
    ZeroCopy,
}

impl BodyStrategy {
    /// Buffered pull is required under TLS or when zero-copy is disabled.
    pub fn select(secure: bool, disable_zero_copy: bool, chunk_size: usize) -> Self {
        if secure || disable_zero_copy {
            BodyStrategy::Buffered { chunk_size }
        } else {
            BodyStrategy::ZeroCopy
        }
    }
}

/// A `[offset, offset + length)` region of a local file as a pull-based
/// request body.
///
/// Every byte handed to the transport is reported through the tracker
/// exactly once, so PROGRESSED events sum to the region length whichever
/// pull mode is used.
pub struct ProgressBodySource {
    file: File,
    region: FileRegion,
    remaining: u64,
    tracker: Arc<TransferTracker>,
}

impl ProgressBodySource {
    /// Opens `path` positioned at the start of `region` (whole file when
    /// `None`).
    pub fn open(
        path: &Path,
        region: Option<FileRegion>,
        tracker: Arc<TransferTracker>,
    ) -> Result<Self, TransferError> {
        let mut file = File::open(path)?;
        let region = match region {
            Some(r) => r,
            None => FileRegion::whole(file.metadata()?.len()),
        };
        if region.offset > 0 {
            file.seek(SeekFrom::Start(region.offset))?;
        }
        Ok(Self {
            file,
            region,
            remaining: region.length,
            tracker,
        })
    }

    pub fn content_length(&self) -> u64 {
        self.region.length
    }

    pub fn region(&self) -> FileRegion {
        self.region
    }

    /// Bytes of the region not yet handed out.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn tracker(&self) -> &Arc<TransferTracker> {
        &self.tracker
    }

    /// Buffered pull: fills at most `buf.len()` bytes.
    ///
    /// Fires PROGRESSED for exactly the bytes read before returning.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(usize, BodyState), TransferError> {
        if self.remaining == 0 {
            return Ok((0, BodyState::Stop));
        }
        if buf.is_empty() {
            return Ok((0, BodyState::Continue));
        }

        let want = buf.len().min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        let n = self.file.read(&mut buf[..want])?;
        if n == 0 {
            return Err(TransferError::UnexpectedEof {
                remaining: self.remaining,
            });
        }
        self.remaining -= n as u64;
        self.tracker
            .progressed(&buf[..n])
            .map_err(|_| TransferError::Cancelled)?;

        let state = if self.remaining == 0 {
            BodyState::Stop
        } else {
            BodyState::Continue
        };
        Ok((n, state))
    }

    /// Zero-copy transfer: pushes the rest of the region straight into
    /// `target`. Each write of `w` bytes fires PROGRESSED carrying `w`.
    ///
    /// Returns the number of bytes transferred by this call.
    pub fn transfer_to<W: Write + ?Sized>(&mut self, target: &mut W) -> Result<u64, TransferError> {
        let mut sink = ProgressingWriter {
            inner: target,
            tracker: &self.tracker,
            written: 0,
            cancelled: false,
        };
        let mut region = (&mut self.file).take(self.remaining);
        let result = io::copy(&mut region, &mut sink);

        let written = sink.written;
        let cancelled = sink.cancelled;
        self.remaining -= written;

        match result {
            Ok(_) if self.remaining > 0 => Err(TransferError::UnexpectedEof {
                remaining: self.remaining,
            }),
            Ok(_) => Ok(written),
            Err(_) if cancelled => Err(TransferError::Cancelled),
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for ProgressBodySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressBodySource")
            .field("region", &self.region)
            .field("remaining", &self.remaining)
            .finish()
    }
}

/// Forwards writes to the transport sink and reports each one.
struct ProgressingWriter<'a, W: ?Sized> {
    inner: &'a mut W,
    tracker: &'a TransferTracker,
    written: u64,
    cancelled: bool,
}

impl<W: Write + ?Sized> Write for ProgressingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let w = self.inner.write(buf)?;
        if w > 0 {
            self.written += w as u64;
            if self.tracker.progressed(&buf[..w]).is_err() {
                self.cancelled = true;
                return Err(io::Error::other(TransferError::Cancelled));
            }
        }
        Ok(w)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
