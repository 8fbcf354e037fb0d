//! Byte-range sources.
//!
//! A [ByteRangeSource] serves arbitrary `(offset, length)` reads from one data file. Render
//! workers call it concurrently, so each implementation serialises its own seek+read pairs.

use crate::error::SdsError;

use bytes::Bytes;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Random access to the bytes of one data file.
pub trait ByteRangeSource: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns [SdsError::ShortRead] if the source ends first.
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SdsError>;

    /// Stable identity of the underlying file, used to key memoised value ranges.
    fn identity(&self) -> &str;
}

/// A local file behind a mutex guarding each seek+read pair.
#[derive(Debug)]
pub struct LocalFileSource {
    file: Mutex<File>,
    path: PathBuf,
    identity: String,
}

impl LocalFileSource {
    /// Wrap an open file.
    pub fn new(file: File, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        LocalFileSource {
            file: Mutex::new(file),
            identity: path.to_string_lossy().to_string(),
            path,
        }
    }

    /// Open the file at `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SdsError> {
        let file = File::open(path.as_ref())?;
        Ok(Self::new(file, path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteRangeSource for LocalFileSource {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SdsError> {
        let mut buf = vec![0; len];
        let mut filled = 0;
        {
            let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
            file.seek(SeekFrom::Start(offset))?;
            while filled < len {
                match file.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(err) => return Err(err.into()),
                }
            }
        }
        if filled < len {
            return Err(SdsError::ShortRead {
                offset,
                expected: len,
                actual: filled,
            });
        }
        Ok(buf.into())
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}

/// An object held entirely in memory, such as a remote object fetched without a cache.
#[derive(Debug)]
pub struct BytesSource {
    data: Bytes,
    identity: String,
}

impl BytesSource {
    pub fn new(data: Bytes, identity: impl Into<String>) -> Self {
        BytesSource {
            data,
            identity: identity.into(),
        }
    }
}

impl ByteRangeSource for BytesSource {
    fn read_at(&self, offset: u64, len: usize) -> Result<Bytes, SdsError> {
        let start = usize::try_from(offset)?.min(self.data.len());
        let end = start.saturating_add(len).min(self.data.len());
        if end - start < len {
            return Err(SdsError::ShortRead {
                offset,
                expected: len,
                actual: end - start,
            });
        }
        Ok(self.data.slice(start..end))
    }

    fn identity(&self) -> &str {
        &self.identity
    }
}
