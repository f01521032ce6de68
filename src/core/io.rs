//! Backing-medium access for compound files

use crate::error::{CompoundError, Result};
use crate::header::{Header, HEADER_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A seekable, resizable byte store a compound file can live in
pub trait SourceStream: Read + Write + Seek + Send {
    /// Truncate or extend the medium
    fn set_len(&mut self, len: u64) -> std::io::Result<()>;

    fn medium_len(&mut self) -> std::io::Result<u64> {
        let current = self.stream_position()?;
        let end = self.seek(SeekFrom::End(0))?;
        self.seek(SeekFrom::Start(current))?;
        Ok(end)
    }
}

impl SourceStream for File {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        File::set_len(self, len)
    }
}

impl SourceStream for Cursor<Vec<u8>> {
    fn set_len(&mut self, len: u64) -> std::io::Result<()> {
        let len = usize::try_from(len)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        self.get_mut().resize(len, 0);
        Ok(())
    }

    fn medium_len(&mut self) -> std::io::Result<u64> {
        Ok(self.get_ref().len() as u64)
    }
}

/// The medium a loaded compound file reads sectors from (and commits to)
pub struct CompoundSource {
    inner: Box<dyn SourceStream>,
    path: Option<PathBuf>,
}

impl CompoundSource {
    pub fn new(inner: Box<dyn SourceStream>) -> Self {
        CompoundSource { inner, path: None }
    }

    /// Open a file on disk, writable only when `writable` is set
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&path)?;

        Ok(CompoundSource {
            inner: Box::new(file),
            path: Some(path.as_ref().to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn len(&mut self) -> Result<u64> {
        Ok(self.inner.medium_len()?)
    }

    /// Read and validate the header at offset 0
    pub fn read_header(&mut self) -> Result<Header> {
        self.inner.seek(SeekFrom::Start(0))?;
        let mut buffer = vec![0u8; HEADER_SIZE];
        self.inner.read_exact(&mut buffer)?;
        Header::from_bytes(&buffer)
    }

    /// Read sector `id` (file offset `(id + 1) * sector_size`).
    /// A sector cut short by the end of the medium is zero padded.
    pub fn read_sector(&mut self, id: u32, sector_size: usize) -> Result<Vec<u8>> {
        let offset = (id as u64 + 1) * sector_size as u64;
        self.inner.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; sector_size];
        let mut filled = 0;
        while filled < sector_size {
            match self.inner.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(CompoundError::Io(e)),
            }
        }

        Ok(buffer)
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(data)?;
        Ok(())
    }

    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.inner.set_len(len)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> Box<dyn SourceStream> {
        self.inner
    }
}

impl std::fmt::Debug for CompoundSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompoundSource")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
