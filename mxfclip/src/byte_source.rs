//! Byte sources backing the KLV layer.
//!
//! A source is byte-addressable but possibly non-seekable: a pipe or
//! streamed input can only move forward. Seekability gates partition
//! scanning and index-file use at open time.

use crate::error::{MxfError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Abstract byte-addressable file.
pub trait ByteSource {
    /// Read up to `buf.len()` bytes. A return of 0 means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Current byte position.
    fn tell(&mut self) -> Result<u64>;

    /// Seek to an absolute byte position. Errors on non-seekable sources.
    fn seek(&mut self, position: u64) -> Result<()>;

    /// Whether this source supports seeking.
    fn is_seekable(&self) -> bool;

    /// Total size in bytes, if known.
    fn size(&mut self) -> Result<Option<u64>>;
}

impl dyn ByteSource + '_ {
    /// Read exactly `buf.len()` bytes or fail.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut num_read = 0;
        while num_read < buf.len() {
            let n = self.read(&mut buf[num_read..])?;
            if n == 0 {
                return Err(MxfError::InvalidFile(format!(
                    "Unexpected end of file, {} of {} bytes read",
                    num_read,
                    buf.len()
                )));
            }
            num_read += n;
        }
        Ok(())
    }

    /// Skip forward `count` bytes, seeking when possible.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        if self.is_seekable() {
            let position = self.tell()?;
            self.seek(position + count)
        } else {
            let mut remaining = count;
            let mut scratch = [0u8; 4096];
            while remaining > 0 {
                let chunk = remaining.min(scratch.len() as u64) as usize;
                self.read_exact(&mut scratch[..chunk])?;
                remaining -= chunk as u64;
            }
            Ok(())
        }
    }
}

/// A regular file on disk.
pub struct FileByteSource {
    file: File,
    position: u64,
}

impl FileByteSource {
    /// Open the file at `path` for reading.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| MxfError::OpenFail(format!("{}: {}", path.as_ref().display(), e)))?;
        Ok(Self { file, position: 0 })
    }
}

impl ByteSource for FileByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.position)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.position = position;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn size(&mut self) -> Result<Option<u64>> {
        Ok(Some(self.file.metadata()?.len()))
    }
}

/// An in-memory byte buffer.
pub struct MemoryByteSource {
    data: Vec<u8>,
    position: u64,
    seekable: bool,
}

impl MemoryByteSource {
    /// Wrap a byte buffer as a seekable source.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            seekable: true,
        }
    }

    /// Wrap a byte buffer as a forward-only source, for exercising the
    /// non-seekable open paths.
    pub fn new_non_seekable(data: Vec<u8>) -> Self {
        Self {
            data,
            position: 0,
            seekable: false,
        }
    }
}

impl ByteSource for MemoryByteSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = self.data.len() as u64 - self.position.min(self.data.len() as u64);
        let count = (remaining as usize).min(buf.len());
        let start = self.position as usize;
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        self.position += count as u64;
        Ok(count)
    }

    fn tell(&mut self) -> Result<u64> {
        Ok(self.position)
    }

    fn seek(&mut self, position: u64) -> Result<()> {
        if !self.seekable {
            return Err(MxfError::other("Seek on non-seekable source"));
        }
        self.position = position;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn size(&mut self) -> Result<Option<u64>> {
        if self.seekable {
            Ok(Some(self.data.len() as u64))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_read_seek() {
        let mut source = MemoryByteSource::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        let src: &mut dyn ByteSource = &mut source;
        src.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        src.seek(4).unwrap();
        assert_eq!(src.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn test_non_seekable_source() {
        let mut source = MemoryByteSource::new_non_seekable(vec![0u8; 16]);
        assert!(!source.is_seekable());
        assert!(source.seek(0).is_err());
        assert_eq!(source.size().unwrap(), None);

        let src: &mut dyn ByteSource = &mut source;
        src.skip(10).unwrap();
        assert_eq!(src.tell().unwrap(), 10);
    }

    #[test]
    fn test_read_exact_past_end() {
        let mut source = MemoryByteSource::new(vec![1, 2]);
        let mut buf = [0u8; 4];
        let src: &mut dyn ByteSource = &mut source;
        assert!(src.read_exact(&mut buf).is_err());
    }
}
