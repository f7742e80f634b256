//! Byte sources feeding the raw essence reader.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// An abstract raw essence byte stream.
///
/// A source is a forward reader that can additionally rewind to the start of
/// the essence; it has no general random access.
pub trait EssenceSource {
    /// Read up to `buf.len()` bytes. A return of 0 means end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Rewind to the start of the essence.
    fn seek_start(&mut self) -> io::Result<()>;
}

/// Raw essence stored in a file, optionally starting at a byte offset.
pub struct FileEssenceSource {
    file: File,
    start_offset: u64,
}

impl FileEssenceSource {
    /// Open the file at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
            start_offset: 0,
        })
    }

    /// Open the file at `path`, treating `start_offset` as the essence start.
    pub fn open_at(path: impl AsRef<Path>, start_offset: u64) -> io::Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(start_offset))?;
        Ok(Self { file, start_offset })
    }
}

impl EssenceSource for FileEssenceSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn seek_start(&mut self) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.start_offset))?;
        Ok(())
    }
}

/// Raw essence held in memory.
pub struct MemoryEssenceSource {
    data: Vec<u8>,
    position: usize,
}

impl MemoryEssenceSource {
    /// Wrap a byte buffer.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }
}

impl EssenceSource for MemoryEssenceSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.data.len() - self.position;
        let count = remaining.min(buf.len());
        buf[..count].copy_from_slice(&self.data[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn seek_start(&mut self) -> io::Result<()> {
        self.position = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_source_read() {
        let mut source = MemoryEssenceSource::new(vec![1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);
        assert_eq!(source.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[4, 5]);
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_memory_source_seek_start() {
        let mut source = MemoryEssenceSource::new(vec![1, 2, 3]);
        let mut buf = [0u8; 3];
        source.read(&mut buf).unwrap();
        source.seek_start().unwrap();
        assert_eq!(source.read(&mut buf).unwrap(), 3);
    }
}
