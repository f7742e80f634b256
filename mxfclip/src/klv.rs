//! KLV (Key-Length-Value) access over a byte source.
//!
//! Every object in an MXF file is framed as a 16-byte Universal Label key,
//! a BER-encoded length and a value. Header metadata values are local sets:
//! sequences of 2-byte tag, 2-byte length items, with dynamic tags mapped
//! to item ULs by the primer pack.

use crate::byte_source::ByteSource;
use crate::error::{MxfError, Result};
use crate::ul::{Ul, UL};
use byteorder::{BigEndian, ByteOrder};

/// A decoded key-length header.
#[derive(Debug, Clone, Copy)]
pub struct Kl {
    /// The key.
    pub key: Ul,
    /// Size of the BER length encoding in bytes.
    pub llen: u8,
    /// Value length in bytes.
    pub len: u64,
    /// Byte offset of the key within the source.
    pub offset: u64,
}

impl Kl {
    /// Offset of the first value byte.
    pub fn value_offset(&self) -> u64 {
        self.offset + 16 + self.llen as u64
    }
}

/// KLV-structured access to an MXF byte source.
pub struct KlvFile {
    source: Box<dyn ByteSource>,
}

impl KlvFile {
    /// Wrap a byte source.
    pub fn new(source: Box<dyn ByteSource>) -> Self {
        Self { source }
    }

    /// Direct access to the underlying source.
    pub fn source_mut(&mut self) -> &mut dyn ByteSource {
        self.source.as_mut()
    }

    /// Whether the underlying source supports seeking.
    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    /// Current byte position.
    pub fn tell(&mut self) -> Result<u64> {
        self.source.tell()
    }

    /// Seek to an absolute byte position.
    pub fn seek(&mut self, position: u64) -> Result<()> {
        self.source.seek(position)
    }

    /// Total size in bytes, if known.
    pub fn size(&mut self) -> Result<Option<u64>> {
        self.source.size()
    }

    /// Skip forward over `count` bytes.
    pub fn skip(&mut self, count: u64) -> Result<()> {
        self.source.skip(count)
    }

    /// Read the next key-length header. Returns `None` at a clean end of
    /// file (no key bytes at all).
    pub fn read_kl(&mut self) -> Result<Option<Kl>> {
        let offset = self.source.tell()?;

        let mut key = [0u8; 16];
        let first = self.source.read(&mut key)?;
        if first == 0 {
            return Ok(None);
        }
        if first < 16 {
            self.source.read_exact(&mut key[first..])?;
        }

        let (len, llen) = self.read_ber_length(offset + 16)?;
        Ok(Some(Kl {
            key: Ul::new(key),
            llen,
            len,
            offset,
        }))
    }

    /// Read key-length headers, skipping fill items, until a non-filler key
    /// or end of file.
    pub fn read_next_nonfiller_kl(&mut self) -> Result<Option<Kl>> {
        loop {
            match self.read_kl()? {
                None => return Ok(None),
                Some(kl) if kl.key.is_fill_item() => {
                    self.skip(kl.len)?;
                }
                Some(kl) => return Ok(Some(kl)),
            }
        }
    }

    /// Read a whole value into memory.
    pub fn read_value(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut value = vec![0u8; len as usize];
        self.source.read_exact(&mut value)?;
        Ok(value)
    }

    fn read_ber_length(&mut self, offset: u64) -> Result<(u64, u8)> {
        let mut first = [0u8; 1];
        self.source.read_exact(&mut first)?;
        let first = first[0];

        if first < 0x80 {
            return Ok((first as u64, 1));
        }
        if first == 0x80 {
            return Err(MxfError::Ber(format!(
                "Indefinite length at offset {} not supported",
                offset
            )));
        }

        let num_bytes = (first & 0x7F) as usize;
        if num_bytes > 8 {
            return Err(MxfError::Ber(format!(
                "Length of {} bytes at offset {} too large",
                num_bytes, offset
            )));
        }

        let mut bytes = [0u8; 8];
        self.source.read_exact(&mut bytes[..num_bytes])?;
        let mut len = 0u64;
        for &byte in &bytes[..num_bytes] {
            len = (len << 8) | byte as u64;
        }
        Ok((len, 1 + num_bytes as u8))
    }
}

/// Decode a BER length from a byte slice; returns `(length, encoded size)`.
pub fn decode_ber_length(data: &[u8]) -> Result<(u64, usize)> {
    if data.is_empty() {
        return Err(MxfError::Ber("No data for length".into()));
    }
    let first = data[0];
    if first < 0x80 {
        return Ok((first as u64, 1));
    }
    if first == 0x80 {
        return Err(MxfError::Ber("Indefinite length not supported".into()));
    }
    let num_bytes = (first & 0x7F) as usize;
    if num_bytes > 8 || data.len() < 1 + num_bytes {
        return Err(MxfError::Ber("Not enough bytes for length".into()));
    }
    let mut len = 0u64;
    for &byte in &data[1..1 + num_bytes] {
        len = (len << 8) | byte as u64;
    }
    Ok((len, 1 + num_bytes))
}

/// Iterator over the `(tag, data)` items of a local set value.
pub struct LocalSetIter<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> LocalSetIter<'a> {
    /// Iterate the items of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }
}

impl<'a> Iterator for LocalSetIter<'a> {
    type Item = Result<(u16, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.data.len() {
            return None;
        }
        if self.position + 4 > self.data.len() {
            self.position = self.data.len();
            return Some(Err(MxfError::InvalidHeaderMetadata(
                "Truncated local set item header".into(),
            )));
        }

        let tag = BigEndian::read_u16(&self.data[self.position..]);
        let len = BigEndian::read_u16(&self.data[self.position + 2..]) as usize;
        let start = self.position + 4;
        if start + len > self.data.len() {
            self.position = self.data.len();
            return Some(Err(MxfError::InvalidHeaderMetadata(format!(
                "Local set item 0x{:04x} overruns the set",
                tag
            ))));
        }

        self.position = start + len;
        Some(Ok((tag, &self.data[start..start + len])))
    }
}

/// Decode the header of a batch/array value; returns
/// `(element count, element size, elements)`.
pub fn decode_array(data: &[u8]) -> Result<(u32, u32, &[u8])> {
    if data.len() < 8 {
        return Err(MxfError::InvalidHeaderMetadata(
            "Array value shorter than its header".into(),
        ));
    }
    let count = BigEndian::read_u32(data);
    let size = BigEndian::read_u32(&data[4..]);
    let total = count as u64 * size as u64;
    if 8 + total > data.len() as u64 {
        return Err(MxfError::InvalidHeaderMetadata(
            "Array elements overrun the value".into(),
        ));
    }
    Ok((count, size, &data[8..8 + total as usize]))
}

/// The primer pack: local tag to item UL mapping for dynamic tags.
#[derive(Debug, Clone, Default)]
pub struct PrimerPack {
    mappings: Vec<(u16, UL)>,
}

impl PrimerPack {
    /// Decode a primer pack value.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (count, size, elements) = decode_array(data)?;
        if count > 0 && size != 18 {
            return Err(MxfError::InvalidHeaderMetadata(format!(
                "Primer pack element size {} is not 18",
                size
            )));
        }

        let mut mappings = Vec::with_capacity(count as usize);
        for element in elements.chunks_exact(18) {
            let tag = BigEndian::read_u16(element);
            let mut ul = [0u8; 16];
            ul.copy_from_slice(&element[2..]);
            mappings.push((tag, ul));
        }
        Ok(Self { mappings })
    }

    /// Look up the item UL for a local tag.
    pub fn lookup(&self, tag: u16) -> Option<&UL> {
        self.mappings.iter().find(|(t, _)| *t == tag).map(|(_, ul)| ul)
    }

    /// Number of mappings.
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// Whether the primer carries no mappings.
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}
