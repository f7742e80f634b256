//! Essence index tables: edit-unit position to stream-offset mapping.

use crate::error::{MxfError, Result};
use crate::klv::{decode_array, LocalSetIter};
use byteorder::{BigEndian, ByteOrder};
use mxfclip_core::Rational;

/// One indexed edit unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Presentation-to-decode reordering offset.
    pub temporal_offset: i8,
    /// Offset back to the anchor (key) frame; always <= 0.
    pub key_frame_offset: i8,
    /// Entry flags.
    pub flags: u8,
    /// Byte offset within the essence stream.
    pub stream_offset: u64,
}

impl IndexEntry {
    /// Random access (key frame) flag.
    pub const FLAG_RANDOM_ACCESS: u8 = 0x80;

    /// Check if this entry is a random access point.
    pub fn is_random_access(&self) -> bool {
        (self.flags & Self::FLAG_RANDOM_ACCESS) != 0
    }
}

/// A decoded index table segment.
#[derive(Debug, Clone)]
pub struct IndexTableSegment {
    /// Edit rate the index counts in.
    pub index_edit_rate: Rational,
    /// First edit unit covered by this segment.
    pub index_start_position: i64,
    /// Number of edit units covered (0 with a byte count means open-ended).
    pub index_duration: i64,
    /// Fixed bytes per edit unit (0 = variable, see `entries`).
    pub edit_unit_byte_count: u32,
    /// Index stream id.
    pub index_sid: u32,
    /// Essence stream id.
    pub body_sid: u32,
    /// Variable bytes-per-edit-unit entries.
    pub entries: Vec<IndexEntry>,
}

impl IndexTableSegment {
    /// Decode a segment from its local set value.
    pub fn parse(value: &[u8]) -> Result<Self> {
        let mut segment = IndexTableSegment {
            index_edit_rate: Rational::zero(),
            index_start_position: 0,
            index_duration: 0,
            edit_unit_byte_count: 0,
            index_sid: 0,
            body_sid: 0,
            entries: Vec::new(),
        };
        let mut slice_count = 0u8;

        // the entry array must be decoded after the slice count, whatever
        // the item order; remember it and decode last
        let mut entry_array: Option<&[u8]> = None;

        for item in LocalSetIter::new(value) {
            let (tag, data) = item?;
            match tag {
                0x3F05 => segment.edit_unit_byte_count = read_u32(data, "EditUnitByteCount")?,
                0x3F06 => segment.index_sid = read_u32(data, "IndexSID")?,
                0x3F07 => segment.body_sid = read_u32(data, "BodySID")?,
                0x3F08 => slice_count = *data.first().unwrap_or(&0),
                0x3F0A => entry_array = Some(data),
                0x3F0B => {
                    if data.len() < 8 {
                        return Err(MxfError::InvalidHeaderMetadata("Short IndexEditRate".into()));
                    }
                    segment.index_edit_rate =
                        Rational::new(BigEndian::read_i32(data), BigEndian::read_i32(&data[4..]));
                }
                0x3F0C => segment.index_start_position = read_i64(data, "IndexStartPosition")?,
                0x3F0D => segment.index_duration = read_i64(data, "IndexDuration")?,
                _ => {}
            }
        }

        if let Some(data) = entry_array {
            let (count, size, elements) = decode_array(data)?;
            // temporal offset, key frame offset, flags, stream offset, then
            // optional slice offsets
            let base_size = 11 + 4 * slice_count as u32;
            if count > 0 && size < base_size {
                return Err(MxfError::InvalidHeaderMetadata(format!(
                    "Index entry size {} below minimum {}",
                    size, base_size
                )));
            }
            segment.entries.reserve(count as usize);
            for element in elements.chunks_exact(size as usize) {
                segment.entries.push(IndexEntry {
                    temporal_offset: element[0] as i8,
                    key_frame_offset: element[1] as i8,
                    flags: element[2],
                    stream_offset: BigEndian::read_u64(&element[3..]),
                });
            }
        }

        Ok(segment)
    }
}

fn read_u32(data: &[u8], name: &str) -> Result<u32> {
    if data.len() < 4 {
        return Err(MxfError::InvalidHeaderMetadata(format!("Short {}", name)));
    }
    Ok(BigEndian::read_u32(data))
}

fn read_i64(data: &[u8], name: &str) -> Result<i64> {
    if data.len() < 8 {
        return Err(MxfError::InvalidHeaderMetadata(format!("Short {}", name)));
    }
    Ok(BigEndian::read_i64(data))
}

/// Merged index segments for one essence stream, searchable by edit-unit
/// position.
#[derive(Debug, Default)]
pub struct IndexTable {
    segments: Vec<IndexTableSegment>,
}

impl IndexTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a segment, ignoring duplicates of an already-covered range.
    pub fn add_segment(&mut self, segment: IndexTableSegment) {
        if self
            .segments
            .iter()
            .any(|s| s.index_start_position == segment.index_start_position)
        {
            return;
        }
        self.segments.push(segment);
        self.segments.sort_by_key(|s| s.index_start_position);
    }

    /// Whether any segment was added.
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The edit rate of the index.
    pub fn edit_rate(&self) -> Rational {
        self.segments
            .first()
            .map(|s| s.index_edit_rate)
            .unwrap_or_else(Rational::zero)
    }

    /// Total indexed duration in edit units.
    pub fn indexed_duration(&self) -> i64 {
        self.segments
            .last()
            .map(|s| s.index_start_position + s.index_duration)
            .unwrap_or(0)
    }

    /// True when a single fixed edit-unit byte count covers the stream.
    pub fn is_cbe(&self) -> bool {
        self.segments.len() == 1 && self.segments[0].edit_unit_byte_count > 0
    }

    /// Look up the entry covering `position` by binary search.
    pub fn entry_at(&self, position: i64) -> Option<IndexEntry> {
        if position < 0 {
            return None;
        }
        let segment_index = match self
            .segments
            .binary_search_by_key(&position, |s| s.index_start_position)
        {
            Ok(i) => i,
            Err(0) => return None,
            Err(i) => i - 1,
        };
        let segment = &self.segments[segment_index];
        let relative = position - segment.index_start_position;

        if segment.edit_unit_byte_count > 0 {
            if segment.index_duration > 0 && relative >= segment.index_duration {
                return None;
            }
            return Some(IndexEntry {
                temporal_offset: 0,
                key_frame_offset: 0,
                flags: IndexEntry::FLAG_RANDOM_ACCESS,
                stream_offset: relative as u64 * segment.edit_unit_byte_count as u64,
            });
        }

        segment.entries.get(relative as usize).copied()
    }

    /// Byte size of the edit unit at `position`, when determinable.
    pub fn edit_unit_size(&self, position: i64) -> Option<u64> {
        if self.is_cbe() {
            return Some(self.segments[0].edit_unit_byte_count as u64);
        }
        let this = self.entry_at(position)?;
        let next = self.entry_at(position + 1)?;
        Some(next.stream_offset - this.stream_offset)
    }

    /// Clamp a position into the indexed essence range.
    pub fn legitimise_position(&self, position: i64) -> i64 {
        let duration = self.indexed_duration();
        if duration <= 0 {
            return 0;
        }
        position.clamp(0, duration - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vbe_segment(start: i64, entries: &[(i8, i8, u8, u64)]) -> IndexTableSegment {
        IndexTableSegment {
            index_edit_rate: Rational::new(25, 1),
            index_start_position: start,
            index_duration: entries.len() as i64,
            edit_unit_byte_count: 0,
            index_sid: 2,
            body_sid: 1,
            entries: entries
                .iter()
                .map(|&(temporal_offset, key_frame_offset, flags, stream_offset)| IndexEntry {
                    temporal_offset,
                    key_frame_offset,
                    flags,
                    stream_offset,
                })
                .collect(),
        }
    }

    #[test]
    fn test_segment_parse() {
        let mut value = Vec::new();
        // IndexEditRate
        value.extend_from_slice(&[0x3F, 0x0B, 0x00, 0x08]);
        value.extend_from_slice(&25i32.to_be_bytes());
        value.extend_from_slice(&1i32.to_be_bytes());
        // IndexDuration
        value.extend_from_slice(&[0x3F, 0x0D, 0x00, 0x08]);
        value.extend_from_slice(&2i64.to_be_bytes());
        // BodySID / IndexSID
        value.extend_from_slice(&[0x3F, 0x07, 0x00, 0x04, 0, 0, 0, 1]);
        value.extend_from_slice(&[0x3F, 0x06, 0x00, 0x04, 0, 0, 0, 2]);
        // IndexEntryArray with two 11-byte entries
        value.extend_from_slice(&[0x3F, 0x0A, 0x00, 30]);
        value.extend_from_slice(&2u32.to_be_bytes());
        value.extend_from_slice(&11u32.to_be_bytes());
        value.extend_from_slice(&[0, 0, 0x80]);
        value.extend_from_slice(&0u64.to_be_bytes());
        value.extend_from_slice(&[0, 0xFFu8, 0x00]);
        value.extend_from_slice(&1000u64.to_be_bytes());

        let segment = IndexTableSegment::parse(&value).unwrap();
        assert_eq!(segment.index_edit_rate, Rational::new(25, 1));
        assert_eq!(segment.index_duration, 2);
        assert_eq!(segment.body_sid, 1);
        assert_eq!(segment.index_sid, 2);
        assert_eq!(segment.entries.len(), 2);
        assert_eq!(segment.entries[0].flags, 0x80);
        assert_eq!(segment.entries[1].key_frame_offset, -1);
        assert_eq!(segment.entries[1].stream_offset, 1000);
    }

    #[test]
    fn test_cbe_lookup() {
        let mut table = IndexTable::new();
        table.add_segment(IndexTableSegment {
            index_edit_rate: Rational::new(25, 1),
            index_start_position: 0,
            index_duration: 10,
            edit_unit_byte_count: 500,
            index_sid: 2,
            body_sid: 1,
            entries: Vec::new(),
        });

        assert!(table.is_cbe());
        assert_eq!(table.indexed_duration(), 10);
        let entry = table.entry_at(3).unwrap();
        assert_eq!(entry.stream_offset, 1500);
        assert!(entry.is_random_access());
        assert_eq!(table.edit_unit_size(3), Some(500));
        assert!(table.entry_at(10).is_none());
        assert!(table.entry_at(-1).is_none());
    }

    #[test]
    fn test_vbe_lookup_across_segments() {
        let mut table = IndexTable::new();
        table.add_segment(vbe_segment(2, &[(0, 0, 0x80, 600), (0, -1, 0, 900)]));
        table.add_segment(vbe_segment(0, &[(0, 0, 0x80, 0), (0, -1, 0, 300)]));

        assert_eq!(table.indexed_duration(), 4);
        assert_eq!(table.entry_at(1).unwrap().stream_offset, 300);
        assert_eq!(table.entry_at(2).unwrap().stream_offset, 600);
        assert_eq!(table.entry_at(3).unwrap().key_frame_offset, -1);
        assert!(table.entry_at(4).is_none());
        assert_eq!(table.edit_unit_size(1), Some(300));
    }

    #[test]
    fn test_duplicate_segment_ignored() {
        let mut table = IndexTable::new();
        table.add_segment(vbe_segment(0, &[(0, 0, 0x80, 0)]));
        table.add_segment(vbe_segment(0, &[(0, 0, 0x80, 0)]));
        assert_eq!(table.indexed_duration(), 1);
    }

    #[test]
    fn test_legitimise_position() {
        let mut table = IndexTable::new();
        table.add_segment(vbe_segment(0, &[(0, 0, 0x80, 0), (0, 0, 0, 100), (0, 0, 0, 200)]));

        assert_eq!(table.legitimise_position(-5), 0);
        assert_eq!(table.legitimise_position(1), 1);
        assert_eq!(table.legitimise_position(i64::MAX), 2);
    }
}
