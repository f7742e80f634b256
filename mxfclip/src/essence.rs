//! The essence reader: turns indexed KLV essence into per-track frames.
//!
//! Positions here are essence edit units counted from the start of the
//! stored essence (origin included); the file reader translates between
//! these and clip positions.

use crate::error::{MxfError, Result};
use crate::frame::Frame;
use crate::index::{IndexEntry, IndexTable, IndexTableSegment};
use crate::klv::KlvFile;
use crate::partition::PartitionPack;
use crate::track::TrackReader;
use crate::ul::WrappingType;
use mxfclip_core::Rational;
use std::collections::HashMap;

/// Maps a stream offset range onto the file offset of its first byte.
#[derive(Debug, Clone, Copy)]
struct BodyLocation {
    stream_offset: u64,
    file_offset: u64,
}

/// The single clip-wrapped essence KLV.
#[derive(Debug, Clone, Copy)]
struct ClipValue {
    file_offset: u64,
    len: u64,
    track_number: u32,
}

/// Reads essence edit units and distributes element frames to track
/// buffers.
pub struct EssenceReader {
    index: IndexTable,
    wrapping: WrappingType,
    track_number_map: HashMap<u32, usize>,
    body_locations: Vec<BodyLocation>,
    clip_value: Option<ClipValue>,
    /// Forward-only reading without partition scanning.
    sequential: bool,
    /// Essence start offset for sequential reading.
    sequential_start: u64,
    position: i64,
    read_start: i64,
    read_duration: i64,
    file_is_complete: bool,
    at_end: bool,
    buffer_frames: bool,
    /// Units replayed after a rewind on a non-seekable source.
    replay: Vec<Vec<Frame>>,
}

impl EssenceReader {
    /// Build an essence reader over the scanned partitions.
    ///
    /// `partitions` is empty for sequential (incomplete or non-seekable)
    /// files, in which case the file must be positioned at the start of the
    /// essence.
    pub fn build(
        file: &mut KlvFile,
        partitions: &[PartitionPack],
        body_sid: u32,
        index_sid: u32,
        wrapping: WrappingType,
        track_number_map: HashMap<u32, usize>,
        file_is_complete: bool,
    ) -> Result<Self> {
        let mut reader = EssenceReader {
            index: IndexTable::new(),
            wrapping,
            track_number_map,
            body_locations: Vec::new(),
            clip_value: None,
            sequential: partitions.is_empty(),
            sequential_start: if partitions.is_empty() { file.tell()? } else { 0 },
            position: 0,
            read_start: 0,
            read_duration: -1,
            file_is_complete,
            at_end: false,
            buffer_frames: false,
            replay: Vec::new(),
        };

        if !reader.sequential {
            reader.scan_partitions(file, partitions, body_sid, index_sid)?;

            if reader.wrapping == WrappingType::Clip {
                reader.locate_clip_value(file)?;
            }
        }

        Ok(reader)
    }

    fn scan_partitions(
        &mut self,
        file: &mut KlvFile,
        partitions: &[PartitionPack],
        body_sid: u32,
        index_sid: u32,
    ) -> Result<()> {
        for partition in partitions {
            if partition.header_byte_count == 0
                && partition.index_byte_count == 0
                && partition.body_sid != body_sid
            {
                continue;
            }

            // position after the partition pack value and any filler
            file.seek(partition.this_partition)?;
            let kl = file
                .read_kl()?
                .ok_or_else(|| MxfError::InvalidFile("Partition offset does not resolve".into()))?;
            file.skip(kl.len)?;
            loop {
                let position = file.tell()?;
                match file.read_kl()? {
                    Some(kl) if kl.key.is_fill_item() => file.skip(kl.len)?,
                    _ => {
                        file.seek(position)?;
                        break;
                    }
                }
            }
            let metadata_start = file.tell()?;
            let index_start = metadata_start + partition.header_byte_count;
            let essence_start = index_start + partition.index_byte_count;

            if partition.index_byte_count > 0 {
                self.read_index_segments(file, index_start, partition.index_byte_count, index_sid)?;
            }

            if partition.body_sid == body_sid {
                self.body_locations.push(BodyLocation {
                    stream_offset: partition.body_offset,
                    file_offset: essence_start,
                });
            }
        }

        self.body_locations.sort_by_key(|l| l.stream_offset);
        Ok(())
    }

    fn read_index_segments(
        &mut self,
        file: &mut KlvFile,
        index_start: u64,
        index_byte_count: u64,
        index_sid: u32,
    ) -> Result<()> {
        file.seek(index_start)?;
        let mut consumed = 0u64;
        while consumed < index_byte_count {
            let kl = match file.read_kl()? {
                Some(kl) => kl,
                None => break,
            };
            consumed += 16 + kl.llen as u64 + kl.len;

            if kl.key.is_index_table_segment() {
                let value = file.read_value(kl.len)?;
                let segment = IndexTableSegment::parse(&value)?;
                if index_sid == 0 || segment.index_sid == index_sid || segment.index_sid == 0 {
                    self.index.add_segment(segment);
                }
            } else {
                file.skip(kl.len)?;
            }
        }
        Ok(())
    }

    fn locate_clip_value(&mut self, file: &mut KlvFile) -> Result<()> {
        let location = match self.body_locations.first() {
            Some(location) => *location,
            None => return Ok(()),
        };
        file.seek(location.file_offset)?;
        let kl = file
            .read_next_nonfiller_kl()?
            .ok_or(MxfError::NoEssence)?;
        if !kl.key.is_essence_element() {
            return Err(MxfError::InvalidFile(
                "Clip-wrapped essence container does not start with an essence element".into(),
            ));
        }
        self.clip_value = Some(ClipValue {
            file_offset: kl.value_offset(),
            len: kl.len,
            track_number: kl.key.essence_track_number(),
        });
        Ok(())
    }

    /// Use a fixed edit-unit byte count when the file carries no index
    /// table (e.g. clip-wrapped PCM sized by its block align).
    pub fn set_fixed_edit_unit_size(&mut self, size: u32, edit_rate: Rational, duration: i64) {
        if self.index.is_empty() && size > 0 {
            self.index.add_segment(IndexTableSegment {
                index_edit_rate: edit_rate,
                index_start_position: 0,
                index_duration: duration.max(0),
                edit_unit_byte_count: size,
                index_sid: 0,
                body_sid: 0,
                entries: Vec::new(),
            });
        }
    }

    /// Whether an index table is available.
    pub fn have_index(&self) -> bool {
        !self.index.is_empty()
    }

    /// Total indexed duration.
    pub fn indexed_duration(&self) -> i64 {
        self.index.indexed_duration()
    }

    /// Whether the essence extent is fully known.
    pub fn is_complete(&self) -> bool {
        self.file_is_complete
    }

    /// The index entry covering `position`.
    pub fn index_entry(&self, position: i64) -> Option<IndexEntry> {
        self.index.entry_at(position)
    }

    /// Clamp a position into the legal essence range.
    pub fn legitimise_position(&self, position: i64) -> i64 {
        self.index.legitimise_position(position)
    }

    /// Current essence position.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Restrict reads to `[start, start + duration)`; a negative duration
    /// removes the end limit.
    pub fn set_read_limits(&mut self, start: i64, duration: i64) {
        self.read_start = start;
        self.read_duration = duration;
    }

    /// Retain read units for replay so a non-seekable source can rewind
    /// over the pre-read-info pass.
    pub fn set_buffer_frames(&mut self, enable: bool) {
        self.buffer_frames = enable;
        if !enable && self.position as usize >= self.replay.len() {
            self.replay.clear();
        }
    }

    /// Seek to an essence position.
    pub fn seek(&mut self, file: &mut KlvFile, position: i64) -> Result<()> {
        if self.sequential && !file.is_seekable() {
            // rewinds are only possible over the replay buffer
            if position != self.position && position as usize > self.replay.len() {
                return Err(MxfError::other(format!(
                    "Cannot seek to position {} on a non-seekable source",
                    position
                )));
            }
        }
        if self.sequential && file.is_seekable() && position == 0 {
            file.seek(self.sequential_start)?;
            self.at_end = false;
        }
        self.position = position;
        Ok(())
    }

    /// Read up to `num_samples` edit units, pushing element frames into the
    /// enabled tracks' open transactions. `position_translate` converts
    /// essence positions to the clip positions recorded on frames.
    pub fn read(
        &mut self,
        file: &mut KlvFile,
        tracks: &mut [TrackReader],
        num_samples: u32,
        position_translate: i64,
    ) -> Result<u32> {
        let mut num_read = 0u32;
        while num_read < num_samples {
            let position = self.position;
            if position < 0 {
                return Err(MxfError::other(format!(
                    "Negative essence position {}",
                    position
                )));
            }
            if self.read_duration >= 0 && position >= self.read_start + self.read_duration {
                break;
            }
            if !self.read_unit(file, tracks, position, position_translate)? {
                break;
            }
            self.position += 1;
            num_read += 1;
        }
        Ok(num_read)
    }

    fn read_unit(
        &mut self,
        file: &mut KlvFile,
        tracks: &mut [TrackReader],
        position: i64,
        position_translate: i64,
    ) -> Result<bool> {
        // serve rewound units from the replay buffer; the destination track
        // index was recorded in track_position when the unit was buffered
        if (position as usize) < self.replay.len() {
            let frames = self.replay[position as usize].clone();
            for mut frame in frames {
                let track_index = frame.track_position as usize;
                frame.track_position = position;
                frame.edit_unit_position = position - position_translate;
                if let Some(track) = tracks.get_mut(track_index) {
                    if track.is_enabled() {
                        let edit_rate = track.info().common().edit_rate;
                        frame.edit_rate = edit_rate;
                        track.frame_buffer_mut().push(frame);
                    }
                }
            }
            return Ok(true);
        }

        let mut unit_frames: Vec<Frame> = Vec::new();
        let produced = if self.wrapping == WrappingType::Clip && self.clip_value.is_some() {
            self.read_clip_unit(file, tracks, position, position_translate, &mut unit_frames)?
        } else if !self.sequential && self.index.is_empty() {
            return Err(MxfError::NoIndexTable);
        } else if !self.sequential {
            self.read_indexed_unit(file, tracks, position, position_translate, &mut unit_frames)?
        } else {
            self.read_sequential_unit(file, tracks, position, position_translate, &mut unit_frames)?
        };

        if produced && self.buffer_frames {
            while self.replay.len() < position as usize {
                self.replay.push(Vec::new());
            }
            self.replay.push(unit_frames);
        }
        Ok(produced)
    }

    fn read_clip_unit(
        &mut self,
        file: &mut KlvFile,
        tracks: &mut [TrackReader],
        position: i64,
        position_translate: i64,
        unit_frames: &mut Vec<Frame>,
    ) -> Result<bool> {
        let clip = match self.clip_value {
            Some(clip) => clip,
            None => return Ok(false),
        };
        let entry = match self.index.entry_at(position) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let size = match self.index.edit_unit_size(position) {
            Some(size) => size,
            None => clip.len.saturating_sub(entry.stream_offset),
        };
        if size == 0 || entry.stream_offset + size > clip.len {
            return Ok(false);
        }

        file.seek(clip.file_offset + entry.stream_offset)?;
        let data = file.read_value(size)?;
        self.push_frame(
            tracks,
            clip.track_number,
            position,
            position_translate,
            entry,
            data,
            unit_frames,
        );
        Ok(true)
    }

    fn read_indexed_unit(
        &mut self,
        file: &mut KlvFile,
        tracks: &mut [TrackReader],
        position: i64,
        position_translate: i64,
        unit_frames: &mut Vec<Frame>,
    ) -> Result<bool> {
        let entry = match self.index.entry_at(position) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let unit_size = self.index.edit_unit_size(position);

        let file_offset = match self.stream_to_file_offset(entry.stream_offset) {
            Some(offset) => offset,
            None => return Ok(false),
        };
        file.seek(file_offset)?;

        let mut consumed = 0u64;
        let mut produced = false;
        loop {
            if let Some(unit_size) = unit_size {
                if consumed >= unit_size {
                    break;
                }
            }
            let kl = match file.read_kl()? {
                Some(kl) => kl,
                None => break,
            };
            if kl.key.is_essence_element() {
                let data = file.read_value(kl.len)?;
                self.push_frame(
                    tracks,
                    kl.key.essence_track_number(),
                    position,
                    position_translate,
                    entry,
                    data,
                    unit_frames,
                );
                produced = true;
            } else if kl.key.is_fill_item() {
                file.skip(kl.len)?;
            } else {
                // ran into the next partition or index: the unit is over
                break;
            }
            consumed += 16 + kl.llen as u64 + kl.len;
        }

        Ok(produced)
    }

    fn read_sequential_unit(
        &mut self,
        file: &mut KlvFile,
        tracks: &mut [TrackReader],
        position: i64,
        position_translate: i64,
        unit_frames: &mut Vec<Frame>,
    ) -> Result<bool> {
        if self.at_end {
            return Ok(false);
        }
        let entry = self.index.entry_at(position).unwrap_or(IndexEntry {
            temporal_offset: 0,
            key_frame_offset: 0,
            flags: IndexEntry::FLAG_RANDOM_ACCESS,
            stream_offset: 0,
        });

        loop {
            let kl = match file.read_kl()? {
                Some(kl) => kl,
                None => {
                    self.at_end = true;
                    return Ok(false);
                }
            };
            if kl.key.is_essence_element() {
                let data = file.read_value(kl.len)?;
                self.push_frame(
                    tracks,
                    kl.key.essence_track_number(),
                    position,
                    position_translate,
                    entry,
                    data,
                    unit_frames,
                );
                return Ok(true);
            }
            if kl.key.is_footer_partition() {
                self.at_end = true;
                file.skip(kl.len)?;
                return Ok(false);
            }
            // filler, body partition packs and index segments are passed over
            file.skip(kl.len)?;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn push_frame(
        &self,
        tracks: &mut [TrackReader],
        track_number: u32,
        position: i64,
        position_translate: i64,
        entry: IndexEntry,
        data: Vec<u8>,
        unit_frames: &mut Vec<Frame>,
    ) {
        let track_index = match self.track_number_map.get(&track_number) {
            Some(&index) => index,
            None => {
                log::debug!("Skipping essence element with unmapped track number 0x{:08x}", track_number);
                return;
            }
        };
        let track = match tracks.get_mut(track_index) {
            Some(track) => track,
            None => return,
        };

        let frame = Frame {
            edit_unit_position: position - position_translate,
            edit_rate: track.info().common().edit_rate,
            track_position: position,
            key_frame_offset: entry.key_frame_offset,
            temporal_offset: entry.temporal_offset,
            flags: entry.flags,
            data,
        };

        if self.buffer_frames {
            // remember the destination track for replay in track_position
            let mut replay_frame = frame.clone();
            replay_frame.track_position = track_index as i64;
            unit_frames.push(replay_frame);
        }

        if track.is_enabled() {
            track.frame_buffer_mut().push(frame);
        }
    }

    fn stream_to_file_offset(&self, stream_offset: u64) -> Option<u64> {
        let location = self
            .body_locations
            .iter()
            .rev()
            .find(|l| l.stream_offset <= stream_offset)?;
        Some(location.file_offset + (stream_offset - location.stream_offset))
    }
}
