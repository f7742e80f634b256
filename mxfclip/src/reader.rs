//! The file reader: opens an MXF file and exposes its essence as
//! sample-addressable tracks on a common clip timeline.
//!
//! The reader walks the material package, resolves each track's source
//! clip to essence stored in this file or in companion files, and
//! coordinates reads so that the internal essence stream and all external
//! streams stay frame-aligned under arbitrary edit-rate ratios.

use crate::byte_source::{ByteSource, FileByteSource};
use crate::error::{MxfError, OpenResult, Result};
use crate::essence::EssenceReader;
use crate::essence_type::{classify_essence, EssenceType};
use crate::file_index::FileId;
use crate::frame::Frame;
use crate::index::IndexEntry;
use crate::klv::KlvFile;
use crate::metadata::{DataDef, HeaderMetadata, SetData, SetId};
use crate::partition::{
    read_all_partitions, read_footer_partition, read_header_partition, PartitionPack,
};
use crate::resolver::{DefaultPackageResolver, PackageResolver, ResolvedPackage, SourceClipRef};
use crate::track::{
    AncManifestElement, DataTrackInfo, PictureTrackInfo, SoundTrackInfo, TimedTextManifest,
    TrackInfo, TrackReader, VbiManifestElement,
};
use crate::ul::{Ul, WrappingType};
use mxfclip_core::rational::{convert_duration, convert_position, convert_timecode_offset, Rounding};
use mxfclip_core::{Rational, SampleSequence, Timecode, Umid};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Options controlling the open protocol.
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Scan all partitions and prefer the last header metadata copy.
    pub enable_index_file: bool,
    /// Leading frames to inspect for VBI/ANC manifests.
    pub st436_manifest_count: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            enable_index_file: true,
            st436_manifest_count: 2,
        }
    }
}

/// A text object extracted from a material-package static DM track.
#[derive(Debug, Clone)]
pub struct TextObject {
    pub material_package_uid: Umid,
    pub material_track_id: u32,
    pub component_index: u16,
    pub mime_type: Option<String>,
    pub language_code: Option<String>,
    pub description: Option<String>,
}

/// Position of a track in the sorted clip track list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackSlot {
    Internal(usize),
    External { file_id: FileId, track_index: usize },
}

/// An attached external reader and its rate-conversion pattern.
#[derive(Debug)]
struct ExternalSlot {
    file_id: FileId,
    sequence: SampleSequence,
}

/// Reads one MXF file, together with the companion files it references, as
/// a single clip.
impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("file_id", &self.file_id)
            .field("op_label", &self.op_label)
            .field("mxf_version", &self.mxf_version)
            .field("wrapping_type", &self.wrapping_type)
            .field("body_sid", &self.body_sid)
            .field("index_sid", &self.index_sid)
            .field("edit_rate", &self.edit_rate)
            .field("duration", &self.duration)
            .field("origin", &self.origin)
            .field("file_origin", &self.file_origin)
            .field("read_start_position", &self.read_start_position)
            .field("read_duration", &self.read_duration)
            .field("material_package_uid", &self.material_package_uid)
            .field("material_package_name", &self.material_package_name)
            .field("material_start_timecode", &self.material_start_timecode)
            .field(
                "file_source_start_timecode",
                &self.file_source_start_timecode,
            )
            .field(
                "physical_source_start_timecode",
                &self.physical_source_start_timecode,
            )
            .field("avid_aux_timecodes", &self.avid_aux_timecodes)
            .field(
                "physical_source_package_name",
                &self.physical_source_package_name,
            )
            .field("internal_track_readers", &self.internal_track_readers)
            .field("track_order", &self.track_order)
            .field("externals", &self.externals)
            .field("external_track_refs", &self.external_track_refs)
            .field("require_frame_info_count", &self.require_frame_info_count)
            .field("st436_manifest_count", &self.st436_manifest_count)
            .field("text_objects", &self.text_objects)
            .field("read_error", &self.read_error)
            .field("read_error_message", &self.read_error_message)
            .finish()
    }
}

pub struct FileReader {
    file_id: FileId,
    file: KlvFile,
    metadata: HeaderMetadata,
    resolver: Option<Box<dyn PackageResolver>>,

    op_label: Ul,
    mxf_version: u16,
    wrapping_type: WrappingType,
    body_sid: u32,
    index_sid: u32,

    edit_rate: Rational,
    duration: i64,
    origin: i64,
    file_origin: i64,
    read_start_position: i64,
    read_duration: i64,

    material_package_uid: Umid,
    material_package_name: Option<String>,
    material_start_timecode: Option<Timecode>,
    file_source_start_timecode: Option<Timecode>,
    physical_source_start_timecode: Option<Timecode>,
    avid_aux_timecodes: Vec<Option<Timecode>>,
    physical_source_package_name: Option<String>,

    internal_track_readers: Vec<TrackReader>,
    track_order: Vec<TrackSlot>,
    externals: Vec<ExternalSlot>,
    external_track_refs: Vec<(FileId, usize)>,
    essence_reader: Option<EssenceReader>,

    require_frame_info_count: u32,
    st436_manifest_count: u32,
    text_objects: Vec<TextObject>,

    read_error: bool,
    read_error_message: String,
}

impl FileReader {
    /// Open the MXF file at `path` with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, OpenOptions::default())
    }

    /// Open the MXF file at `path`.
    pub fn open_with_options(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self> {
        let source = Box::new(FileByteSource::open(path.as_ref())?);
        Self::open_source(source, path.as_ref(), options)
    }

    /// Open an already-constructed byte source, e.g. an in-memory buffer or
    /// a non-seekable stream.
    pub fn open_source(
        source: Box<dyn ByteSource>,
        path: &Path,
        options: OpenOptions,
    ) -> Result<Self> {
        let mut resolver = DefaultPackageResolver::default();
        let mut reader = Self::open_pipeline(source, path, &mut resolver, options)?;
        reader.resolver = Some(Box::new(resolver));
        if let Err(e) = reader.finalize_open() {
            log::error!("Open failed ({}): {}", e.open_result().as_str(), e);
            return Err(e);
        }
        Ok(reader)
    }

    /// Open a companion file on behalf of a resolver, which keeps ownership
    /// of the returned reader.
    pub(crate) fn open_companion(
        source: Box<dyn ByteSource>,
        path: &Path,
        resolver: &mut dyn PackageResolver,
    ) -> Result<Self> {
        let mut reader = Self::open_pipeline(source, path, resolver, OpenOptions::default())?;
        if !reader.externals.is_empty() {
            log::error!("A companion file that itself references external essence is not supported");
            return Err(MxfError::NotSupported("Chained external essence".into()));
        }
        if let Err(e) = reader.finalize_open() {
            log::error!("Open failed ({}): {}", e.open_result().as_str(), e);
            return Err(e);
        }
        Ok(reader)
    }

    /// The one-result classification of an open error.
    pub fn classify_open_error(error: &MxfError) -> OpenResult {
        error.open_result()
    }

    fn open_pipeline(
        source: Box<dyn ByteSource>,
        path: &Path,
        resolver: &mut dyn PackageResolver,
        options: OpenOptions,
    ) -> Result<Self> {
        let result = Self::open_pipeline_inner(source, path, resolver, options);
        if let Err(e) = &result {
            log::error!("Open failed ({}): {}", e.open_result().as_str(), e);
        }
        result
    }

    fn open_pipeline_inner(
        source: Box<dyn ByteSource>,
        path: &Path,
        resolver: &mut dyn PackageResolver,
        options: OpenOptions,
    ) -> Result<Self> {
        let mut file = KlvFile::new(source);

        let absolute_uri = absolute_file_uri(path);
        let file_id = resolver.file_index_mut().register_file(
            absolute_uri,
            path.to_string_lossy().into_owned(),
            path.to_string_lossy().into_owned(),
        );

        // header partition and operational pattern
        let header_partition = read_header_partition(&mut file)?;
        let op_label = header_partition.operational_pattern;
        if !op_label.is_null() && !op_label.is_op_atom() && !op_label.is_op_1a() && !op_label.is_op_1b() {
            log::warn!("Operational pattern possibly not supported");
        }

        // essence wrapping from the first recognizable non-timed-text label,
        // falling back to an OP-based guess
        let mut wrapping_type = WrappingType::Unknown;
        for label in &header_partition.essence_containers {
            if !label.is_timed_text_container() {
                wrapping_type = label.wrapping_type();
                if wrapping_type != WrappingType::Unknown {
                    break;
                }
            }
        }
        if wrapping_type == WrappingType::Unknown {
            wrapping_type = if op_label.is_op_atom() {
                WrappingType::Clip
            } else {
                WrappingType::Frame
            };
        }

        // find the partition to read header metadata from
        let mut file_is_complete = false;
        let mut partitions: Vec<PartitionPack> = Vec::new();
        let metadata_partition: Option<PartitionPack>;
        if options.enable_index_file {
            if file.is_seekable() {
                match read_all_partitions(&mut file, &header_partition)? {
                    Some(all) => {
                        file_is_complete = true;
                        partitions = all;
                    }
                    None => {
                        if header_partition.closed || header_partition.footer_partition != 0 {
                            log::warn!("Failed to read all partitions. File may be incomplete or invalid");
                        }
                    }
                }
            }
            if file_is_complete {
                metadata_partition = partitions
                    .iter()
                    .rev()
                    .find(|p| p.header_byte_count > 0)
                    .cloned();
            } else {
                metadata_partition = Some(header_partition.clone());
            }
        } else {
            let mut found = None;
            if file.is_seekable() {
                if let Some(footer) = read_footer_partition(&mut file, &header_partition)? {
                    if footer.header_byte_count > 0 {
                        found = Some(footer);
                    }
                }
            }
            if found.is_none() && header_partition.header_byte_count > 0 {
                found = Some(header_partition.clone());
            }
            metadata_partition = found;
        }
        let metadata_partition = match metadata_partition {
            Some(p) if p.header_byte_count > 0 => p,
            _ => return Err(MxfError::NoHeaderMetadata),
        };

        // read the header metadata
        if file.is_seekable() {
            file.seek(metadata_partition.this_partition)?;
            let kl = file
                .read_kl()?
                .ok_or_else(|| MxfError::InvalidFile("Metadata partition offset does not resolve".into()))?;
            file.skip(kl.len)?;
        }
        let kl = file.read_next_nonfiller_kl()?.ok_or(MxfError::NoHeaderMetadata)?;
        if !kl.key.is_primer_pack() {
            return Err(MxfError::InvalidHeaderMetadata(
                "Header metadata does not start with a primer pack".into(),
            ));
        }
        let metadata = HeaderMetadata::read(
            &mut file,
            kl.len,
            16 + kl.llen as u64 + kl.len,
            metadata_partition.header_byte_count,
        )?;

        let mut reader = FileReader {
            file_id,
            file,
            metadata,
            resolver: None,
            op_label,
            mxf_version: 0,
            wrapping_type,
            body_sid: 0,
            index_sid: 0,
            edit_rate: Rational::zero(),
            duration: -1,
            origin: 0,
            file_origin: 0,
            read_start_position: 0,
            read_duration: -1,
            material_package_uid: Umid::zero(),
            material_package_name: None,
            material_start_timecode: None,
            file_source_start_timecode: None,
            physical_source_start_timecode: None,
            avid_aux_timecodes: Vec::new(),
            physical_source_package_name: None,
            internal_track_readers: Vec::new(),
            track_order: Vec::new(),
            externals: Vec::new(),
            external_track_refs: Vec::new(),
            essence_reader: None,
            require_frame_info_count: 0,
            st436_manifest_count: options.st436_manifest_count,
            text_objects: Vec::new(),
            read_error: false,
            read_error_message: String::new(),
        };

        reader.process_metadata(resolver, &header_partition)?;

        // metadata was read from the footer of an incomplete file: move back
        // behind the header partition pack so essence reading starts right
        if !file_is_complete
            && metadata_partition.this_partition != header_partition.this_partition
            && reader.file.is_seekable()
        {
            reader.file.seek(header_partition.this_partition)?;
            if let Some(kl) = reader.file.read_kl()? {
                reader.file.skip(kl.len)?;
            }
        }

        // create the internal essence reader
        if !reader.internal_track_readers.is_empty() && reader.body_sid != 0 {
            reader.create_essence_reader(&partitions, file_is_complete)?;

            reader.check_require_frame_info();
            if reader.require_frame_info_count > 0 {
                reader.extract_frame_info();
            }
        } else {
            reader.wrapping_type = WrappingType::Unknown;
        }

        Ok(reader)
    }

    /// Final open phase, run once the reader can address its external
    /// readers: consistency warnings and the initial read limits.
    fn finalize_open(&mut self) -> Result<()> {
        if self.is_complete() {
            if let Some(essence_reader) = self.essence_reader.as_ref() {
                if self.index_sid != 0 && essence_reader.indexed_duration() < self.duration {
                    log::warn!(
                        "Essence index duration {} is less than track duration {}",
                        essence_reader.indexed_duration(),
                        self.duration
                    );
                }
            }
            let required = self.max_precharge(0, false)?;
            let available = self.max_precharge(0, true)?;
            if required != available {
                log::warn!(
                    "Possibly not enough precharge available (available={}, required={})",
                    available,
                    required
                );
            }
            let required = self.max_rollout(self.duration - 1, false)?;
            let available = self.max_rollout(self.duration - 1, true)?;
            if required != available {
                log::warn!(
                    "Possibly not enough rollout available (available={}, required={})",
                    available,
                    required
                );
            }

            let (start, duration) = self.read_limits(false)?;
            self.set_read_limits(start, duration, true)?;
        } else if self.duration > 0 {
            self.set_read_limits(-self.origin, self.origin + self.duration, false)?;
        }
        Ok(())
    }

    // ---- accessors -------------------------------------------------------

    /// Id of this file in the shared file index.
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// All file ids contributing to the clip, this file included.
    pub fn file_ids(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = vec![self.file_id];
        ids.extend(self.externals.iter().map(|e| e.file_id));
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// The operational pattern label of the header partition.
    pub fn op_label(&self) -> Ul {
        self.op_label
    }

    /// The MXF version from the preface.
    pub fn mxf_version(&self) -> u16 {
        self.mxf_version
    }

    /// The essence wrapping type.
    pub fn wrapping_type(&self) -> WrappingType {
        self.wrapping_type
    }

    /// The clip edit rate.
    pub fn edit_rate(&self) -> Rational {
        self.edit_rate
    }

    /// Clip duration in clip edit units; negative when unknown.
    pub fn duration(&self) -> i64 {
        self.duration
    }

    /// Clip origin (precharge already on disk) in clip edit units.
    pub fn origin(&self) -> i64 {
        self.origin
    }

    /// The essence stream id.
    pub fn body_sid(&self) -> u32 {
        self.body_sid
    }

    /// The index stream id.
    pub fn index_sid(&self) -> u32 {
        self.index_sid
    }

    /// The material package UMID.
    pub fn material_package_uid(&self) -> Umid {
        self.material_package_uid
    }

    /// The material package name, when present.
    pub fn material_package_name(&self) -> Option<&str> {
        self.material_package_name.as_deref()
    }

    /// Start timecode from the material package.
    pub fn material_start_timecode(&self) -> Option<Timecode> {
        self.material_start_timecode
    }

    /// Start timecode from the file source package.
    pub fn file_source_start_timecode(&self) -> Option<Timecode> {
        self.file_source_start_timecode
    }

    /// Start timecode from the physical source package.
    pub fn physical_source_start_timecode(&self) -> Option<Timecode> {
        self.physical_source_start_timecode
    }

    /// Auxiliary physical-source timecodes from Avid track slots.
    pub fn avid_aux_timecodes(&self) -> &[Option<Timecode>] {
        &self.avid_aux_timecodes
    }

    /// The physical source package name, when present.
    pub fn physical_source_package_name(&self) -> Option<&str> {
        self.physical_source_package_name.as_deref()
    }

    /// Text objects from material-package static DM tracks, this file's
    /// first.
    pub fn text_objects(&self) -> &[TextObject] {
        &self.text_objects
    }

    /// Number of clip tracks.
    pub fn track_count(&self) -> usize {
        self.track_order.len()
    }

    /// Descriptor record of a clip track.
    pub fn track_info(&self, index: usize) -> Option<&TrackInfo> {
        match *self.track_order.get(index)? {
            TrackSlot::Internal(i) => Some(self.internal_track_readers[i].info()),
            TrackSlot::External { file_id, track_index } => {
                let resolver = self.resolver.as_ref()?;
                Some(resolver.external_reader(file_id)?.internal_track_readers[track_index].info())
            }
        }
    }

    /// Whether a clip track participates in reads.
    pub fn is_track_enabled(&self, index: usize) -> Option<bool> {
        match *self.track_order.get(index)? {
            TrackSlot::Internal(i) => Some(self.internal_track_readers[i].is_enabled()),
            TrackSlot::External { file_id, track_index } => {
                let resolver = self.resolver.as_ref()?;
                Some(
                    resolver.external_reader(file_id)?.internal_track_readers[track_index]
                        .is_enabled(),
                )
            }
        }
    }

    /// Enable or disable a clip track.
    pub fn set_track_enabled(&mut self, index: usize, enabled: bool) {
        match self.track_order.get(index) {
            Some(&TrackSlot::Internal(i)) => self.internal_track_readers[i].set_enabled(enabled),
            Some(&TrackSlot::External { file_id, track_index }) => {
                if let Some(resolver) = self.resolver.as_mut() {
                    if let Some(reader) = resolver.external_reader_mut(file_id) {
                        reader.internal_track_readers[track_index].set_enabled(enabled);
                    }
                }
            }
            None => {}
        }
    }

    /// Pop the oldest committed frame of a clip track.
    pub fn take_frame(&mut self, index: usize) -> Option<Frame> {
        match *self.track_order.get(index)? {
            TrackSlot::Internal(i) => self.internal_track_readers[i].frame_buffer_mut().pop_frame(),
            TrackSlot::External { file_id, track_index } => self
                .resolver
                .as_mut()?
                .external_reader_mut(file_id)?
                .internal_track_readers[track_index]
                .frame_buffer_mut()
                .pop_frame(),
        }
    }

    /// Whether any clip track is enabled.
    pub fn is_enabled(&self) -> bool {
        (0..self.track_count()).any(|i| self.is_track_enabled(i).unwrap_or(false))
    }

    /// Whether all contributor durations are known.
    pub fn is_complete(&self) -> bool {
        if self.duration < 0 {
            return false;
        }
        if let Some(essence_reader) = self.essence_reader.as_ref() {
            if !essence_reader.is_complete() {
                return false;
            }
        }
        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                match resolver.external_reader(slot.file_id) {
                    Some(reader) if reader.is_complete() => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Whether every contributor supports seeking.
    pub fn is_seekable(&self) -> bool {
        if self.essence_reader.is_some() && !self.file.is_seekable() {
            return false;
        }
        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                match resolver.external_reader(slot.file_id) {
                    Some(reader) if reader.is_seekable() => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Whether the last read failed.
    pub fn read_error(&self) -> bool {
        self.read_error
    }

    /// The failure message of the last read.
    pub fn read_error_message(&self) -> &str {
        &self.read_error_message
    }

    // ---- read / seek / position -----------------------------------------

    /// Current clip position.
    pub fn position(&self) -> i64 {
        if self.internal_is_enabled() {
            if let Some(essence_reader) = self.essence_reader.as_ref() {
                return self.from_essence_position(essence_reader.position());
            }
        }
        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                let reader = match resolver.external_reader(slot.file_id) {
                    Some(reader) => reader,
                    None => continue,
                };
                if reader.is_enabled() {
                    return slot.sequence.to_lower_position(reader.position());
                }
            }
        }
        0
    }

    /// Read up to `num_samples` clip edit units into the track frame
    /// buffers. Returns the number read; 0 with `read_error` set on
    /// failure, in which case the position is restored.
    pub fn read(&mut self, num_samples: u32) -> u32 {
        self.read_samples(num_samples, true)
    }

    pub(crate) fn read_samples(&mut self, num_samples: u32, is_top: bool) -> u32 {
        self.read_error = false;
        self.read_error_message.clear();

        if self.require_frame_info_count > 0 {
            self.extract_frame_info();
            if self.require_frame_info_count > 0 {
                self.read_error = true;
                self.read_error_message = "Failed to extract information from frame(s)".into();
                return 0;
            }
        }

        let current_position = self.position();

        self.for_each_enabled_buffer(|buffer| buffer.start_read());

        match self.read_inner(num_samples, current_position, is_top) {
            Ok(max_num_read) => {
                debug_assert!(max_num_read <= num_samples);
                self.for_each_enabled_buffer(|buffer| buffer.complete_read());
                max_num_read
            }
            Err(e) => {
                self.read_error = true;
                self.read_error_message = e.to_string();
                self.for_each_enabled_buffer(|buffer| buffer.abort_read());
                if let Err(seek_error) = self.seek(current_position) {
                    log::error!("Failed to restore position after read error: {}", seek_error);
                }
                0
            }
        }
    }

    fn read_inner(&mut self, num_samples: u32, current_position: i64, is_top: bool) -> Result<u32> {
        if is_top {
            let edit_rate = self.edit_rate;
            self.for_each_enabled_buffer(|buffer| {
                buffer.set_next_frame_position(edit_rate, current_position)
            });
            self.set_next_frame_track_positions();
        }

        let mut max_num_read = 0u32;
        if self.internal_is_enabled() {
            if let Some(essence_reader) = self.essence_reader.as_mut() {
                max_num_read = essence_reader.read(
                    &mut self.file,
                    &mut self.internal_track_readers,
                    num_samples,
                    self.file_origin,
                )?;
            }
        }

        for slot_index in 0..self.externals.len() {
            let (file_id, external_position, num_external) = {
                let slot = &self.externals[slot_index];
                (
                    slot.file_id,
                    slot.sequence.to_higher_position(current_position),
                    slot.sequence.to_higher_duration(num_samples as i64, current_position) as u32,
                )
            };

            let resolver = self
                .resolver
                .as_mut()
                .ok_or_else(|| MxfError::other("External reader without a resolver"))?;
            let reader = resolver
                .external_reader_mut(file_id)
                .ok_or_else(|| MxfError::other("External reader disappeared"))?;
            if !reader.is_enabled() {
                continue;
            }

            // keep the external reader in sync
            if reader.position() != external_position {
                reader.seek(external_position)?;
            }

            let external_num_read = reader.read_samples(num_external, false);
            if external_num_read < num_external && reader.read_error() {
                return Err(MxfError::other(reader.read_error_message().to_string()));
            }

            let internal_num_read = self.externals[slot_index]
                .sequence
                .to_lower_duration(external_num_read as i64, external_position)
                as u32;
            if internal_num_read > max_num_read {
                max_num_read = internal_num_read;
            }
        }

        Ok(max_num_read)
    }

    /// Seek to a clip position.
    pub fn seek(&mut self, position: i64) -> Result<()> {
        if self.internal_is_enabled() {
            let essence_position = self.to_essence_position(position);
            if let Some(essence_reader) = self.essence_reader.as_mut() {
                essence_reader.seek(&mut self.file, essence_position)?;
            }
        }

        for slot_index in 0..self.externals.len() {
            let (file_id, external_position) = {
                let slot = &self.externals[slot_index];
                (slot.file_id, slot.sequence.to_higher_position(position))
            };
            if let Some(resolver) = self.resolver.as_mut() {
                if let Some(reader) = resolver.external_reader_mut(file_id) {
                    if reader.is_enabled() {
                        reader.seek(external_position)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// The read limits: start position and duration covering precharge and
    /// rollout. Only available when the clip is complete.
    pub fn read_limits(&self, limit_to_available: bool) -> Result<(i64, i64)> {
        self.check_complete()?;
        let precharge = self.max_precharge(0, limit_to_available)? as i64;
        let rollout = self.max_rollout(self.duration - 1, limit_to_available)? as i64;
        Ok((precharge, -precharge + self.duration + rollout))
    }

    /// Restrict reads to `[start, start + duration)` and optionally seek to
    /// the start.
    pub fn set_read_limits(&mut self, start: i64, duration: i64, seek_to_start: bool) -> Result<()> {
        self.read_start_position = start;
        self.read_duration = duration;

        if self.internal_is_enabled() {
            let essence_start = self.to_essence_position(start);
            if let Some(essence_reader) = self.essence_reader.as_mut() {
                essence_reader.set_read_limits(essence_start, duration);
            }
        }

        for slot_index in 0..self.externals.len() {
            let (file_id, external_start, external_duration) = {
                let slot = &self.externals[slot_index];
                let external_start = slot.sequence.to_higher_position(start);
                let external_duration = if duration == 0 {
                    0
                } else {
                    slot.sequence.to_higher_position(start + duration) - external_start
                };
                (slot.file_id, external_start, external_duration)
            };
            if let Some(resolver) = self.resolver.as_mut() {
                if let Some(reader) = resolver.external_reader_mut(file_id) {
                    if reader.is_enabled() {
                        reader.set_read_limits(external_start, external_duration, false)?;
                    }
                }
            }
        }

        if seek_to_start {
            self.seek(start)?;
        }
        Ok(())
    }

    // ---- precharge / rollout --------------------------------------------

    /// Required precharge before `position`, or the available precharge
    /// when `limit_to_available`.
    pub fn max_precharge(&self, position: i64, limit_to_available: bool) -> Result<i16> {
        self.check_complete()?;

        let mut max_start_position = i64::MIN;
        let mut precharge: i64 = 0;
        if self.internal_is_enabled() {
            precharge = self.internal_precharge(position, limit_to_available)? as i64;
            if limit_to_available {
                let (start, _) = self.internal_available_read_limits()?;
                max_start_position = start;
            }
        }

        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                let reader = match resolver.external_reader(slot.file_id) {
                    Some(reader) if reader.is_enabled() => reader,
                    _ => continue,
                };
                let external_position = slot.sequence.to_higher_position(position);
                let external_precharge =
                    reader.max_precharge(external_position, limit_to_available)? as i64;
                if external_precharge != 0 {
                    if reader.edit_rate() != self.edit_rate {
                        log::warn!(
                            "Ignoring precharge of external reader whose edit rate differs from the clip edit rate"
                        );
                    } else if external_precharge < precharge {
                        precharge = external_precharge;
                    }
                }

                if limit_to_available {
                    let (external_start, _) = reader.read_limits(true)?;
                    let internal_start = slot.sequence.to_lower_position(external_start);
                    if internal_start > max_start_position {
                        max_start_position = internal_start;
                    }
                }
            }
        }

        if limit_to_available && precharge < max_start_position - position {
            precharge = max_start_position - position;
        }

        Ok(if precharge < 0 { precharge as i16 } else { 0 })
    }

    /// The available precharge before `position` regardless of coding.
    pub fn max_available_precharge(&self, position: i64) -> Result<i64> {
        self.check_complete()?;

        let mut max_available_precharge: i64 = 0;
        if self.internal_is_enabled() {
            if let Some(essence_reader) = self.essence_reader.as_ref() {
                let available =
                    self.from_essence_position(essence_reader.legitimise_position(0)) - position;
                max_available_precharge = available.min(0);
            }
        }

        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                let reader = match resolver.external_reader(slot.file_id) {
                    Some(reader) if reader.is_enabled() => reader,
                    _ => continue,
                };
                let external_available =
                    reader.max_available_precharge(slot.sequence.to_higher_position(position))?;
                if external_available != 0 {
                    if reader.edit_rate() != self.edit_rate {
                        log::warn!(
                            "Ignoring available precharge of external reader whose edit rate differs from the clip edit rate"
                        );
                    } else if external_available < max_available_precharge {
                        max_available_precharge = external_available;
                    }
                }
            }
        }

        Ok(max_available_precharge)
    }

    /// Required rollout after `position`, or the available rollout when
    /// `limit_to_available`.
    pub fn max_rollout(&self, position: i64, limit_to_available: bool) -> Result<i16> {
        self.check_complete()?;

        let mut min_end_position = i64::MAX;
        let mut rollout: i64 = 0;
        if self.internal_is_enabled() {
            rollout = self.internal_rollout(position, limit_to_available)? as i64;
            if limit_to_available {
                let (start, duration) = self.internal_available_read_limits()?;
                min_end_position = start + duration;
            }
        }

        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                let reader = match resolver.external_reader(slot.file_id) {
                    Some(reader) if reader.is_enabled() => reader,
                    _ => continue,
                };
                let external_position = slot.sequence.to_higher_position(position + 1) - 1;
                let external_rollout = reader.max_rollout(external_position, limit_to_available)? as i64;
                if external_rollout != 0 {
                    if reader.edit_rate() != self.edit_rate {
                        log::warn!(
                            "Ignoring rollout of external reader whose edit rate differs from the clip edit rate"
                        );
                    } else if external_rollout > rollout {
                        rollout = external_rollout;
                    }
                }

                if limit_to_available {
                    let (external_start, external_duration) = reader.read_limits(true)?;
                    let internal_end = slot
                        .sequence
                        .to_lower_duration(external_start + external_duration, 0);
                    if internal_end < min_end_position {
                        min_end_position = internal_end;
                    }
                }
            }
        }

        if limit_to_available && rollout > min_end_position - position {
            rollout = min_end_position - position;
        }

        Ok(if rollout > 0 { rollout as i16 } else { 0 })
    }

    /// The available rollout after `position` regardless of coding.
    pub fn max_available_rollout(&self, position: i64) -> Result<i64> {
        self.check_complete()?;

        let mut max_available_rollout: i64 = 0;
        if self.internal_is_enabled() {
            if let Some(essence_reader) = self.essence_reader.as_ref() {
                let available =
                    self.from_essence_position(essence_reader.legitimise_position(i64::MAX)) - position;
                max_available_rollout = available.max(0);
            }
        }

        if let Some(resolver) = self.resolver.as_ref() {
            for slot in &self.externals {
                let reader = match resolver.external_reader(slot.file_id) {
                    Some(reader) if reader.is_enabled() => reader,
                    _ => continue,
                };
                let external_available = reader
                    .max_available_rollout(slot.sequence.to_higher_position(position + 1) - 1)?;
                if external_available != 0 {
                    if reader.edit_rate() != self.edit_rate {
                        log::warn!(
                            "Ignoring available rollout of external reader whose edit rate differs from the clip edit rate"
                        );
                    } else if external_available > max_available_rollout {
                        max_available_rollout = external_available;
                    }
                }
            }
        }

        Ok(max_available_rollout)
    }

    /// The lead filler offset shared by all tracks, or 0 when they
    /// disagree.
    pub fn fixed_lead_filler_offset(&self) -> i64 {
        let mut fixed_offset = 0;
        for (index, slot) in self.track_order.iter().enumerate() {
            let info = match *slot {
                TrackSlot::Internal(i) => self.internal_track_readers[i].info(),
                TrackSlot::External { .. } => match self.track_info(index) {
                    Some(info) => info,
                    None => continue,
                },
            };
            let common = info.common();
            let offset = convert_position(
                common.edit_rate,
                common.lead_filler_offset,
                self.edit_rate,
                Rounding::Up,
            );
            if index == 0 {
                fixed_offset = offset;
            } else if fixed_offset != offset {
                return 0;
            }
        }
        fixed_offset
    }

    /// Cap the clip duration, e.g. to a parent clip's duration.
    pub(crate) fn force_duration(&mut self, duration: i64) -> Result<()> {
        if duration > self.duration {
            return Err(MxfError::other(format!(
                "Cannot force duration {} beyond the clip duration {}",
                duration, self.duration
            )));
        }
        self.duration = duration;
        Ok(())
    }

    // ---- internal helpers ------------------------------------------------

    fn to_essence_position(&self, position: i64) -> i64 {
        position + self.file_origin
    }

    fn from_essence_position(&self, position: i64) -> i64 {
        position - self.file_origin
    }

    fn check_complete(&self) -> Result<()> {
        if !self.is_complete() {
            return Err(MxfError::other(
                "Operation requires a complete file with known durations",
            ));
        }
        Ok(())
    }

    fn internal_is_enabled(&self) -> bool {
        self.internal_track_readers.iter().any(|t| t.is_enabled())
    }

    fn have_inter_frame_encoding_track(&self) -> bool {
        self.internal_track_readers
            .iter()
            .filter(|t| t.is_enabled())
            .any(|t| t.info().common().essence_type.is_inter_frame_coded())
    }

    fn internal_index_entry(&self, position: i64) -> Option<IndexEntry> {
        let essence_reader = self.essence_reader.as_ref()?;
        essence_reader.index_entry(self.to_essence_position(position))
    }

    fn internal_precharge(&self, position: i64, limit_to_available: bool) -> Result<i16> {
        let essence_reader = match self.essence_reader.as_ref() {
            Some(essence_reader) => essence_reader,
            None => return Ok(0),
        };
        if !self.have_inter_frame_encoding_track() {
            return Ok(0);
        }

        // no precharge when the target position is outside the essence range
        let legitimate =
            self.from_essence_position(essence_reader.legitimise_position(self.to_essence_position(position)));
        if legitimate != position {
            return Ok(0);
        }

        let mut precharge: i64 = 0;
        if let Some(entry) = self.internal_index_entry(position) {
            if entry.temporal_offset != 0 {
                if let Some(anchor) = self.internal_index_entry(position + entry.temporal_offset as i64) {
                    precharge = entry.temporal_offset as i64 + anchor.key_frame_offset as i64;
                }
            } else {
                precharge = entry.key_frame_offset as i64;
            }
        }

        if precharge > 0 {
            log::warn!("Unexpected positive precharge value {}", precharge);
        } else if precharge < 0 && limit_to_available {
            precharge = self.from_essence_position(
                essence_reader.legitimise_position(self.to_essence_position(position + precharge)),
            ) - position;
        }

        Ok(if precharge < 0 { precharge as i16 } else { 0 })
    }

    fn internal_rollout(&self, position: i64, limit_to_available: bool) -> Result<i16> {
        let essence_reader = match self.essence_reader.as_ref() {
            Some(essence_reader) => essence_reader,
            None => return Ok(0),
        };
        if !self.have_inter_frame_encoding_track() {
            return Ok(0);
        }

        let legitimate =
            self.from_essence_position(essence_reader.legitimise_position(self.to_essence_position(position)));
        if legitimate != position {
            return Ok(0);
        }

        let mut rollout: i64 = 0;
        if let Some(entry) = self.internal_index_entry(position) {
            if entry.temporal_offset > 0 {
                rollout = entry.temporal_offset as i64;
            }
        }

        if rollout > 0 && limit_to_available {
            rollout = self.from_essence_position(
                essence_reader.legitimise_position(self.to_essence_position(position + rollout)),
            ) - position;
        }

        Ok(if rollout > 0 { rollout as i16 } else { 0 })
    }

    fn internal_available_read_limits(&self) -> Result<(i64, i64)> {
        let precharge = self.internal_precharge(0, true)? as i64;
        let rollout = self.internal_rollout(self.duration - 1, true)? as i64;
        Ok((precharge, -precharge + self.duration + rollout))
    }

    fn for_each_enabled_buffer(&mut self, mut apply: impl FnMut(&mut crate::frame::FrameBuffer)) {
        for slot_index in 0..self.track_order.len() {
            match self.track_order[slot_index] {
                TrackSlot::Internal(i) => {
                    if self.internal_track_readers[i].is_enabled() {
                        apply(self.internal_track_readers[i].frame_buffer_mut());
                    }
                }
                TrackSlot::External { file_id, track_index } => {
                    if let Some(resolver) = self.resolver.as_mut() {
                        if let Some(reader) = resolver.external_reader_mut(file_id) {
                            let track = &mut reader.internal_track_readers[track_index];
                            if track.is_enabled() {
                                apply(track.frame_buffer_mut());
                            }
                        }
                    }
                }
            }
        }
    }

    fn set_next_frame_track_positions(&mut self) {
        for slot_index in 0..self.track_order.len() {
            match self.track_order[slot_index] {
                TrackSlot::Internal(i) => {
                    let position = self
                        .essence_reader
                        .as_ref()
                        .map(|r| self.from_essence_position(r.position()))
                        .unwrap_or(0);
                    let track = &mut self.internal_track_readers[i];
                    if track.is_enabled() {
                        track.frame_buffer_mut().set_next_frame_track_position(position);
                    }
                }
                TrackSlot::External { file_id, track_index } => {
                    if let Some(resolver) = self.resolver.as_mut() {
                        if let Some(reader) = resolver.external_reader_mut(file_id) {
                            let position = reader.position();
                            let track = &mut reader.internal_track_readers[track_index];
                            if track.is_enabled() {
                                track.frame_buffer_mut().set_next_frame_track_position(position);
                            }
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn internal_track_index_by_id(&self, track_id: u32) -> Option<usize> {
        self.internal_track_readers
            .iter()
            .position(|t| t.info().common().file_track_id == track_id)
    }

    // ---- open pipeline: metadata processing ------------------------------

    fn process_metadata(
        &mut self,
        resolver: &mut dyn PackageResolver,
        header_partition: &PartitionPack,
    ) -> Result<()> {
        self.mxf_version = self.metadata.preface()?.version;

        resolver.extract_packages(self.file_id, &self.metadata);

        let material_package = self
            .metadata
            .material_package()
            .ok_or_else(|| MxfError::InvalidHeaderMetadata("No material package".into()))?;
        {
            let package = self.metadata.package(material_package).ok_or_else(|| {
                MxfError::InvalidHeaderMetadata("Material package set malformed".into())
            })?;
            self.material_package_uid = package.package_uid;
            self.material_package_name = package.name.clone();
        }

        if self.metadata.file_source_packages().is_empty() {
            log::error!("No source package with known file descriptor found in file");
            return Err(MxfError::NotSupported(
                "File without a file source package".into(),
            ));
        }

        let mut skipped_track_count = 0u32;
        let mut infile_mp_track: Option<SetId> = None;
        let mut external_file_ids: Vec<FileId> = Vec::new();

        let mp_track_sets = self.metadata.package_tracks(material_package);
        for mp_track_set in mp_track_sets {
            let (data_def, mp_track_id, mp_track_number, mp_edit_rate, mp_track_origin, components) = {
                let track = match self.metadata.track(mp_track_set) {
                    Some(track) if track.is_timeline => track.clone(),
                    _ => continue,
                };
                let (data_def_label, _, components) = match self.metadata.track_sequence(&track) {
                    Some(sequence) => sequence,
                    None => continue,
                };
                let data_def = DataDef::from_label(&data_def_label);
                (
                    data_def,
                    track.track_id,
                    track.track_number,
                    track.edit_rate,
                    track.origin,
                    components,
                )
            };

            if !matches!(data_def, DataDef::Picture | DataDef::Sound | DataDef::Data) {
                continue;
            }
            if mp_track_id.is_none() {
                log::warn!("Material track does not have a TrackID property");
            }
            let mp_track_id = mp_track_id.unwrap_or(0);
            if mp_track_origin != 0 {
                return Err(MxfError::InvalidHeaderMetadata(
                    "Material package track with non-zero origin".into(),
                ));
            }

            // find the source clip, accumulating leading filler
            let mut lead_filler_offset = 0i64;
            let mut mp_source_clip: Option<SetId> = None;
            for component_uid in &components {
                let component_id = match self.metadata.resolve(component_uid) {
                    Some(id) => id,
                    None => continue,
                };
                if self.metadata.source_clip(component_id).is_some() {
                    mp_source_clip = Some(component_id);
                    break;
                } else if let Some(filler) = self.metadata.filler(component_id) {
                    // leading filler, e.g. clips spanning multiple cards or a
                    // timed text start offset
                    lead_filler_offset += filler.duration.unwrap_or(0);
                } else if let Some(group) = self.metadata.essence_group(component_id) {
                    let choices = group.choices.clone();
                    if choices.is_empty() {
                        return Err(MxfError::InvalidHeaderMetadata(
                            "0 Choices found in EssenceGroup".into(),
                        ));
                    }
                    let first_choice = self.metadata.resolve(&choices[0]);
                    match first_choice {
                        Some(choice_id) if self.metadata.source_clip(choice_id).is_some() => {
                            if choices.len() > 1 {
                                log::warn!(
                                    "Using the first SourceClip in EssenceGroup containing multiple choices"
                                );
                            }
                            mp_source_clip = Some(choice_id);
                            break;
                        }
                        _ => {
                            log::error!("EssenceGroup choice that is not a SourceClip is not supported");
                            return Err(MxfError::NotSupported(
                                "EssenceGroup choice that is not a SourceClip".into(),
                            ));
                        }
                    }
                } else {
                    log::error!("StructuralComponent in Sequence is not a SourceClip, Filler or EssenceGroup");
                    return Err(MxfError::NotSupported(
                        "Unexpected structural component in material track sequence".into(),
                    ));
                }
            }
            let mp_source_clip = match mp_source_clip {
                Some(id) => id,
                None => {
                    log::warn!(
                        "Skipping material package track {} which has no SourceClip",
                        mp_track_id
                    );
                    skipped_track_count += 1;
                    continue;
                }
            };

            let clip = self
                .metadata
                .source_clip(mp_source_clip)
                .cloned()
                .unwrap_or_default();

            // a non-zero start position marks re-encoded leading frames and
            // is equivalent to file package origin; only known from OP-Atom
            if clip.start_position != 0 {
                if clip.start_position < 0 {
                    log::error!("A negative material package source clip StartPosition is not supported");
                    return Err(MxfError::NotSupported(
                        "Negative material package SourceClip StartPosition".into(),
                    ));
                }
                if !self.op_label.is_op_atom() {
                    log::error!(
                        "Non-zero material package source clip StartPosition is only supported in OP-Atom files"
                    );
                    return Err(MxfError::NotSupported(
                        "Non-zero material package SourceClip StartPosition outside OP-Atom".into(),
                    ));
                }
            }

            let clip_ref = SourceClipRef {
                source_package_uid: clip.source_package_id,
                source_track_id: clip.source_track_id,
            };
            let resolved_packages = resolver.resolve_source_clip(self.file_id, &clip_ref);
            if resolved_packages.is_empty() {
                skipped_track_count += 1;
                continue;
            }

            // require the top level file source package to be described in
            // this file
            let resolved = match resolved_packages
                .iter()
                .find(|p| p.is_file_source_package && p.file_id == self.file_id)
            {
                Some(resolved) => *resolved,
                None => {
                    log::error!("An external top level file source package is not supported");
                    return Err(MxfError::NotSupported(
                        "External top level file source package".into(),
                    ));
                }
            };

            // material and file source track data definitions must match
            let fsp_data_def = {
                let track = self.metadata.track(resolved.track);
                track
                    .and_then(|t| self.metadata.track_sequence(t))
                    .map(|(label, _, _)| DataDef::from_label(&label))
            };
            if fsp_data_def != Some(data_def) {
                log::error!(
                    "Material package track {} data def does not match referenced file source package track {} data def",
                    mp_track_id,
                    resolved.track_id
                );
                return Err(MxfError::InvalidFile(
                    "Material and file source package track data definitions differ".into(),
                ));
            }

            if resolved.external_essence {
                let external = self.create_external_track_reader(resolver, &clip_ref, resolved.package)?;
                let (ext_file_id, ext_track_index) = match external {
                    Some(found) => found,
                    None => {
                        skipped_track_count += 1;
                        continue;
                    }
                };

                // reparent the external track's material identity to this
                // file's material package
                let material_package_uid = self.material_package_uid;
                let mp_duration = clip.duration.unwrap_or(-1);
                if let Some(reader) = resolver.external_reader_mut(ext_file_id) {
                    let info = reader.internal_track_readers[ext_track_index].info_mut();
                    let common = info.common_mut();
                    common.material_package_uid = material_package_uid;
                    common.material_track_id = mp_track_id;
                    common.material_track_number = mp_track_number;
                    common.edit_rate = mp_edit_rate;
                    common.duration = mp_duration;
                    common.lead_filler_offset = lead_filler_offset;
                }

                self.override_external_mca_labels(resolver, resolved, ext_file_id, ext_track_index)?;

                if !external_file_ids.contains(&ext_file_id) {
                    external_file_ids.push(ext_file_id);
                }
                self.external_track_refs.push((ext_file_id, ext_track_index));
                self.track_order.push(TrackSlot::External {
                    file_id: ext_file_id,
                    track_index: ext_track_index,
                });
            } else {
                let track_index = match self.create_internal_track_reader(
                    resolver,
                    header_partition,
                    data_def,
                    mp_track_id,
                    mp_track_number,
                    mp_edit_rate,
                    &clip,
                    &resolved,
                )? {
                    Some(index) => index,
                    None => {
                        log::warn!("Skipping material package track {}", mp_track_id);
                        skipped_track_count += 1;
                        continue;
                    }
                };
                self.internal_track_readers[track_index]
                    .info_mut()
                    .common_mut()
                    .lead_filler_offset = lead_filler_offset;
                self.track_order.push(TrackSlot::Internal(track_index));
            }

            if infile_mp_track.is_none() {
                infile_mp_track = Some(mp_track_set);
            }
        }

        if self.track_order.is_empty() {
            if skipped_track_count > 0 {
                log::warn!(
                    "Skipped {} material package tracks whilst processing header metadata",
                    skipped_track_count
                );
            }
            return Err(MxfError::NoEssence);
        }

        self.post_process_lead_filler(resolver)?;

        // set the clip edit rate when there are no internal essence tracks:
        // the lowest external edit rate
        if self.edit_rate.is_zero() {
            let mut lowest: Option<Rational> = None;
            for index in 0..self.track_order.len() {
                if let TrackSlot::External { file_id, track_index } = self.track_order[index] {
                    if let Some(reader) = resolver.external_reader(file_id) {
                        let rate = reader.internal_track_readers[track_index]
                            .info()
                            .common()
                            .edit_rate;
                        if lowest.map_or(true, |l| rate < l) {
                            lowest = Some(rate);
                        }
                    }
                }
            }
            self.edit_rate = lowest.ok_or_else(|| {
                MxfError::InvalidHeaderMetadata("Clip edit rate could not be determined".into())
            })?;
        }

        self.sort_track_order(resolver);

        self.extract_start_timecodes(infile_mp_track)?;

        self.discover_stream_ids()?;

        // disable external tracks that no material track references
        for &file_id in &external_file_ids {
            if let Some(reader) = resolver.external_reader_mut(file_id) {
                for track_index in 0..reader.internal_track_readers.len() {
                    let used = self
                        .external_track_refs
                        .iter()
                        .any(|&(f, t)| f == file_id && t == track_index);
                    if !used {
                        reader.internal_track_readers[track_index].set_enabled(false);
                    }
                }
            }
        }

        // sample sequences for every external reader
        for &file_id in &external_file_ids {
            let external_rate = resolver
                .external_reader(file_id)
                .map(|reader| reader.edit_rate())
                .ok_or_else(|| MxfError::other("External reader disappeared"))?;
            let sequence = SampleSequence::derive(self.edit_rate, external_rate).map_err(|_| {
                log::error!(
                    "Externally referenced file's edit rate {} is incompatible with clip edit rate {}",
                    external_rate,
                    self.edit_rate
                );
                MxfError::NotSupported("Incompatible external edit rate".into())
            })?;
            self.externals.push(ExternalSlot { file_id, sequence });
        }

        self.compute_duration_and_origin(resolver)?;
        self.apply_forced_durations(resolver)?;

        self.extract_text_objects(resolver);

        Ok(())
    }

    fn post_process_lead_filler(&mut self, resolver: &mut dyn PackageResolver) -> Result<()> {
        let all_timed_text = (0..self.track_order.len()).all(|index| match self.track_order[index] {
            TrackSlot::Internal(i) => self.internal_track_readers[i].is_timed_text(),
            TrackSlot::External { .. } => false,
        });

        // a clip-wide fixed offset stays as-is; otherwise only timed text
        // tracks may carry lead filler, which is folded into their duration
        if self.fixed_lead_filler_offset_with(resolver) != 0 && !all_timed_text {
            return Ok(());
        }

        for index in 0..self.track_order.len() {
            let slot = self.track_order[index];
            let track = match slot {
                TrackSlot::Internal(i) => &mut self.internal_track_readers[i],
                TrackSlot::External { file_id, track_index } => {
                    let reader = resolver
                        .external_reader_mut(file_id)
                        .ok_or_else(|| MxfError::other("External reader disappeared"))?;
                    &mut reader.internal_track_readers[track_index]
                }
            };
            let lead_filler_offset = track.info().common().lead_filler_offset;
            if lead_filler_offset <= 0 {
                continue;
            }
            if !track.is_timed_text() {
                log::error!("A non-timed text track has lead Filler that differs from other tracks");
                return Err(MxfError::NotSupported(
                    "Lead filler on a non-timed-text track disagreeing with other tracks".into(),
                ));
            }
            let info = track.info_mut();
            if let Some(data) = info.as_data_mut() {
                if let Some(manifest) = data.timed_text_manifest.as_mut() {
                    manifest.start = lead_filler_offset;
                }
            }
            let common = info.common_mut();
            common.duration += common.lead_filler_offset;
            common.lead_filler_offset = 0;
        }
        Ok(())
    }

    /// `fixed_lead_filler_offset` over a resolver parameter, usable during
    /// the open pipeline before the resolver is attached.
    fn fixed_lead_filler_offset_with(&self, resolver: &dyn PackageResolver) -> i64 {
        let mut fixed_offset = 0;
        let clip_rate = if self.edit_rate.is_zero() {
            None
        } else {
            Some(self.edit_rate)
        };
        for (index, slot) in self.track_order.iter().enumerate() {
            let common = match *slot {
                TrackSlot::Internal(i) => self.internal_track_readers[i].info().common().clone(),
                TrackSlot::External { file_id, track_index } => match resolver.external_reader(file_id) {
                    Some(reader) => reader.internal_track_readers[track_index].info().common().clone(),
                    None => continue,
                },
            };
            let offset = match clip_rate {
                Some(rate) => convert_position(common.edit_rate, common.lead_filler_offset, rate, Rounding::Up),
                None => common.lead_filler_offset,
            };
            if index == 0 {
                fixed_offset = offset;
            } else if fixed_offset != offset {
                return 0;
            }
        }
        fixed_offset
    }

    fn sort_track_order(&mut self, resolver: &dyn PackageResolver) {
        let mut keyed: Vec<((DataDef, u64, u64), TrackSlot)> = Vec::with_capacity(self.track_order.len());
        for &slot in &self.track_order {
            let common = match slot {
                TrackSlot::Internal(i) => self.internal_track_readers[i].info().common(),
                TrackSlot::External { file_id, track_index } => match resolver.external_reader(file_id) {
                    Some(reader) => reader.internal_track_readers[track_index].info().common(),
                    None => continue,
                },
            };
            // 0 sorts last for both the track number and the track id
            let number_key = if common.material_track_number == 0 {
                u64::MAX
            } else {
                common.material_track_number as u64
            };
            let id_key = if common.material_track_id == 0 {
                u64::MAX
            } else {
                common.material_track_id as u64
            };
            keyed.push(((common.data_def, number_key, id_key), slot));
        }
        keyed.sort_by_key(|(key, _)| *key);
        self.track_order = keyed.into_iter().map(|(_, slot)| slot).collect();
    }

    #[allow(clippy::too_many_arguments)]
    fn create_internal_track_reader(
        &mut self,
        resolver: &mut dyn PackageResolver,
        header_partition: &PartitionPack,
        data_def: DataDef,
        mp_track_id: u32,
        mp_track_number: u32,
        mp_edit_rate: Rational,
        clip: &crate::metadata::SourceClip,
        resolved: &ResolvedPackage,
    ) -> Result<Option<usize>> {
        let fsp_track = self
            .metadata
            .track(resolved.track)
            .cloned()
            .ok_or_else(|| MxfError::InvalidHeaderMetadata("File source track malformed".into()))?;

        // set or check the clip edit rate
        let fsp_edit_rate = fsp_track.edit_rate;
        if self.edit_rate.is_zero() {
            self.edit_rate = fsp_edit_rate;
        } else if self.edit_rate != fsp_edit_rate {
            return Err(MxfError::InvalidHeaderMetadata(format!(
                "FSP track edit rate {} does not match existing edit rate {}",
                fsp_edit_rate, self.edit_rate
            )));
        }

        // track origin is precharge already on disk
        let mut origin = fsp_track.origin;
        if origin < 0 {
            log::error!(
                "Negative track origin {} in top-level file Source Package not supported",
                origin
            );
            return Err(MxfError::NotSupported("Negative file source track origin".into()));
        }
        if clip.start_position > 0 {
            origin += convert_position(mp_edit_rate, clip.start_position, fsp_edit_rate, Rounding::Auto);
        }

        let descriptor_id = match self.metadata.package_descriptor(resolved.package) {
            Some(id) => id,
            None => {
                log::warn!(
                    "Failed to find file descriptor for source package track {}",
                    resolved.track_id
                );
                return Ok(None);
            }
        };

        self.index_mca_labels(resolver, descriptor_id)?;

        let file_descriptor_id = match self
            .metadata
            .file_descriptor_for_track(descriptor_id, resolved.track_id)
        {
            Some(id) => id,
            None => {
                log::warn!(
                    "Failed to find file descriptor for source package track {}",
                    resolved.track_id
                );
                return Ok(None);
            }
        };

        let file_package_uid = self
            .metadata
            .package(resolved.package)
            .map(|p| p.package_uid)
            .unwrap_or_else(Umid::zero);

        let mut common = crate::track::TrackInfoCommon {
            material_package_uid: self.material_package_uid,
            material_track_id: mp_track_id,
            material_track_number: mp_track_number,
            file_package_uid,
            file_track_id: fsp_track.track_id.unwrap_or(0),
            file_track_number: fsp_track.track_number,
            edit_rate: mp_edit_rate,
            duration: clip.duration.unwrap_or(-1),
            lead_filler_offset: 0,
            essence_container_label: Ul::null(),
            essence_type: EssenceType::Unknown,
            data_def,
        };
        if common.file_track_number == 0 {
            return Err(MxfError::InvalidHeaderMetadata(
                "File source package track has no track number".into(),
            ));
        }
        if fsp_edit_rate != common.edit_rate {
            log::warn!(
                "Unsupported FSP track edit rate {} that does not equal MP track edit rate {}",
                fsp_edit_rate,
                common.edit_rate
            );
        }

        // the partition's essence container label overrides a generic label
        // in the descriptor; a partition label equal to the picture coding
        // label is bogus and ignored
        if self.op_label.is_op_atom() && header_partition.essence_containers.len() == 1 {
            common.essence_container_label = header_partition.essence_containers[0];
            if let Some(descriptor) = self.metadata.descriptor(file_descriptor_id) {
                if let Some(picture) = descriptor.picture.as_ref() {
                    if common.essence_container_label == picture.picture_essence_coding
                        && !picture.picture_essence_coding.is_null()
                    {
                        log::error!("Essence container label in the partition pack is set to the picture coding label");
                        common.essence_container_label = Ul::null();
                    }
                }
            }
        }

        let descriptor = self
            .metadata
            .descriptor(file_descriptor_id)
            .cloned()
            .ok_or_else(|| MxfError::InvalidHeaderMetadata("File descriptor malformed".into()))?;
        if common.essence_container_label.is_null() {
            common.essence_container_label = descriptor.essence_container;
        }
        common.essence_type = classify_essence(data_def, &descriptor, common.essence_container_label);

        let info = match data_def {
            DataDef::Picture => TrackInfo::Picture(self.build_picture_info(common, &descriptor)),
            DataDef::Sound => TrackInfo::Sound(self.build_sound_info(resolver, common, &descriptor)?),
            _ => TrackInfo::Data(build_data_info(common, &descriptor)),
        };

        // file package origins must agree across tracks; timed text tracks
        // must have none at all
        if info.common().essence_type == EssenceType::TimedText {
            if origin != 0 {
                log::error!("Non-zero origin {} in Timed Text File Package Track", origin);
                return Err(MxfError::NotSupported(
                    "Non-zero origin in a timed text file package track".into(),
                ));
            }
        } else {
            if !self.internal_track_readers.is_empty() && origin != self.file_origin {
                log::error!(
                    "File Package Tracks with different origins, {} != {}, is not supported",
                    origin,
                    self.file_origin
                );
                return Err(MxfError::NotSupported(
                    "File package tracks with different origins".into(),
                ));
            }
            self.file_origin = origin;
        }

        let mut track_reader = TrackReader::new(info);
        if track_reader.is_timed_text() {
            track_reader.set_timed_text_body_sid(0);
        }
        self.internal_track_readers.push(track_reader);
        Ok(Some(self.internal_track_readers.len() - 1))
    }

    fn build_picture_info(
        &self,
        common: crate::track::TrackInfoCommon,
        descriptor: &crate::metadata::Descriptor,
    ) -> PictureTrackInfo {
        let mut info = PictureTrackInfo {
            common,
            ..Default::default()
        };
        let picture = match descriptor.picture.as_ref() {
            Some(picture) => picture,
            None => return info,
        };

        info.picture_essence_coding = picture.picture_essence_coding;
        info.signal_standard = picture.signal_standard;
        info.frame_layout = picture.frame_layout;

        // separate fields double the stored field height
        let frame_height_factor = if picture.frame_layout == Some(2) { 2 } else { 1 };

        info.stored_width = picture.stored_width;
        info.stored_height = frame_height_factor * picture.stored_height;
        info.display_width = picture.display_width.unwrap_or(info.stored_width);
        info.display_height = picture
            .display_height
            .map(|h| frame_height_factor * h)
            .unwrap_or(info.stored_height);
        info.display_x_offset = picture.display_x_offset;
        info.display_y_offset = picture.display_y_offset.map(|y| frame_height_factor * y);
        info.aspect_ratio = picture.aspect_ratio;
        info.afd = picture.afd;

        if descriptor.kind == crate::metadata::DescriptorKind::Cdci
            || descriptor.kind == crate::metadata::DescriptorKind::MpegVideo
        {
            info.is_cdci = true;
            info.component_depth = picture.component_depth;
            info.horiz_subsampling = picture.horiz_subsampling;
            info.vert_subsampling = picture.vert_subsampling;
            info.color_siting = picture.color_siting;
        }

        info
    }

    fn build_sound_info(
        &self,
        resolver: &mut dyn PackageResolver,
        common: crate::track::TrackInfoCommon,
        descriptor: &crate::metadata::Descriptor,
    ) -> Result<SoundTrackInfo> {
        let mut info = SoundTrackInfo {
            common,
            ..Default::default()
        };
        let sound = match descriptor.sound.as_ref() {
            Some(sound) => sound,
            None => return Ok(info),
        };

        info.sampling_rate = sound.audio_sampling_rate;
        info.channel_count = sound.channel_count;
        info.bits_per_sample = sound.quantization_bits;
        info.locked = sound.locked;
        info.audio_ref_level = sound.audio_ref_level;
        info.dial_norm = sound.dial_norm;

        if let Some(block_align) = sound.block_align {
            info.block_align = block_align;
            info.sequence_offset = sound.sequence_offset.unwrap_or(0);
        } else if info.channel_count > 0 {
            info.block_align = (info.channel_count * ((info.bits_per_sample + 7) / 8)) as u16;
        } else {
            // assuming channel count 1 is better than block align 0
            info.block_align = ((info.bits_per_sample + 7) / 8) as u16;
        }

        self.process_mca_labels(resolver, descriptor, &mut info)?;

        Ok(info)
    }

    fn index_mca_labels(&self, resolver: &mut dyn PackageResolver, descriptor_id: SetId) -> Result<()> {
        let descriptor = match self.metadata.descriptor(descriptor_id) {
            Some(descriptor) => descriptor.clone(),
            None => return Ok(()),
        };
        for uid in &descriptor.sub_descriptors {
            if let Some(id) = self.metadata.resolve(uid) {
                if let Some(label) = self.metadata.mca_label(id) {
                    resolver.mca_label_index().register_label(label);
                }
            }
        }
        for uid in &descriptor.child_descriptors {
            if let Some(id) = self.metadata.resolve(uid) {
                self.index_mca_labels(resolver, id)?;
            }
        }
        Ok(())
    }

    fn process_mca_labels(
        &self,
        resolver: &mut dyn PackageResolver,
        descriptor: &crate::metadata::Descriptor,
        info: &mut SoundTrackInfo,
    ) -> Result<()> {
        let mut mca_labels = Vec::new();
        for uid in &descriptor.sub_descriptors {
            let label = match self.metadata.resolve(uid).and_then(|id| self.metadata.mca_label(id)) {
                Some(label) => label.clone(),
                None => continue,
            };
            match label.kind {
                crate::metadata::McaLabelKind::AudioChannel => {
                    if info.channel_count == 0 {
                        return Err(MxfError::InvalidHeaderMetadata(
                            "MCA channel label in track containing 0 channels".into(),
                        ));
                    }
                    if let Some(channel_id) = label.channel_id {
                        if channel_id == 0 {
                            return Err(MxfError::InvalidHeaderMetadata(
                                "MCA channel label channel id value 0 is invalid; channel id starts counting from 1"
                                    .into(),
                            ));
                        }
                        if channel_id > info.channel_count {
                            return Err(MxfError::InvalidHeaderMetadata(format!(
                                "MCA channel label channel id {} exceeds channel count {}",
                                channel_id, info.channel_count
                            )));
                        }
                    } else if info.channel_count > 1 {
                        return Err(MxfError::InvalidHeaderMetadata(format!(
                            "MCA channel label is missing the channel id property in a track containing {} channels",
                            info.channel_count
                        )));
                    }
                    resolver.mca_label_index().check_references(&label)?;
                    mca_labels.push(label);
                }
                crate::metadata::McaLabelKind::SoundfieldGroup => {
                    // keep soundfield groups that no channel label references
                    if !resolver.mca_label_index().is_referenced(&label.link_id) {
                        resolver.mca_label_index().check_references(&label)?;
                        mca_labels.push(label);
                    }
                }
            }
        }

        if !mca_labels.is_empty() {
            info.mca_labels = mca_labels;
        }
        Ok(())
    }

    fn create_external_track_reader(
        &mut self,
        resolver: &mut dyn PackageResolver,
        clip_ref: &SourceClipRef,
        fsp_package: SetId,
    ) -> Result<Option<(FileId, usize)>> {
        // locators from the declaring descriptor name candidate files
        let locators: Vec<String> = self
            .metadata
            .package_descriptor(fsp_package)
            .and_then(|id| self.metadata.descriptor(id))
            .map(|descriptor| {
                descriptor
                    .locators
                    .iter()
                    .filter_map(|uid| self.metadata.resolve(uid))
                    .filter_map(|id| self.metadata.locator(id))
                    .map(|l| l.url.clone())
                    .collect()
            })
            .unwrap_or_default();

        let resolved_packages =
            resolver.resolve_source_clip_with_locators(self.file_id, clip_ref, &locators);
        // the external file must host the essence internally
        let resolved = resolved_packages
            .iter()
            .find(|p| p.is_file_source_package && !p.external_essence && p.file_id != self.file_id)
            .copied();
        let resolved = match resolved {
            Some(resolved) => resolved,
            None => {
                log::warn!(
                    "Failed to resolve external essence (SourcePackageID: {}, SourceTrackID: {})",
                    clip_ref.source_package_uid,
                    clip_ref.source_track_id
                );
                return Ok(None);
            }
        };

        let track_index = match resolver
            .external_reader(resolved.file_id)
            .and_then(|reader| reader.internal_track_index_by_id(resolved.track_id))
        {
            Some(index) => index,
            None => {
                log::warn!(
                    "Failed to resolve track in external essence (SourcePackageID: {}, SourceTrackID: {})",
                    clip_ref.source_package_uid,
                    clip_ref.source_track_id
                );
                return Ok(None);
            }
        };

        // one external track serving several material tracks is not supported
        if self
            .external_track_refs
            .contains(&(resolved.file_id, track_index))
        {
            log::error!("Tracks referenced by multiple material tracks is not supported");
            return Err(MxfError::NotSupported(
                "External track referenced by multiple material tracks".into(),
            ));
        }

        Ok(Some((resolved.file_id, track_index)))
    }

    fn override_external_mca_labels(
        &self,
        resolver: &mut dyn PackageResolver,
        resolved: ResolvedPackage,
        ext_file_id: FileId,
        ext_track_index: usize,
    ) -> Result<()> {
        let descriptor_id = match self.metadata.package_descriptor(resolved.package) {
            Some(id) => id,
            None => return Ok(()),
        };
        let file_descriptor_id = match self
            .metadata
            .file_descriptor_for_track(descriptor_id, resolved.track_id)
        {
            Some(id) => id,
            None => return Ok(()),
        };
        let descriptor = match self.metadata.descriptor(file_descriptor_id) {
            Some(descriptor) => descriptor.clone(),
            None => return Ok(()),
        };
        if descriptor.sub_descriptors.is_empty() {
            return Ok(());
        }

        self.index_mca_labels(resolver, descriptor_id)?;

        // labels present in this file's descriptor override the external ones
        let mut scratch = SoundTrackInfo::default();
        if let Some(reader) = resolver.external_reader(ext_file_id) {
            if let Some(sound) = reader.internal_track_readers[ext_track_index].info().as_sound() {
                scratch.channel_count = sound.channel_count;
            } else {
                return Ok(());
            }
        }
        self.process_mca_labels(resolver, &descriptor, &mut scratch)?;

        if let Some(reader) = resolver.external_reader_mut(ext_file_id) {
            if let Some(sound) = reader.internal_track_readers[ext_track_index]
                .info_mut()
                .as_sound_mut()
            {
                if !scratch.mca_labels.is_empty() {
                    sound.mca_labels = scratch.mca_labels;
                }
            }
        }
        Ok(())
    }

    fn discover_stream_ids(&mut self) -> Result<()> {
        if self.internal_track_readers.is_empty() {
            return Ok(());
        }

        let ess_container_data: Vec<crate::metadata::EssenceContainerData> = self
            .metadata
            .essence_container_data()?
            .into_iter()
            .cloned()
            .collect();
        if ess_container_data.is_empty() {
            log::error!("Missing EssenceContainerData set");
            return Err(MxfError::NoEssence);
        }

        self.body_sid = 0;
        self.index_sid = 0;
        for ess_data in &ess_container_data {
            let mut is_timed_text_container = false;
            let mut is_other_container = false;
            for track in self.internal_track_readers.iter_mut() {
                if track.info().common().file_package_uid == ess_data.linked_package_uid {
                    if track.is_timed_text() {
                        is_timed_text_container = true;
                        track.set_timed_text_body_sid(ess_data.body_sid);
                        break;
                    } else {
                        is_other_container = true;
                    }
                }
            }
            if is_timed_text_container {
                continue;
            }

            if !is_other_container {
                log::error!("Essence container data LinkedPackageUID does not link to internal file source package");
                return Err(MxfError::NoEssence);
            }

            if self.body_sid != 0 {
                if self.op_label.is_op_1b() {
                    log::error!("OP-1B with multiple essence containers is not supported");
                } else {
                    log::error!("Multiple essence containers is not supported");
                }
                return Err(MxfError::NotSupported("Multiple essence containers".into()));
            }

            self.body_sid = ess_data.body_sid;
            if self.body_sid == 0 {
                log::error!("BodySID is 0");
                return Err(MxfError::NoEssence);
            }

            self.index_sid = ess_data.index_sid.unwrap_or(0);
            if self.index_sid == 0 {
                log::warn!("Essence container has no index table (IndexSID is 0)");
            }
        }
        Ok(())
    }

    fn compute_duration_and_origin(&mut self, resolver: &dyn PackageResolver) -> Result<()> {
        // the clip duration is the minimum track duration, or unknown when
        // any contributor's is unknown
        let mut duration: Option<i64> = None;
        let mut unknown = false;
        for track in &self.internal_track_readers {
            let common = track.info().common();
            if common.duration < 0 {
                unknown = true;
                break;
            }
            let track_duration =
                convert_duration(common.edit_rate, common.duration, self.edit_rate, Rounding::Auto);
            duration = Some(match duration {
                Some(d) => d.min(track_duration),
                None => track_duration,
            });
        }
        if !unknown {
            for slot in &self.externals {
                let reader = resolver
                    .external_reader(slot.file_id)
                    .ok_or_else(|| MxfError::other("External reader disappeared"))?;
                if reader.duration() < 0 {
                    unknown = true;
                    break;
                }
                let internal_duration = slot.sequence.to_lower_duration(reader.duration(), 0);
                duration = Some(match duration {
                    Some(d) => d.min(internal_duration),
                    None => internal_duration,
                });
            }
        }
        self.duration = if unknown { -1 } else { duration.unwrap_or(-1) };

        // the clip origin is the maximum contributor origin
        self.origin = self.file_origin;
        for slot in &self.externals {
            if let Some(reader) = resolver.external_reader(slot.file_id) {
                let external_origin = slot.sequence.to_lower_position(reader.origin());
                if external_origin > self.origin {
                    self.origin = external_origin;
                }
            }
        }
        Ok(())
    }

    fn apply_forced_durations(&mut self, resolver: &mut dyn PackageResolver) -> Result<()> {
        if self.duration < 0 {
            return Ok(());
        }
        for slot in &self.externals {
            let forced = slot.sequence.to_higher_position(self.duration);
            if let Some(reader) = resolver.external_reader_mut(slot.file_id) {
                reader.force_duration(forced)?;
            }
        }
        Ok(())
    }

    fn extract_text_objects(&mut self, resolver: &dyn PackageResolver) {
        let material_package = match self.metadata.material_package() {
            Some(id) => id,
            None => return,
        };

        for static_track in self.metadata.static_tracks(material_package) {
            let track = match self.metadata.track(static_track) {
                Some(track) => track.clone(),
                None => continue,
            };
            let (data_def_label, _, components) = match self.metadata.track_sequence(&track) {
                Some(sequence) => sequence,
                None => continue,
            };
            if DataDef::from_label(&data_def_label) != DataDef::Descriptive {
                continue;
            }
            if track.track_id.is_none() {
                log::warn!("Material package static DM Track does not have a TrackID property");
            }

            for (component_index, component_uid) in components.iter().enumerate() {
                let segment = match self.metadata.resolve(component_uid) {
                    Some(id) => match &self.metadata.set(id).data {
                        SetData::DmSegment(segment) => segment.clone(),
                        _ => continue,
                    },
                    None => continue,
                };
                let framework_id = match segment.dm_framework.and_then(|uid| self.metadata.resolve(&uid)) {
                    Some(id) => id,
                    None => continue,
                };
                let framework = match &self.metadata.set(framework_id).data {
                    SetData::TextBasedFramework(framework) => framework.clone(),
                    _ => continue,
                };
                let object = match framework
                    .text_based_object
                    .and_then(|uid| self.metadata.resolve(&uid))
                {
                    Some(id) => match &self.metadata.set(id).data {
                        SetData::TextBasedObject(object) => object.clone(),
                        _ => continue,
                    },
                    None => continue,
                };

                self.text_objects.push(TextObject {
                    material_package_uid: self.material_package_uid,
                    material_track_id: track.track_id.unwrap_or(0),
                    component_index: component_index as u16,
                    mime_type: object.mime_type,
                    language_code: object.language_code,
                    description: object.description,
                });
            }
        }

        // text objects of external readers follow this file's
        for slot in &self.externals {
            if let Some(reader) = resolver.external_reader(slot.file_id) {
                self.text_objects.extend(reader.text_objects.iter().cloned());
            }
        }
    }

    // ---- open pipeline: timecodes ----------------------------------------

    fn extract_start_timecodes(&mut self, infile_mp_track: Option<SetId>) -> Result<()> {
        let material_package = match self.metadata.material_package() {
            Some(id) => id,
            None => return Ok(()),
        };

        self.material_start_timecode = self.start_timecode_of(material_package, None, 0);

        let infile_mp_track = match infile_mp_track {
            Some(track) => track,
            None => return Ok(()),
        };

        let mut visited = HashSet::new();
        if let Some((fsp_package, fsp_track, fsp_offset)) =
            self.referenced_package(infile_mp_track, 0, PackageKind::FileSource, &mut visited)
        {
            self.file_source_start_timecode =
                self.start_timecode_of(fsp_package, Some(fsp_track), fsp_offset);

            let mut visited = HashSet::new();
            if let Some((phys_package, phys_track, phys_offset)) =
                self.referenced_package(fsp_track, fsp_offset, PackageKind::PhysicalSource, &mut visited)
            {
                self.extract_physical_source_timecodes(phys_package, Some(phys_track), phys_offset);
                if let Some(package) = self.metadata.package(phys_package) {
                    self.physical_source_package_name = package.name.clone();
                }
            }
        }
        Ok(())
    }

    /// Find the first timecode component in a package and translate the
    /// referencing track's offset into it.
    fn start_timecode_of(&self, package_id: SetId, ref_track: Option<SetId>, offset: i64) -> Option<Timecode> {
        for track_set in self.metadata.package_tracks(package_id) {
            let track = self.metadata.track(track_set)?;
            let (data_def_label, _, components) = match self.metadata.track_sequence(track) {
                Some(sequence) => sequence,
                None => continue,
            };
            if DataDef::from_label(&data_def_label) != DataDef::Timecode {
                continue;
            }

            let tc_component = match components.len() {
                0 => continue,
                1 => self
                    .metadata
                    .resolve(&components[0])
                    .and_then(|id| self.metadata.timecode_component(id)),
                _ => {
                    log::warn!("Ignoring timecode track with multiple components");
                    continue;
                }
            };
            let tc_component = match tc_component {
                Some(component) => component,
                None => continue,
            };

            let tc_offset = match ref_track.and_then(|id| self.metadata.track(id)) {
                Some(track) => {
                    convert_timecode_offset(track.edit_rate, offset, tc_component.rounded_timecode_base)
                }
                None => offset,
            };
            return Some(Timecode::new(
                tc_component.rounded_timecode_base,
                tc_component.drop_frame,
                tc_component.start_timecode + tc_offset,
            ));
        }
        None
    }

    /// Physical source packages carry a primary timecode track and, in
    /// OP-Atom, Avid auxiliary timecode tracks in slots 3 to 7.
    fn extract_physical_source_timecodes(
        &mut self,
        package_id: SetId,
        ref_track: Option<SetId>,
        offset: i64,
    ) {
        let mut primary: Option<(i64, crate::metadata::TimecodeComponent)> = None;
        let mut aux: Vec<Option<(i64, crate::metadata::TimecodeComponent)>> = Vec::new();

        for track_set in self.metadata.package_tracks(package_id) {
            let track = match self.metadata.track(track_set) {
                Some(track) => track.clone(),
                None => continue,
            };
            let (data_def_label, _, components) = match self.metadata.track_sequence(&track) {
                Some(sequence) => sequence,
                None => continue,
            };
            if DataDef::from_label(&data_def_label) != DataDef::Timecode {
                continue;
            }

            // leading filler shifts the timecode start
            let mut filler = 0i64;
            let mut tc_component: Option<crate::metadata::TimecodeComponent> = None;
            for (index, component_uid) in components.iter().enumerate() {
                let component_id = match self.metadata.resolve(component_uid) {
                    Some(id) => id,
                    None => break,
                };
                if let Some(f) = self.metadata.filler(component_id) {
                    match f.duration {
                        Some(duration) => filler += duration,
                        None => break,
                    }
                } else {
                    if index + 1 >= components.len() {
                        tc_component = self.metadata.timecode_component(component_id).cloned();
                    } else {
                        log::warn!("Ignoring physical source timecode track with multiple components");
                    }
                    break;
                }
            }
            let tc_component = match tc_component {
                Some(component) => component,
                None => continue,
            };

            if !self.op_label.is_op_atom() || track.track_number == 0 {
                if filler == 0 {
                    primary = Some((0, tc_component));
                } else {
                    log::warn!("Ignoring physical source timecode track with filler");
                }
                break;
            }
            if track.track_number == 1 {
                if filler == 0 {
                    primary = Some((0, tc_component));
                } else {
                    log::warn!("Ignoring primary physical source timecode track with filler");
                }
            } else if (3..8).contains(&track.track_number) {
                if aux.is_empty() {
                    aux.resize(5, None);
                }
                aux[(track.track_number - 3) as usize] = Some((filler, tc_component));
            }
        }

        let ref_edit_rate = ref_track
            .and_then(|id| self.metadata.track(id))
            .map(|track| track.edit_rate);

        let build = |filler: i64, tc: &crate::metadata::TimecodeComponent| -> Option<Timecode> {
            let tc_offset = match ref_edit_rate {
                Some(rate) => convert_timecode_offset(rate, offset, tc.rounded_timecode_base),
                None => offset,
            };
            if tc_offset < filler {
                return None;
            }
            Some(Timecode::new(
                tc.rounded_timecode_base,
                tc.drop_frame,
                tc.start_timecode + tc_offset - filler,
            ))
        };

        if let Some((filler, tc)) = primary.as_ref() {
            self.physical_source_start_timecode = build(*filler, tc);
        }
        if !aux.is_empty() {
            self.avid_aux_timecodes = vec![None; 5];
            for (index, entry) in aux.iter().enumerate() {
                if let Some((filler, tc)) = entry {
                    self.avid_aux_timecodes[index] = build(*filler, tc);
                }
            }
        }
    }

    /// Chase a track's source clip to a referenced package of the wanted
    /// kind, converting the offset through each hop. Cycles in malformed
    /// files terminate via the visited set.
    fn referenced_package(
        &self,
        track_set: SetId,
        offset_in: i64,
        kind: PackageKind,
        visited: &mut HashSet<(SetId, i64)>,
    ) -> Option<(SetId, SetId, i64)> {
        if !visited.insert((track_set, offset_in)) {
            log::warn!("Track reference cycle detected");
            return None;
        }

        let track = self.metadata.track(track_set)?;
        let (_, _, components) = self.metadata.track_sequence(track)?;
        let source_clip = components
            .iter()
            .filter_map(|uid| self.metadata.resolve(uid))
            .find_map(|id| self.metadata.source_clip(id).map(|c| (id, c.clone())))?
            .1;

        let ref_package = self.metadata.package_by_uid(&source_clip.source_package_id)?;
        let ref_track = self.metadata.track_in_package(ref_package, source_clip.source_track_id)?;
        let ref_track_data = self.metadata.track(ref_track)?;

        let mut ref_offset = convert_position(
            track.edit_rate,
            source_clip.start_position + offset_in,
            ref_track_data.edit_rate,
            Rounding::Auto,
        );
        ref_offset += ref_track_data.origin;

        let kind_matches = match kind {
            PackageKind::FileSource | PackageKind::PhysicalSource => {
                let descriptor = self
                    .metadata
                    .package_descriptor(ref_package)
                    .and_then(|id| self.metadata.descriptor(id));
                match (kind, descriptor) {
                    (PackageKind::FileSource, Some(d)) => d.kind.is_file_descriptor(),
                    (PackageKind::PhysicalSource, Some(d)) => {
                        d.kind == crate::metadata::DescriptorKind::Physical
                    }
                    _ => false,
                }
            }
        };

        if !kind_matches {
            return self.referenced_package(ref_track, ref_offset, kind, visited);
        }

        Some((ref_package, ref_track, ref_offset))
    }

    // ---- open pipeline: essence reader and frame info --------------------

    fn create_essence_reader(&mut self, partitions: &[PartitionPack], file_is_complete: bool) -> Result<()> {
        let mut track_number_map = HashMap::new();
        for (index, track) in self.internal_track_readers.iter().enumerate() {
            if !track.is_timed_text() {
                track_number_map.insert(track.info().common().file_track_number, index);
            }
        }

        let partitions_for_build: &[PartitionPack] = if file_is_complete { partitions } else { &[] };
        let mut essence_reader = EssenceReader::build(
            &mut self.file,
            partitions_for_build,
            self.body_sid,
            self.index_sid,
            self.wrapping_type,
            track_number_map,
            file_is_complete,
        )?;

        if !essence_reader.have_index() {
            if self.index_sid != 0 && file_is_complete {
                return Err(MxfError::NoIndexTable);
            }
            // clip-wrapped PCM can be indexed by its block alignment
            if self.wrapping_type == WrappingType::Clip && self.internal_track_readers.len() == 1 {
                if let Some(sound) = self.internal_track_readers[0].info().as_sound() {
                    if sound.block_align > 0 {
                        essence_reader.set_fixed_edit_unit_size(
                            sound.block_align as u32,
                            sound.common.edit_rate,
                            sound.common.duration,
                        );
                    }
                }
            }
        }

        self.essence_reader = Some(essence_reader);
        Ok(())
    }

    fn check_require_frame_info(&mut self) {
        let mut count = 0u32;
        for track in &self.internal_track_readers {
            if !track.is_enabled() {
                continue;
            }
            let essence_type = track.info().common().essence_type;
            if essence_type.is_st436() {
                count = count.max(self.st436_manifest_count);
            } else if essence_type.requires_frame_info() {
                count = count.max(1);
            }
        }
        self.require_frame_info_count = count;
    }

    fn extract_frame_info(&mut self) {
        let saved_position = match self.essence_reader.as_ref() {
            Some(essence_reader) => essence_reader.position(),
            None => {
                self.require_frame_info_count = 0;
                return;
            }
        };

        for track in self.internal_track_readers.iter_mut() {
            track.frame_buffer_mut().set_temporary(true);
            if let Some(data) = track.info_mut().as_data_mut() {
                data.vbi_manifest.clear();
                data.anc_manifest.clear();
            }
        }
        let seekable = self.file.is_seekable();
        if let Some(essence_reader) = self.essence_reader.as_mut() {
            if !seekable {
                essence_reader.set_buffer_frames(true);
            }
            if let Err(e) = essence_reader.seek(&mut self.file, 0) {
                log::warn!("Failed to seek to the first frame for info extraction: {}", e);
            }
        }

        let mut have_first = false;
        let mut completed = true;
        'frames: for frame_index in 0..self.require_frame_info_count {
            for track in self.internal_track_readers.iter_mut() {
                track.frame_buffer_mut().start_read();
            }
            let num_read = match self.essence_reader.as_mut() {
                Some(essence_reader) => essence_reader
                    .read(&mut self.file, &mut self.internal_track_readers, 1, self.file_origin)
                    .unwrap_or(0),
                None => 0,
            };
            for track in self.internal_track_readers.iter_mut() {
                track.frame_buffer_mut().complete_read();
            }
            if num_read != 1 {
                completed = false;
                break 'frames;
            }

            for track in self.internal_track_readers.iter_mut() {
                let frame = match track.frame_buffer_mut().pop_last_frame() {
                    Some(frame) if !frame.is_empty() => frame,
                    _ => continue,
                };
                have_first = true;

                let essence_type = track.info().common().essence_type;
                match essence_type {
                    EssenceType::D10Aes3Pcm if frame_index == 0 => {
                        if frame.size() >= 4 {
                            if let Some(sound) = track.info_mut().as_sound_mut() {
                                sound.d10_aes3_valid_flags = Some(frame.data[3]);
                            }
                        }
                    }
                    EssenceType::AvcIntra50 | EssenceType::AvcIntra100 | EssenceType::AvcIntra200
                        if frame_index == 0 =>
                    {
                        let has_header = avci_frame_has_header(&frame.data);
                        if !has_header {
                            log::warn!(
                                "First frame in AVC-Intra track does not have sequence and picture parameter sets"
                            );
                        }
                        if let Some(picture) = track.info_mut().as_picture_mut() {
                            picture.have_avci_header = has_header;
                        }
                    }
                    EssenceType::VbiData | EssenceType::AncData => {
                        let lines = parse_st436_element(&frame.data);
                        if let Some(data) = track.info_mut().as_data_mut() {
                            for line in lines {
                                if essence_type == EssenceType::VbiData {
                                    data.append_unique_vbi_element(VbiManifestElement {
                                        line_number: line.0,
                                        wrapping_type: line.1,
                                        sample_coding: line.2,
                                        sample_count: line.3,
                                    });
                                } else {
                                    data.append_unique_anc_element(AncManifestElement {
                                        line_number: line.0,
                                        wrapping_type: line.1,
                                        sample_coding: line.2,
                                        sample_count: line.3,
                                    });
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        if completed {
            self.require_frame_info_count = 0;
        } else {
            log::warn!("Reached the end of the essence data whilst extracting information");
            if have_first {
                // the first frame was good enough to continue with
                self.require_frame_info_count = 0;
            }
        }

        for track in self.internal_track_readers.iter_mut() {
            track.frame_buffer_mut().set_temporary(false);
        }
        if let Some(essence_reader) = self.essence_reader.as_mut() {
            if !seekable {
                essence_reader.set_buffer_frames(false);
            }
            if let Err(e) = essence_reader.seek(&mut self.file, saved_position) {
                log::warn!("Failed to restore the position after info extraction: {}", e);
            }
        }
    }
}

/// The package kinds chased for start timecodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackageKind {
    FileSource,
    PhysicalSource,
}

fn build_data_info(
    common: crate::track::TrackInfoCommon,
    descriptor: &crate::metadata::Descriptor,
) -> DataTrackInfo {
    let mut info = DataTrackInfo {
        common,
        ..Default::default()
    };
    if let Some(timed_text) = descriptor.timed_text.as_ref() {
        info.timed_text_manifest = Some(TimedTextManifest {
            start: 0,
            ucs_encoding: timed_text.ucs_encoding.clone(),
            namespace_uri: timed_text.namespace_uri.clone(),
        });
    }
    info
}

/// Check whether an AVC-Intra frame leads with sequence and picture
/// parameter sets.
fn avci_frame_has_header(data: &[u8]) -> bool {
    let window = &data[..data.len().min(1024)];
    window
        .windows(4)
        .any(|w| w[0] == 0x00 && w[1] == 0x00 && w[2] == 0x01 && (w[3] & 0x1F) == 7)
}

/// Decode the line descriptors of an ST 436 VBI/ANC element.
fn parse_st436_element(data: &[u8]) -> Vec<(u16, u8, u8, u16)> {
    let mut lines = Vec::new();
    if data.len() < 2 {
        return lines;
    }
    let count = u16::from_be_bytes([data[0], data[1]]) as usize;
    let mut position = 2usize;
    for _ in 0..count {
        if position + 14 > data.len() {
            break;
        }
        let line_number = u16::from_be_bytes([data[position], data[position + 1]]);
        let wrapping_type = data[position + 2];
        let sample_coding = data[position + 3];
        let sample_count = u16::from_be_bytes([data[position + 4], data[position + 5]]);
        let array_len = u32::from_be_bytes([
            data[position + 6],
            data[position + 7],
            data[position + 8],
            data[position + 9],
        ]) as usize;
        let element_size = u32::from_be_bytes([
            data[position + 10],
            data[position + 11],
            data[position + 12],
            data[position + 13],
        ]) as usize;
        lines.push((line_number, wrapping_type, sample_coding, sample_count));
        position += 14 + array_len * element_size;
    }
    lines
}

fn absolute_file_uri(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avci_header_check() {
        let mut frame = vec![0u8; 64];
        assert!(!avci_frame_has_header(&frame));
        frame[8] = 0x00;
        frame[9] = 0x00;
        frame[10] = 0x01;
        frame[11] = 0x67; // SPS
        assert!(avci_frame_has_header(&frame));
    }

    #[test]
    fn test_parse_st436_element() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&21u16.to_be_bytes()); // line number
        data.push(1); // wrapping type
        data.push(4); // sample coding
        data.extend_from_slice(&720u16.to_be_bytes()); // sample count
        data.extend_from_slice(&4u32.to_be_bytes()); // array count
        data.extend_from_slice(&1u32.to_be_bytes()); // element size
        data.extend_from_slice(&[0xAA; 4]);

        let lines = parse_st436_element(&data);
        assert_eq!(lines, vec![(21, 1, 4, 720)]);
    }

    #[test]
    fn test_parse_st436_element_truncated() {
        assert!(parse_st436_element(&[0x00]).is_empty());
        // count says 2 but only 1 line present
        let mut data = Vec::new();
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&21u16.to_be_bytes());
        data.push(1);
        data.push(4);
        data.extend_from_slice(&720u16.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(&0u32.to_be_bytes());
        let lines = parse_st436_element(&data);
        assert_eq!(lines.len(), 1);
    }
}
