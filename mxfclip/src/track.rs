//! Track descriptor records and track readers.

use crate::essence_type::EssenceType;
use crate::frame::FrameBuffer;
use crate::metadata::{DataDef, McaLabel};
use crate::ul::Ul;
use mxfclip_core::{Rational, Umid};
use serde::{Deserialize, Serialize};

/// Fields shared by all track kinds.
#[derive(Debug, Clone)]
pub struct TrackInfoCommon {
    pub material_package_uid: Umid,
    pub material_track_id: u32,
    pub material_track_number: u32,
    pub file_package_uid: Umid,
    pub file_track_id: u32,
    pub file_track_number: u32,
    /// Material track edit rate, normalized.
    pub edit_rate: Rational,
    /// Duration in the track's own edit rate; negative = unknown.
    pub duration: i64,
    /// Leading filler before the source clip, in track edit units.
    pub lead_filler_offset: i64,
    pub essence_container_label: Ul,
    pub essence_type: EssenceType,
    pub data_def: DataDef,
}

impl Default for TrackInfoCommon {
    fn default() -> Self {
        Self {
            material_package_uid: Umid::zero(),
            material_track_id: 0,
            material_track_number: 0,
            file_package_uid: Umid::zero(),
            file_track_id: 0,
            file_track_number: 0,
            edit_rate: Rational::zero(),
            duration: -1,
            lead_filler_offset: 0,
            essence_container_label: Ul::null(),
            essence_type: EssenceType::Unknown,
            data_def: DataDef::Unknown,
        }
    }
}

/// Picture-track descriptor record.
#[derive(Debug, Clone, Default)]
pub struct PictureTrackInfo {
    pub common: TrackInfoCommon,
    pub picture_essence_coding: Ul,
    pub signal_standard: Option<u8>,
    pub frame_layout: Option<u8>,
    pub stored_width: u32,
    pub stored_height: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub display_x_offset: Option<u32>,
    pub display_y_offset: Option<u32>,
    pub aspect_ratio: Option<Rational>,
    pub afd: Option<u8>,
    pub is_cdci: bool,
    pub component_depth: u32,
    pub horiz_subsampling: u32,
    pub vert_subsampling: u32,
    pub color_siting: Option<u8>,
    /// Set from the first frame when the codec carries an in-band header.
    pub have_avci_header: bool,
}

/// Sound-track descriptor record.
#[derive(Debug, Clone, Default)]
pub struct SoundTrackInfo {
    pub common: TrackInfoCommon,
    pub sampling_rate: Rational,
    pub channel_count: u32,
    pub bits_per_sample: u32,
    pub block_align: u16,
    pub sequence_offset: u8,
    pub locked: Option<bool>,
    pub audio_ref_level: Option<i8>,
    pub dial_norm: Option<i8>,
    pub mca_labels: Vec<McaLabel>,
    /// AES3 channel validity flags from the first D-10 frame.
    pub d10_aes3_valid_flags: Option<u8>,
}

/// Timed-text manifest entry for a data track.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimedTextManifest {
    /// Clip-timeline start offset of the timed text.
    pub start: i64,
    pub ucs_encoding: Option<String>,
    pub namespace_uri: Option<String>,
}

/// One VBI line description from an ST 436 element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VbiManifestElement {
    pub line_number: u16,
    pub wrapping_type: u8,
    pub sample_coding: u8,
    pub sample_count: u16,
}

/// One ANC packet description from an ST 436 element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncManifestElement {
    pub line_number: u16,
    pub wrapping_type: u8,
    pub sample_coding: u8,
    pub sample_count: u16,
}

/// Data-track descriptor record.
#[derive(Debug, Clone, Default)]
pub struct DataTrackInfo {
    pub common: TrackInfoCommon,
    pub timed_text_manifest: Option<TimedTextManifest>,
    pub vbi_manifest: Vec<VbiManifestElement>,
    pub anc_manifest: Vec<AncManifestElement>,
}

impl DataTrackInfo {
    /// Append a VBI manifest element unless an equal one is present.
    pub fn append_unique_vbi_element(&mut self, element: VbiManifestElement) {
        if !self.vbi_manifest.contains(&element) {
            self.vbi_manifest.push(element);
        }
    }

    /// Append an ANC manifest element unless an equal one is present.
    pub fn append_unique_anc_element(&mut self, element: AncManifestElement) {
        if !self.anc_manifest.contains(&element) {
            self.anc_manifest.push(element);
        }
    }
}

/// Per-track descriptor record, tagged by track kind.
#[derive(Debug, Clone)]
pub enum TrackInfo {
    Picture(PictureTrackInfo),
    Sound(SoundTrackInfo),
    Data(DataTrackInfo),
}

impl TrackInfo {
    /// The shared fields.
    pub fn common(&self) -> &TrackInfoCommon {
        match self {
            TrackInfo::Picture(t) => &t.common,
            TrackInfo::Sound(t) => &t.common,
            TrackInfo::Data(t) => &t.common,
        }
    }

    /// The shared fields, mutably.
    pub fn common_mut(&mut self) -> &mut TrackInfoCommon {
        match self {
            TrackInfo::Picture(t) => &mut t.common,
            TrackInfo::Sound(t) => &mut t.common,
            TrackInfo::Data(t) => &mut t.common,
        }
    }

    /// Picture payload accessor.
    pub fn as_picture(&self) -> Option<&PictureTrackInfo> {
        match self {
            TrackInfo::Picture(t) => Some(t),
            _ => None,
        }
    }

    /// Sound payload accessor.
    pub fn as_sound(&self) -> Option<&SoundTrackInfo> {
        match self {
            TrackInfo::Sound(t) => Some(t),
            _ => None,
        }
    }

    /// Data payload accessor.
    pub fn as_data(&self) -> Option<&DataTrackInfo> {
        match self {
            TrackInfo::Data(t) => Some(t),
            _ => None,
        }
    }

    /// Sound payload accessor, mutably.
    pub fn as_sound_mut(&mut self) -> Option<&mut SoundTrackInfo> {
        match self {
            TrackInfo::Sound(t) => Some(t),
            _ => None,
        }
    }

    /// Data payload accessor, mutably.
    pub fn as_data_mut(&mut self) -> Option<&mut DataTrackInfo> {
        match self {
            TrackInfo::Data(t) => Some(t),
            _ => None,
        }
    }

    /// Picture payload accessor, mutably.
    pub fn as_picture_mut(&mut self) -> Option<&mut PictureTrackInfo> {
        match self {
            TrackInfo::Picture(t) => Some(t),
            _ => None,
        }
    }
}

/// A track exposed by a file reader: its descriptor record, enable flag and
/// frame buffer.
#[derive(Debug)]
pub struct TrackReader {
    info: TrackInfo,
    enabled: bool,
    frame_buffer: FrameBuffer,
    /// Body stream id for timed-text tracks, whose essence container is
    /// separate from the main one.
    timed_text_body_sid: u32,
}

impl TrackReader {
    /// Create an enabled track reader.
    pub fn new(info: TrackInfo) -> Self {
        Self {
            info,
            enabled: true,
            frame_buffer: FrameBuffer::new(),
            timed_text_body_sid: 0,
        }
    }

    /// The descriptor record.
    pub fn info(&self) -> &TrackInfo {
        &self.info
    }

    /// The descriptor record, mutably.
    pub fn info_mut(&mut self) -> &mut TrackInfo {
        &mut self.info
    }

    /// Whether this track participates in reads.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Enable or disable this track.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The frame buffer.
    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.frame_buffer
    }

    /// The frame buffer, mutably.
    pub fn frame_buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame_buffer
    }

    /// Whether this is a timed-text track.
    pub fn is_timed_text(&self) -> bool {
        self.info.common().essence_type == EssenceType::TimedText
    }

    /// The timed-text body stream id.
    pub fn timed_text_body_sid(&self) -> u32 {
        self.timed_text_body_sid
    }

    /// Attach the timed-text body stream id.
    pub fn set_timed_text_body_sid(&mut self, body_sid: u32) {
        self.timed_text_body_sid = body_sid;
    }
}
