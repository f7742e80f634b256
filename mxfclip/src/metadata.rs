//! Header metadata: the typed object graph describing packages, tracks,
//! sequences, source relationships and essence descriptors.
//!
//! Sets live in an arena owned by [`HeaderMetadata`]; cross-references are
//! instance-UID lookups resolved to arena indices, never owning pointers,
//! so malformed reference cycles cannot leak or recurse unchecked.

use crate::error::{MxfError, Result};
use crate::klv::{decode_array, KlvFile, LocalSetIter, PrimerPack};
use crate::ul::{labels, Ul, UL};
use byteorder::{BigEndian, ByteOrder};
use mxfclip_core::{Rational, Umid};
use std::collections::HashMap;

/// Arena index of a metadata set.
pub type SetId = usize;

/// A 16-byte instance UID used for strong references between sets.
pub type InstanceUid = [u8; 16];

/// Data definition of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DataDef {
    Picture,
    Sound,
    Timecode,
    Data,
    Descriptive,
    Unknown,
}

impl DataDef {
    /// Classify a data definition label.
    pub fn from_label(label: &Ul) -> Self {
        if label.equals_mod_regver(&Ul(labels::DDEF_PICTURE)) {
            DataDef::Picture
        } else if label.equals_mod_regver(&Ul(labels::DDEF_SOUND)) {
            DataDef::Sound
        } else if label.equals_mod_regver(&Ul(labels::DDEF_TIMECODE)) {
            DataDef::Timecode
        } else if label.equals_mod_regver(&Ul(labels::DDEF_DATA)) {
            DataDef::Data
        } else if label.equals_mod_regver(&Ul(labels::DDEF_DESCRIPTIVE)) {
            DataDef::Descriptive
        } else {
            DataDef::Unknown
        }
    }
}

/// Preface set.
#[derive(Debug, Clone, Default)]
pub struct Preface {
    pub version: u16,
    pub operational_pattern: Option<Ul>,
    pub content_storage: Option<InstanceUid>,
}

/// ContentStorage set.
#[derive(Debug, Clone, Default)]
pub struct ContentStorage {
    pub packages: Vec<InstanceUid>,
    pub essence_container_data: Vec<InstanceUid>,
}

/// EssenceContainerData set.
#[derive(Debug, Clone, Default)]
pub struct EssenceContainerData {
    pub linked_package_uid: Umid,
    pub index_sid: Option<u32>,
    pub body_sid: u32,
}

/// Material or source package.
#[derive(Debug, Clone, Default)]
pub struct Package {
    pub package_uid: Umid,
    pub name: Option<String>,
    pub tracks: Vec<InstanceUid>,
    pub descriptor: Option<InstanceUid>,
}

/// Timeline or static track.
#[derive(Debug, Clone, Default)]
pub struct Track {
    pub track_id: Option<u32>,
    pub track_number: u32,
    pub edit_rate: Rational,
    pub origin: i64,
    pub sequence: Option<InstanceUid>,
    /// False for static tracks, which have no edit rate or origin.
    pub is_timeline: bool,
}

/// Sequence of structural components.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub data_definition: Ul,
    pub duration: Option<i64>,
    pub components: Vec<InstanceUid>,
}

/// SourceClip component.
#[derive(Debug, Clone, Default)]
pub struct SourceClip {
    pub data_definition: Ul,
    pub duration: Option<i64>,
    pub start_position: i64,
    pub source_package_id: Umid,
    pub source_track_id: u32,
}

/// TimecodeComponent.
#[derive(Debug, Clone, Default)]
pub struct TimecodeComponent {
    pub duration: Option<i64>,
    pub rounded_timecode_base: u16,
    pub drop_frame: bool,
    pub start_timecode: i64,
}

/// Filler component.
#[derive(Debug, Clone, Default)]
pub struct Filler {
    pub data_definition: Ul,
    pub duration: Option<i64>,
}

/// EssenceGroup component.
#[derive(Debug, Clone, Default)]
pub struct EssenceGroup {
    pub data_definition: Ul,
    pub duration: Option<i64>,
    pub choices: Vec<InstanceUid>,
}

/// DMSegment component.
#[derive(Debug, Clone, Default)]
pub struct DmSegment {
    pub data_definition: Ul,
    pub duration: Option<i64>,
    pub dm_framework: Option<InstanceUid>,
}

/// Text-based descriptive metadata framework.
#[derive(Debug, Clone, Default)]
pub struct TextBasedFramework {
    pub text_based_object: Option<InstanceUid>,
}

/// Text-based object carried by a descriptive framework.
#[derive(Debug, Clone, Default)]
pub struct TextBasedObject {
    pub mime_type: Option<String>,
    pub language_code: Option<String>,
    pub description: Option<String>,
}

/// Network locator.
#[derive(Debug, Clone, Default)]
pub struct Locator {
    pub url: String,
}

/// Descriptor kind, selected by the set key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Cdci,
    Rgba,
    MpegVideo,
    GenericSound,
    WaveAudio,
    Aes3,
    Vbi,
    Anc,
    TimedText,
    Multiple,
    Physical,
}

impl DescriptorKind {
    /// Whether this descriptor describes stored file essence.
    pub fn is_file_descriptor(&self) -> bool {
        !matches!(self, DescriptorKind::Physical)
    }

    /// Whether this is a picture descriptor.
    pub fn is_picture(&self) -> bool {
        matches!(self, DescriptorKind::Cdci | DescriptorKind::Rgba | DescriptorKind::MpegVideo)
    }

    /// Whether this is a sound descriptor.
    pub fn is_sound(&self) -> bool {
        matches!(
            self,
            DescriptorKind::GenericSound | DescriptorKind::WaveAudio | DescriptorKind::Aes3
        )
    }
}

/// Picture-specific descriptor properties.
#[derive(Debug, Clone, Default)]
pub struct PictureDescriptor {
    pub picture_essence_coding: Ul,
    pub signal_standard: Option<u8>,
    pub frame_layout: Option<u8>,
    pub stored_width: u32,
    pub stored_height: u32,
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
    pub display_x_offset: Option<u32>,
    pub display_y_offset: Option<u32>,
    pub aspect_ratio: Option<Rational>,
    pub afd: Option<u8>,
    pub component_depth: u32,
    pub horiz_subsampling: u32,
    pub vert_subsampling: u32,
    pub color_siting: Option<u8>,
}

/// Sound-specific descriptor properties.
#[derive(Debug, Clone, Default)]
pub struct SoundDescriptor {
    pub audio_sampling_rate: Rational,
    pub channel_count: u32,
    pub quantization_bits: u32,
    pub locked: Option<bool>,
    pub audio_ref_level: Option<i8>,
    pub dial_norm: Option<i8>,
    pub block_align: Option<u16>,
    pub sequence_offset: Option<u8>,
    pub sound_essence_compression: Ul,
}

/// Timed-text-specific descriptor properties.
#[derive(Debug, Clone, Default)]
pub struct TimedTextDescriptor {
    pub ucs_encoding: Option<String>,
    pub namespace_uri: Option<String>,
}

/// An essence descriptor of any kind.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub kind: DescriptorKind,
    pub linked_track_id: Option<u32>,
    pub sample_rate: Rational,
    pub container_duration: Option<i64>,
    pub essence_container: Ul,
    pub locators: Vec<InstanceUid>,
    pub sub_descriptors: Vec<InstanceUid>,
    /// Child file descriptors of a MultipleDescriptor.
    pub child_descriptors: Vec<InstanceUid>,
    pub picture: Option<PictureDescriptor>,
    pub sound: Option<SoundDescriptor>,
    pub timed_text: Option<TimedTextDescriptor>,
}

impl Descriptor {
    /// Create an empty descriptor of the given kind with the matching
    /// property group allocated.
    pub fn new(kind: DescriptorKind) -> Self {
        Self {
            kind,
            linked_track_id: None,
            sample_rate: Rational::zero(),
            container_duration: None,
            essence_container: Ul::null(),
            locators: Vec::new(),
            sub_descriptors: Vec::new(),
            child_descriptors: Vec::new(),
            picture: if kind.is_picture() {
                Some(PictureDescriptor::default())
            } else {
                None
            },
            sound: if kind.is_sound() {
                Some(SoundDescriptor::default())
            } else {
                None
            },
            timed_text: if kind == DescriptorKind::TimedText {
                Some(TimedTextDescriptor::default())
            } else {
                None
            },
        }
    }
}

/// MCA label sub-descriptor kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McaLabelKind {
    AudioChannel,
    SoundfieldGroup,
}

/// MCA label sub-descriptor.
#[derive(Debug, Clone)]
pub struct McaLabel {
    pub kind: McaLabelKind,
    pub dictionary_id: Ul,
    pub link_id: InstanceUid,
    pub tag_symbol: String,
    pub tag_name: Option<String>,
    pub channel_id: Option<u32>,
    pub soundfield_group_link_id: Option<InstanceUid>,
}

/// Typed payload of a metadata set.
#[derive(Debug, Clone)]
pub enum SetData {
    Preface(Preface),
    ContentStorage(ContentStorage),
    EssenceContainerData(EssenceContainerData),
    MaterialPackage(Package),
    SourcePackage(Package),
    Track(Track),
    Sequence(Sequence),
    SourceClip(SourceClip),
    TimecodeComponent(TimecodeComponent),
    Filler(Filler),
    EssenceGroup(EssenceGroup),
    DmSegment(DmSegment),
    TextBasedFramework(TextBasedFramework),
    TextBasedObject(TextBasedObject),
    Locator(Locator),
    Descriptor(Descriptor),
    McaLabel(McaLabel),
}

/// One set in the arena.
#[derive(Debug, Clone)]
pub struct Set {
    pub key: Ul,
    pub instance_uid: InstanceUid,
    pub data: SetData,
}

/// The decoded header metadata graph.
#[derive(Debug, Default)]
pub struct HeaderMetadata {
    sets: Vec<Set>,
    by_uid: HashMap<InstanceUid, SetId>,
    preface: Option<SetId>,
}

impl HeaderMetadata {
    /// Read and decode the header metadata block at the current file
    /// position. `primer_len` is the length of the primer pack value whose
    /// key-length was already consumed, `primer_total` the byte size of the
    /// whole primer KLV; `header_byte_count` counts from the first byte of
    /// the primer pack key.
    pub fn read(file: &mut KlvFile, primer_len: u64, primer_total: u64, header_byte_count: u64) -> Result<Self> {
        let primer_value = file.read_value(primer_len)?;
        let primer = PrimerPack::parse(&primer_value)?;

        let mut metadata = HeaderMetadata::default();
        let mut consumed = primer_total;
        while consumed < header_byte_count {
            let kl = match file.read_kl()? {
                Some(kl) => kl,
                None => break,
            };
            consumed += 16 + kl.llen as u64 + kl.len;

            if kl.key.is_fill_item() {
                file.skip(kl.len)?;
                continue;
            }
            if !kl.key.is_header_metadata() {
                // end of the metadata block (e.g. an index segment follows);
                // leave the file at a KLV boundary
                file.skip(kl.len)?;
                break;
            }

            let value = file.read_value(kl.len)?;
            metadata.parse_set(kl.key, &value, &primer)?;
        }

        if metadata.preface.is_none() {
            return Err(MxfError::InvalidHeaderMetadata("Missing Preface set".into()));
        }
        Ok(metadata)
    }

    /// Number of sets in the arena.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether the arena is empty.
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Fetch a set by arena index.
    pub fn set(&self, id: SetId) -> &Set {
        &self.sets[id]
    }

    /// Resolve a strong reference to an arena index.
    pub fn resolve(&self, uid: &InstanceUid) -> Option<SetId> {
        self.by_uid.get(uid).copied()
    }

    /// The preface set.
    pub fn preface(&self) -> Result<&Preface> {
        let id = self
            .preface
            .ok_or_else(|| MxfError::InvalidHeaderMetadata("Missing Preface set".into()))?;
        match &self.sets[id].data {
            SetData::Preface(p) => Ok(p),
            _ => unreachable!(),
        }
    }

    /// The content storage set.
    pub fn content_storage(&self) -> Result<&ContentStorage> {
        let uid = self
            .preface()?
            .content_storage
            .ok_or_else(|| MxfError::InvalidHeaderMetadata("Preface has no ContentStorage".into()))?;
        match self.resolve(&uid).map(|id| &self.sets[id].data) {
            Some(SetData::ContentStorage(cs)) => Ok(cs),
            _ => Err(MxfError::InvalidHeaderMetadata(
                "ContentStorage reference does not resolve".into(),
            )),
        }
    }

    /// Essence container data sets from content storage.
    pub fn essence_container_data(&self) -> Result<Vec<&EssenceContainerData>> {
        let mut result = Vec::new();
        for uid in &self.content_storage()?.essence_container_data {
            if let Some(SetData::EssenceContainerData(ecd)) = self.resolve(uid).map(|id| &self.sets[id].data) {
                result.push(ecd);
            }
        }
        Ok(result)
    }

    /// The single material package.
    pub fn material_package(&self) -> Option<SetId> {
        self.sets.iter().position(|s| matches!(s.data, SetData::MaterialPackage(_)))
    }

    /// All source packages whose descriptor is (or contains) a file
    /// descriptor.
    pub fn file_source_packages(&self) -> Vec<SetId> {
        let mut result = Vec::new();
        for (id, set) in self.sets.iter().enumerate() {
            if let SetData::SourcePackage(package) = &set.data {
                if let Some(descriptor) = self.package_descriptor_of(package) {
                    if descriptor.kind.is_file_descriptor() {
                        result.push(id);
                    }
                }
            }
        }
        result
    }

    fn package_descriptor_of(&self, package: &Package) -> Option<&Descriptor> {
        let uid = package.descriptor?;
        match self.resolve(&uid).map(|id| &self.sets[id].data) {
            Some(SetData::Descriptor(d)) => Some(d),
            _ => None,
        }
    }

    /// Find a package by UMID.
    pub fn package_by_uid(&self, uid: &Umid) -> Option<SetId> {
        self.sets.iter().position(|s| match &s.data {
            SetData::MaterialPackage(p) | SetData::SourcePackage(p) => p.package_uid == *uid,
            _ => false,
        })
    }

    /// Typed package accessor.
    pub fn package(&self, id: SetId) -> Option<&Package> {
        match &self.sets[id].data {
            SetData::MaterialPackage(p) | SetData::SourcePackage(p) => Some(p),
            _ => None,
        }
    }

    /// Whether the set is a material package.
    pub fn is_material_package(&self, id: SetId) -> bool {
        matches!(self.sets[id].data, SetData::MaterialPackage(_))
    }

    /// Set ids of a package's tracks, in declaration order.
    pub fn package_tracks(&self, id: SetId) -> Vec<SetId> {
        let mut result = Vec::new();
        if let Some(package) = self.package(id) {
            for uid in &package.tracks {
                if let Some(track_id) = self.resolve(uid) {
                    if matches!(self.sets[track_id].data, SetData::Track(_)) {
                        result.push(track_id);
                    }
                }
            }
        }
        result
    }

    /// Find a track in a package by track id.
    pub fn track_in_package(&self, package_id: SetId, track_id: u32) -> Option<SetId> {
        self.package_tracks(package_id).into_iter().find(|&id| {
            matches!(&self.sets[id].data, SetData::Track(t) if t.track_id == Some(track_id))
        })
    }

    /// Typed track accessor.
    pub fn track(&self, id: SetId) -> Option<&Track> {
        match &self.sets[id].data {
            SetData::Track(t) => Some(t),
            _ => None,
        }
    }

    /// Typed sequence accessor for a track's sequence reference. A bare
    /// component in place of a sequence is returned as a synthetic
    /// single-component view.
    pub fn track_sequence(&self, track: &Track) -> Option<(Ul, Option<i64>, Vec<InstanceUid>)> {
        let uid = track.sequence?;
        let id = self.resolve(&uid)?;
        match &self.sets[id].data {
            SetData::Sequence(s) => Some((s.data_definition, s.duration, s.components.clone())),
            SetData::SourceClip(c) => Some((c.data_definition, c.duration, vec![uid])),
            SetData::TimecodeComponent(c) => Some((Ul(labels::DDEF_TIMECODE), c.duration, vec![uid])),
            _ => None,
        }
    }

    /// Typed component accessors.
    pub fn source_clip(&self, id: SetId) -> Option<&SourceClip> {
        match &self.sets[id].data {
            SetData::SourceClip(c) => Some(c),
            _ => None,
        }
    }

    pub fn timecode_component(&self, id: SetId) -> Option<&TimecodeComponent> {
        match &self.sets[id].data {
            SetData::TimecodeComponent(c) => Some(c),
            _ => None,
        }
    }

    pub fn filler(&self, id: SetId) -> Option<&Filler> {
        match &self.sets[id].data {
            SetData::Filler(f) => Some(f),
            _ => None,
        }
    }

    pub fn essence_group(&self, id: SetId) -> Option<&EssenceGroup> {
        match &self.sets[id].data {
            SetData::EssenceGroup(g) => Some(g),
            _ => None,
        }
    }

    pub fn descriptor(&self, id: SetId) -> Option<&Descriptor> {
        match &self.sets[id].data {
            SetData::Descriptor(d) => Some(d),
            _ => None,
        }
    }

    pub fn mca_label(&self, id: SetId) -> Option<&McaLabel> {
        match &self.sets[id].data {
            SetData::McaLabel(l) => Some(l),
            _ => None,
        }
    }

    pub fn locator(&self, id: SetId) -> Option<&Locator> {
        match &self.sets[id].data {
            SetData::Locator(l) => Some(l),
            _ => None,
        }
    }

    /// The descriptor attached to a package, if any.
    pub fn package_descriptor(&self, package_id: SetId) -> Option<SetId> {
        let package = self.package(package_id)?;
        let uid = package.descriptor?;
        let id = self.resolve(&uid)?;
        matches!(self.sets[id].data, SetData::Descriptor(_)).then_some(id)
    }

    /// Find the file descriptor for a track: the package descriptor itself,
    /// or the child of a MultipleDescriptor whose linked track id matches.
    pub fn file_descriptor_for_track(&self, descriptor_id: SetId, track_id: u32) -> Option<SetId> {
        let descriptor = self.descriptor(descriptor_id)?;
        if descriptor.kind != DescriptorKind::Multiple {
            return descriptor.kind.is_file_descriptor().then_some(descriptor_id);
        }
        for uid in &descriptor.child_descriptors {
            let child_id = self.resolve(uid)?;
            let child = self.descriptor(child_id)?;
            if child.linked_track_id == Some(track_id) {
                return Some(child_id);
            }
        }
        None
    }

    /// Material-package static tracks in declaration order.
    pub fn static_tracks(&self, package_id: SetId) -> Vec<SetId> {
        let mut result = Vec::new();
        if let Some(package) = self.package(package_id) {
            for uid in &package.tracks {
                if let Some(id) = self.resolve(uid) {
                    if matches!(&self.sets[id].data, SetData::Track(t) if !t.is_timeline) {
                        result.push(id);
                    }
                }
            }
        }
        result
    }

    /// Insert a parsed set into the arena (also used by tests to build
    /// graphs directly).
    pub fn insert(&mut self, key: Ul, instance_uid: InstanceUid, data: SetData) -> SetId {
        let id = self.sets.len();
        if matches!(data, SetData::Preface(_)) {
            self.preface = Some(id);
        }
        self.sets.push(Set {
            key,
            instance_uid,
            data,
        });
        self.by_uid.insert(instance_uid, id);
        id
    }

    fn parse_set(&mut self, key: Ul, value: &[u8], primer: &PrimerPack) -> Result<()> {
        let parsed = parse_set_data(key, value, primer)?;
        if let Some((instance_uid, data)) = parsed {
            self.insert(key, instance_uid, data);
        }
        Ok(())
    }
}

fn parse_set_data(key: Ul, value: &[u8], primer: &PrimerPack) -> Result<Option<(InstanceUid, SetData)>> {
    let mut instance_uid = [0u8; 16];

    let make = |key: &Ul| -> Option<SetData> {
        let k = key.as_bytes();
        Some(match *k {
            labels::PREFACE => SetData::Preface(Preface::default()),
            labels::CONTENT_STORAGE => SetData::ContentStorage(ContentStorage::default()),
            labels::ESSENCE_CONTAINER_DATA => SetData::EssenceContainerData(EssenceContainerData::default()),
            labels::MATERIAL_PACKAGE => SetData::MaterialPackage(Package::default()),
            labels::SOURCE_PACKAGE => SetData::SourcePackage(Package::default()),
            labels::TIMELINE_TRACK => SetData::Track(Track {
                is_timeline: true,
                ..Track::default()
            }),
            labels::STATIC_TRACK => SetData::Track(Track::default()),
            labels::SEQUENCE => SetData::Sequence(Sequence::default()),
            labels::SOURCE_CLIP => SetData::SourceClip(SourceClip::default()),
            labels::TIMECODE_COMPONENT => SetData::TimecodeComponent(TimecodeComponent::default()),
            labels::FILLER => SetData::Filler(Filler::default()),
            labels::ESSENCE_GROUP => SetData::EssenceGroup(EssenceGroup::default()),
            labels::DM_SEGMENT => SetData::DmSegment(DmSegment::default()),
            labels::TEXT_BASED_DM_FRAMEWORK => SetData::TextBasedFramework(TextBasedFramework::default()),
            labels::TEXT_BASED_OBJECT => SetData::TextBasedObject(TextBasedObject::default()),
            labels::NETWORK_LOCATOR => SetData::Locator(Locator::default()),
            labels::CDCI_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Cdci)),
            labels::RGBA_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Rgba)),
            labels::MPEG_VIDEO_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::MpegVideo)),
            labels::GENERIC_SOUND_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::GenericSound)),
            labels::WAVE_AUDIO_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::WaveAudio)),
            labels::AES3_AUDIO_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Aes3)),
            labels::VBI_DATA_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Vbi)),
            labels::ANC_DATA_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Anc)),
            labels::TIMED_TEXT_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::TimedText)),
            labels::MULTIPLE_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Multiple)),
            labels::TAPE_DESCRIPTOR => SetData::Descriptor(Descriptor::new(DescriptorKind::Physical)),
            labels::AUDIO_CHANNEL_LABEL_SUBDESCRIPTOR => SetData::McaLabel(McaLabel {
                kind: McaLabelKind::AudioChannel,
                dictionary_id: Ul::null(),
                link_id: [0; 16],
                tag_symbol: String::new(),
                tag_name: None,
                channel_id: None,
                soundfield_group_link_id: None,
            }),
            labels::SOUNDFIELD_GROUP_LABEL_SUBDESCRIPTOR => SetData::McaLabel(McaLabel {
                kind: McaLabelKind::SoundfieldGroup,
                dictionary_id: Ul::null(),
                link_id: [0; 16],
                tag_symbol: String::new(),
                tag_name: None,
                channel_id: None,
                soundfield_group_link_id: None,
            }),
            _ => return None,
        })
    };

    let mut data = match make(&key) {
        Some(data) => data,
        // unknown sets are tolerated and skipped
        None => return Ok(None),
    };

    for item in LocalSetIter::new(value) {
        let (tag, item_data) = item?;
        if tag == 0x3C0A {
            if item_data.len() >= 16 {
                instance_uid.copy_from_slice(&item_data[..16]);
            }
            continue;
        }
        apply_item(&mut data, tag, item_data, primer)?;
    }

    Ok(Some((instance_uid, data)))
}

fn apply_item(data: &mut SetData, tag: u16, item: &[u8], primer: &PrimerPack) -> Result<()> {
    // dynamic tags are resolved to item ULs through the primer
    let item_ul: Option<UL> = if tag >= 0x8000 {
        primer.lookup(tag).copied()
    } else {
        None
    };

    match data {
        SetData::Preface(p) => match tag {
            0x3B05 => p.version = read_u16(item)?,
            0x3B03 => p.content_storage = Some(read_uid(item)?),
            0x3B09 => p.operational_pattern = Some(Ul(read_ul(item)?)),
            _ => {}
        },
        SetData::ContentStorage(cs) => match tag {
            0x1901 => cs.packages = read_uid_batch(item)?,
            0x1902 => cs.essence_container_data = read_uid_batch(item)?,
            _ => {}
        },
        SetData::EssenceContainerData(ecd) => match tag {
            0x2701 => ecd.linked_package_uid = read_umid(item)?,
            0x3F06 => ecd.index_sid = Some(read_u32(item)?),
            0x3F07 => ecd.body_sid = read_u32(item)?,
            _ => {}
        },
        SetData::MaterialPackage(p) | SetData::SourcePackage(p) => match tag {
            0x4401 => p.package_uid = read_umid(item)?,
            0x4402 => p.name = Some(read_utf16(item)),
            0x4403 => p.tracks = read_uid_batch(item)?,
            0x4701 => p.descriptor = Some(read_uid(item)?),
            _ => {}
        },
        SetData::Track(t) => match tag {
            0x4801 => t.track_id = Some(read_u32(item)?),
            0x4804 => t.track_number = read_u32(item)?,
            0x4B01 => t.edit_rate = read_rational(item)?,
            0x4B02 => t.origin = read_i64(item)?,
            0x4803 => t.sequence = Some(read_uid(item)?),
            _ => {}
        },
        SetData::Sequence(s) => match tag {
            0x0201 => s.data_definition = Ul(read_ul(item)?),
            0x0202 => s.duration = Some(read_i64(item)?),
            0x1001 => s.components = read_uid_batch(item)?,
            _ => {}
        },
        SetData::SourceClip(c) => match tag {
            0x0201 => c.data_definition = Ul(read_ul(item)?),
            0x0202 => c.duration = Some(read_i64(item)?),
            0x1201 => c.start_position = read_i64(item)?,
            0x1101 => c.source_package_id = read_umid(item)?,
            0x1102 => c.source_track_id = read_u32(item)?,
            _ => {}
        },
        SetData::TimecodeComponent(c) => match tag {
            0x0202 => c.duration = Some(read_i64(item)?),
            0x1502 => c.rounded_timecode_base = read_u16(item)?,
            0x1501 => c.start_timecode = read_i64(item)?,
            0x1503 => c.drop_frame = item.first().copied().unwrap_or(0) != 0,
            _ => {}
        },
        SetData::Filler(f) => match tag {
            0x0201 => f.data_definition = Ul(read_ul(item)?),
            0x0202 => f.duration = Some(read_i64(item)?),
            _ => {}
        },
        SetData::EssenceGroup(g) => match tag {
            0x0201 => g.data_definition = Ul(read_ul(item)?),
            0x0202 => g.duration = Some(read_i64(item)?),
            0x0501 => g.choices = read_uid_batch(item)?,
            _ => {}
        },
        SetData::DmSegment(s) => match tag {
            0x0201 => s.data_definition = Ul(read_ul(item)?),
            0x0202 => s.duration = Some(read_i64(item)?),
            0x6101 => s.dm_framework = Some(read_uid(item)?),
            _ => {}
        },
        SetData::TextBasedFramework(f) => {
            if item_ul == Some(labels::ITEM_TEXT_BASED_OBJECT) {
                f.text_based_object = Some(read_uid(item)?);
            }
        }
        SetData::TextBasedObject(o) => {
            if item_ul == Some(labels::ITEM_TEXT_MIME_MEDIA_TYPE) {
                o.mime_type = Some(read_utf16(item));
            } else if item_ul == Some(labels::ITEM_TEXT_LANGUAGE_CODE) {
                o.language_code = Some(read_utf16(item));
            } else if item_ul == Some(labels::ITEM_TEXT_DATA_DESCRIPTION) {
                o.description = Some(read_utf16(item));
            }
        }
        SetData::Locator(l) => {
            if tag == 0x4001 {
                l.url = read_utf16(item);
            }
        }
        SetData::McaLabel(label) => {
            if item_ul == Some(labels::ITEM_MCA_LABEL_DICTIONARY_ID) {
                label.dictionary_id = Ul(read_ul(item)?);
            } else if item_ul == Some(labels::ITEM_MCA_LINK_ID) {
                label.link_id = read_uid(item)?;
            } else if item_ul == Some(labels::ITEM_MCA_TAG_SYMBOL) {
                label.tag_symbol = read_utf16(item);
            } else if item_ul == Some(labels::ITEM_MCA_TAG_NAME) {
                label.tag_name = Some(read_utf16(item));
            } else if item_ul == Some(labels::ITEM_MCA_CHANNEL_ID) {
                label.channel_id = Some(read_u32(item)?);
            } else if item_ul == Some(labels::ITEM_SOUNDFIELD_GROUP_LINK_ID) {
                label.soundfield_group_link_id = Some(read_uid(item)?);
            }
        }
        SetData::Descriptor(d) => {
            if item_ul == Some(labels::ITEM_SUB_DESCRIPTORS) {
                d.sub_descriptors = read_uid_batch(item)?;
                return Ok(());
            }
            match tag {
                0x2F01 => d.locators = read_uid_batch(item)?,
                0x3006 => d.linked_track_id = Some(read_u32(item)?),
                0x3001 => d.sample_rate = read_rational(item)?,
                0x3002 => d.container_duration = Some(read_i64(item)?),
                0x3004 => d.essence_container = Ul(read_ul(item)?),
                0x3F01 => d.child_descriptors = read_uid_batch(item)?,
                _ => {}
            }
            if let Some(picture) = d.picture.as_mut() {
                match tag {
                    0x3201 => picture.picture_essence_coding = Ul(read_ul(item)?),
                    0x3215 => picture.signal_standard = item.first().copied(),
                    0x320C => picture.frame_layout = item.first().copied(),
                    0x3203 => picture.stored_width = read_u32(item)?,
                    0x3202 => picture.stored_height = read_u32(item)?,
                    0x3209 => picture.display_width = Some(read_u32(item)?),
                    0x3208 => picture.display_height = Some(read_u32(item)?),
                    0x320A => picture.display_x_offset = Some(read_u32(item)?),
                    0x320B => picture.display_y_offset = Some(read_u32(item)?),
                    0x320E => picture.aspect_ratio = Some(read_rational(item)?),
                    0x3218 => picture.afd = item.first().copied(),
                    0x3301 => picture.component_depth = read_u32(item)?,
                    0x3302 => picture.horiz_subsampling = read_u32(item)?,
                    0x3308 => picture.vert_subsampling = read_u32(item)?,
                    0x3303 => picture.color_siting = item.first().copied(),
                    _ => {}
                }
            }
            if let Some(sound) = d.sound.as_mut() {
                match tag {
                    0x3D03 => sound.audio_sampling_rate = read_rational(item)?,
                    0x3D07 => sound.channel_count = read_u32(item)?,
                    0x3D01 => sound.quantization_bits = read_u32(item)?,
                    0x3D02 => sound.locked = Some(item.first().copied().unwrap_or(0) != 0),
                    0x3D04 => sound.audio_ref_level = Some(item.first().copied().unwrap_or(0) as i8),
                    0x3D0C => sound.dial_norm = Some(item.first().copied().unwrap_or(0) as i8),
                    0x3D06 => sound.sound_essence_compression = Ul(read_ul(item)?),
                    0x3D0A => sound.block_align = Some(read_u16(item)?),
                    0x3D0B => sound.sequence_offset = item.first().copied(),
                    _ => {}
                }
            }
            if let Some(timed_text) = d.timed_text.as_mut() {
                match tag {
                    0x4405 => timed_text.ucs_encoding = Some(read_utf16(item)),
                    0x4406 => timed_text.namespace_uri = Some(read_utf16(item)),
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn read_u16(data: &[u8]) -> Result<u16> {
    if data.len() < 2 {
        return Err(MxfError::InvalidHeaderMetadata("Short u16 property".into()));
    }
    Ok(BigEndian::read_u16(data))
}

fn read_u32(data: &[u8]) -> Result<u32> {
    if data.len() < 4 {
        return Err(MxfError::InvalidHeaderMetadata("Short u32 property".into()));
    }
    Ok(BigEndian::read_u32(data))
}

fn read_i64(data: &[u8]) -> Result<i64> {
    if data.len() < 8 {
        return Err(MxfError::InvalidHeaderMetadata("Short i64 property".into()));
    }
    Ok(BigEndian::read_i64(data))
}

fn read_rational(data: &[u8]) -> Result<Rational> {
    if data.len() < 8 {
        return Err(MxfError::InvalidHeaderMetadata("Short rational property".into()));
    }
    let num = BigEndian::read_i32(data);
    let den = BigEndian::read_i32(&data[4..]);
    if den == 0 {
        return Err(MxfError::InvalidHeaderMetadata("Rational with zero denominator".into()));
    }
    Ok(Rational::new(num, den))
}

fn read_ul(data: &[u8]) -> Result<UL> {
    if data.len() < 16 {
        return Err(MxfError::InvalidHeaderMetadata("Short label property".into()));
    }
    let mut ul = [0u8; 16];
    ul.copy_from_slice(&data[..16]);
    Ok(ul)
}

fn read_uid(data: &[u8]) -> Result<InstanceUid> {
    read_ul(data)
}

fn read_umid(data: &[u8]) -> Result<Umid> {
    Umid::from_slice(data).ok_or_else(|| MxfError::InvalidHeaderMetadata("Short UMID property".into()))
}

fn read_uid_batch(data: &[u8]) -> Result<Vec<InstanceUid>> {
    let (count, size, elements) = decode_array(data)?;
    if count > 0 && size != 16 {
        return Err(MxfError::InvalidHeaderMetadata(format!(
            "Reference batch element size {} is not 16",
            size
        )));
    }
    let mut uids = Vec::with_capacity(count as usize);
    for chunk in elements.chunks_exact(16) {
        let mut uid = [0u8; 16];
        uid.copy_from_slice(chunk);
        uids.push(uid);
    }
    Ok(uids)
}

/// Decode a UTF-16BE string property, trimming trailing nulls.
fn read_utf16(data: &[u8]) -> String {
    let units: Vec<u16> = data.chunks_exact(2).map(BigEndian::read_u16).collect();
    let trimmed: Vec<u16> = units.into_iter().take_while(|&u| u != 0).collect();
    String::from_utf16_lossy(&trimmed)
}
