//! SMPTE Universal Labels (ULs) and their classification.
//!
//! Every key in an MXF file is a 16-byte UL. The tables here cover the
//! labels the reader dispatches on: partition packs, structural metadata
//! sets, essence container labels, operational patterns and essence element
//! keys.

use std::fmt;

/// Raw 16-byte Universal Label.
pub type UL = [u8; 16];

/// A 16-byte SMPTE Universal Label.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ul(pub UL);

impl Ul {
    /// Create from raw bytes.
    pub const fn new(bytes: UL) -> Self {
        Ul(bytes)
    }

    /// The null label.
    pub const fn null() -> Self {
        Ul([0; 16])
    }

    /// Check if this is the null label.
    pub fn is_null(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &UL {
        &self.0
    }

    /// Compare ignoring byte 7, the registry version.
    pub fn equals_mod_regver(&self, other: &Ul) -> bool {
        self.0[..7] == other.0[..7] && self.0[8..] == other.0[8..]
    }

    /// Check for the SMPTE UL prefix.
    pub fn is_smpte(&self) -> bool {
        self.0[0] == 0x06 && self.0[1] == 0x0E && self.0[2] == 0x2B && self.0[3] == 0x34
    }

    /// Check if this is a partition pack key (any kind).
    pub fn is_partition_pack(&self) -> bool {
        self.0[..10] == labels::PARTITION_PREFIX[..10]
            && (0x02..=0x04).contains(&self.0[13])
    }

    /// Check if this is a header partition pack key.
    pub fn is_header_partition(&self) -> bool {
        self.is_partition_pack() && self.0[13] == 0x02
    }

    /// Check if this is a footer partition pack key.
    pub fn is_footer_partition(&self) -> bool {
        self.is_partition_pack() && self.0[13] == 0x04
    }

    /// Check if this partition pack key declares a closed partition.
    pub fn is_closed_partition(&self) -> bool {
        self.is_partition_pack() && (self.0[14] == 0x02 || self.0[14] == 0x04)
    }

    /// Check if this partition pack key declares complete header metadata.
    pub fn is_complete_partition(&self) -> bool {
        self.is_partition_pack() && (self.0[14] == 0x03 || self.0[14] == 0x04)
    }

    /// Check if this is the primer pack key.
    pub fn is_primer_pack(&self) -> bool {
        self.0[..13] == labels::PRIMER_PACK[..13] && self.0[13] == labels::PRIMER_PACK[13]
    }

    /// Check if this is a fill item key.
    pub fn is_fill_item(&self) -> bool {
        self.equals_mod_regver(&Ul(labels::FILL_ITEM))
    }

    /// Check if this is the random index pack key.
    pub fn is_random_index_pack(&self) -> bool {
        self.0 == labels::RANDOM_INDEX_PACK
    }

    /// Check if this is a header metadata set key (structural or descriptive).
    pub fn is_header_metadata(&self) -> bool {
        self.is_primer_pack()
            || (self.is_smpte()
                && self.0[4] == 0x02
                && self.0[5] == 0x53
                && self.0[8] == 0x0D
                && (self.0[10] == 0x01 || self.0[10] == 0x04))
    }

    /// Check if this is an index table segment key.
    pub fn is_index_table_segment(&self) -> bool {
        self.equals_mod_regver(&Ul(labels::INDEX_TABLE_SEGMENT))
    }

    /// Check if this is a generic-container essence element key.
    pub fn is_essence_element(&self) -> bool {
        self.0[..4] == labels::SET_PREFIX[..4]
            && self.0[4] == 0x01
            && self.0[8] == 0x0D
            && self.0[9] == 0x01
            && self.0[10] == 0x03
            && self.0[11] == 0x01
    }

    /// The 4-byte track number of an essence element key.
    pub fn essence_track_number(&self) -> u32 {
        u32::from_be_bytes([self.0[12], self.0[13], self.0[14], self.0[15]])
    }

    /// Check if this is an operational pattern label.
    pub fn is_operational_pattern(&self) -> bool {
        self.0[..8] == labels::OP_PREFIX[..8] && self.0[8] == 0x0D && self.0[9] == 0x01 && self.0[10] == 0x02
    }

    /// OP-Atom: single-essence file pattern.
    pub fn is_op_atom(&self) -> bool {
        self.is_operational_pattern() && self.0[12] == 0x10
    }

    /// OP-1A: single-item, single-package interleaved pattern.
    pub fn is_op_1a(&self) -> bool {
        self.is_operational_pattern() && self.0[12] == 0x01 && self.0[13] == 0x01
    }

    /// OP-1B: single-item, ganged-packages pattern.
    pub fn is_op_1b(&self) -> bool {
        self.is_operational_pattern() && self.0[12] == 0x01 && self.0[13] == 0x02
    }

    /// Check if this is an essence container label.
    pub fn is_essence_container(&self) -> bool {
        self.0[..4] == labels::SET_PREFIX[..4]
            && self.0[4] == 0x04
            && self.0[8] == 0x0D
            && self.0[9] == 0x01
            && self.0[10] == 0x03
            && self.0[11] == 0x01
    }

    /// Check if this is the timed-text essence container label.
    pub fn is_timed_text_container(&self) -> bool {
        self.is_essence_container() && self.0[12] == 0x02 && self.0[13] == 0x13
    }

    /// Essence wrapping declared by a container label, if recognizable.
    pub fn wrapping_type(&self) -> WrappingType {
        if !self.is_essence_container() || self.0[12] != 0x02 {
            return WrappingType::Unknown;
        }
        // mapping-kind families that encode frame/clip in the next byte
        match self.0[13] {
            // D-10 and timed text declare no frame/clip distinction here
            0x01 | 0x13 => WrappingType::Unknown,
            _ => match self.0[14] {
                0x01 => WrappingType::Frame,
                0x02 => WrappingType::Clip,
                _ => WrappingType::Unknown,
            },
        }
    }
}

impl fmt::Debug for Ul {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ul(")?;
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 && i % 4 == 0 {
                write!(f, ".")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, ")")
    }
}

impl From<UL> for Ul {
    fn from(bytes: UL) -> Self {
        Ul(bytes)
    }
}

impl Default for Ul {
    fn default() -> Self {
        Ul::null()
    }
}

/// Essence wrapping declared by a container label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrappingType {
    /// One KLV per edit unit.
    Frame,
    /// One KLV for the whole stream.
    Clip,
    /// Not declared by the label.
    #[default]
    Unknown,
}

/// Well-known label constants.
pub mod labels {
    use super::UL;

    /// Common prefix of all set/pack keys.
    pub const SET_PREFIX: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00,
    ];

    /// Partition pack key prefix; byte 13 selects header/body/footer and
    /// byte 14 open/closed and complete/incomplete.
    pub const PARTITION_PREFIX: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x00, 0x00, 0x00,
    ];

    pub const PRIMER_PACK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x05, 0x01, 0x00,
    ];

    pub const FILL_ITEM: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x02, 0x03, 0x01, 0x02, 0x10, 0x01, 0x00, 0x00, 0x00,
    ];

    pub const RANDOM_INDEX_PACK: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x11, 0x01, 0x00,
    ];

    pub const INDEX_TABLE_SEGMENT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x10, 0x01, 0x00,
    ];

    /// Prefix shared by operational pattern labels.
    pub const OP_PREFIX: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00,
    ];

    pub const OP_ATOM: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x02, 0x0D, 0x01, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00,
    ];

    pub const OP_1A: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x01, 0x01, 0x00,
    ];

    pub const OP_1B: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x02, 0x01, 0x00,
    ];

    // structural metadata set keys (byte 14 selects the set)

    pub const PREFACE: UL = set_key(0x2F);
    pub const CONTENT_STORAGE: UL = set_key(0x18);
    pub const ESSENCE_CONTAINER_DATA: UL = set_key(0x23);
    pub const MATERIAL_PACKAGE: UL = set_key(0x36);
    pub const SOURCE_PACKAGE: UL = set_key(0x37);
    pub const TIMELINE_TRACK: UL = set_key(0x3B);
    pub const STATIC_TRACK: UL = set_key(0x3A);
    pub const SEQUENCE: UL = set_key(0x0F);
    pub const SOURCE_CLIP: UL = set_key(0x11);
    pub const TIMECODE_COMPONENT: UL = set_key(0x14);
    pub const FILLER: UL = set_key(0x09);
    pub const ESSENCE_GROUP: UL = set_key(0x05);
    pub const DM_SEGMENT: UL = set_key(0x41);
    pub const NETWORK_LOCATOR: UL = set_key(0x32);
    pub const MULTIPLE_DESCRIPTOR: UL = set_key(0x44);
    pub const CDCI_DESCRIPTOR: UL = set_key(0x28);
    pub const RGBA_DESCRIPTOR: UL = set_key(0x29);
    pub const MPEG_VIDEO_DESCRIPTOR: UL = set_key(0x51);
    pub const GENERIC_SOUND_DESCRIPTOR: UL = set_key(0x42);
    pub const WAVE_AUDIO_DESCRIPTOR: UL = set_key(0x48);
    pub const AES3_AUDIO_DESCRIPTOR: UL = set_key(0x47);
    pub const VBI_DATA_DESCRIPTOR: UL = set_key(0x5B);
    pub const ANC_DATA_DESCRIPTOR: UL = set_key(0x5C);
    pub const TIMED_TEXT_DESCRIPTOR: UL = set_key(0x64);
    pub const AUDIO_CHANNEL_LABEL_SUBDESCRIPTOR: UL = set_key(0x6B);
    pub const SOUNDFIELD_GROUP_LABEL_SUBDESCRIPTOR: UL = set_key(0x6C);
    pub const TEXT_BASED_DM_FRAMEWORK: UL = set_key(0x67);
    pub const TEXT_BASED_OBJECT: UL = set_key(0x68);
    pub const TAPE_DESCRIPTOR: UL = set_key(0x2E);

    // item ULs resolved through the primer pack for dynamic local tags

    pub const ITEM_SUB_DESCRIPTORS: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x09, 0x06, 0x01, 0x01, 0x04, 0x06, 0x10, 0x00, 0x00,
    ];
    pub const ITEM_MCA_LABEL_DICTIONARY_ID: UL = mca_item(0x01);
    pub const ITEM_MCA_LINK_ID: UL = mca_item(0x05);
    pub const ITEM_MCA_TAG_SYMBOL: UL = mca_item(0x02);
    pub const ITEM_MCA_TAG_NAME: UL = mca_item(0x03);
    pub const ITEM_MCA_CHANNEL_ID: UL = mca_item(0x04);
    pub const ITEM_SOUNDFIELD_GROUP_LINK_ID: UL = mca_item(0x06);
    pub const ITEM_TEXT_BASED_OBJECT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x06, 0x01, 0x01, 0x04, 0x02, 0x05, 0x00, 0x00,
    ];
    pub const ITEM_TEXT_MIME_MEDIA_TYPE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x04, 0x09, 0x02, 0x01, 0x00, 0x00, 0x00, 0x00,
    ];
    pub const ITEM_TEXT_LANGUAGE_CODE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x03, 0x01, 0x01, 0x02, 0x02, 0x15, 0x00, 0x00,
    ];
    pub const ITEM_TEXT_DATA_DESCRIPTION: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0C, 0x04, 0x09, 0x03, 0x01, 0x00, 0x00, 0x00, 0x00,
    ];

    const fn mca_item(item: u8) -> UL {
        [
            0x06, 0x0E, 0x2B, 0x34, 0x01, 0x01, 0x01, 0x0E, 0x01, 0x03, 0x07, 0x01, item, 0x00, 0x00, 0x00,
        ]
    }

    const fn set_key(set: u8) -> UL {
        [
            0x06, 0x0E, 0x2B, 0x34, 0x02, 0x53, 0x01, 0x01, 0x0D, 0x01, 0x01, 0x01, 0x01, 0x01, set, 0x00,
        ]
    }

    // data definition labels

    pub const DDEF_PICTURE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x01, 0x00, 0x00, 0x00,
    ];
    pub const DDEF_SOUND: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
    ];
    pub const DDEF_TIMECODE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x01, 0x01, 0x00, 0x00, 0x00,
    ];
    pub const DDEF_DATA: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x02, 0x03, 0x00, 0x00, 0x00,
    ];
    pub const DDEF_DESCRIPTIVE: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x01, 0x03, 0x02, 0x01, 0x10, 0x00, 0x00, 0x00,
    ];

    // essence container labels

    pub const EC_D10: UL = container_label(0x01, 0x01);
    pub const EC_DV_FRAME: UL = container_label(0x02, 0x01);
    pub const EC_DV_CLIP: UL = container_label(0x02, 0x02);
    pub const EC_MPEG_ES_FRAME: UL = container_label(0x04, 0x01);
    pub const EC_UNCOMPRESSED_FRAME: UL = container_label(0x05, 0x01);
    pub const EC_UNCOMPRESSED_CLIP: UL = container_label(0x05, 0x02);
    pub const EC_BWF_FRAME: UL = container_label(0x06, 0x01);
    pub const EC_BWF_CLIP: UL = container_label(0x06, 0x02);
    pub const EC_AES3_FRAME: UL = container_label(0x06, 0x03);
    pub const EC_AES3_CLIP: UL = container_label(0x06, 0x04);
    pub const EC_VBI_FRAME: UL = container_label(0x0D, 0x01);
    pub const EC_ANC_FRAME: UL = container_label(0x0E, 0x01);
    pub const EC_AVC_FRAME: UL = container_label(0x10, 0x01);
    pub const EC_AVC_CLIP: UL = container_label(0x10, 0x02);
    pub const EC_TIMED_TEXT: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x03, 0x01, 0x02, 0x13, 0x01, 0x01,
    ];

    const fn container_label(mapping: u8, wrapping: u8) -> UL {
        [
            0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x01, 0x0D, 0x01, 0x03, 0x01, 0x02, mapping, wrapping, 0x00,
        ]
    }

    // picture coding labels (byte 13 selects the codec family)

    pub const PC_MPEG2_PREFIX: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x03, 0x04, 0x01, 0x02, 0x02, 0x01, 0x00, 0x00, 0x00,
    ];
    pub const PC_AVC_PREFIX: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0A, 0x04, 0x01, 0x02, 0x02, 0x01, 0x31, 0x00, 0x00,
    ];
    pub const PC_AVC_INTRA_PREFIX: UL = [
        0x06, 0x0E, 0x2B, 0x34, 0x04, 0x01, 0x01, 0x0A, 0x04, 0x01, 0x02, 0x02, 0x01, 0x32, 0x00, 0x00,
    ];
}
