//! Byte-level builders for synthesized MXF test files.
#![allow(dead_code)]

use mxfclip::ul::labels;

/// BER-encode a length, always using the 4-byte long form for partition
/// packs so sizes are stable across builder passes.
pub fn ber4(len: usize) -> [u8; 4] {
    [0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]
}

/// Minimal BER encoding.
pub fn ber(len: usize) -> Vec<u8> {
    if len < 0x80 {
        vec![len as u8]
    } else if len <= 0xFFFF {
        vec![0x82, (len >> 8) as u8, len as u8]
    } else {
        ber4(len).to_vec()
    }
}

/// A local-set metadata set under construction.
pub struct SetBuilder {
    key: [u8; 16],
    value: Vec<u8>,
}

impl SetBuilder {
    pub fn new(key: [u8; 16], instance_uid: [u8; 16]) -> Self {
        let mut builder = SetBuilder {
            key,
            value: Vec::new(),
        };
        builder.push_item(0x3C0A, &instance_uid);
        builder
    }

    fn push_item(&mut self, tag: u16, data: &[u8]) {
        self.value.extend_from_slice(&tag.to_be_bytes());
        self.value.extend_from_slice(&(data.len() as u16).to_be_bytes());
        self.value.extend_from_slice(data);
    }

    pub fn item(mut self, tag: u16, data: &[u8]) -> Self {
        self.push_item(tag, data);
        self
    }

    pub fn u16(self, tag: u16, value: u16) -> Self {
        self.item(tag, &value.to_be_bytes())
    }

    pub fn u32(self, tag: u16, value: u32) -> Self {
        self.item(tag, &value.to_be_bytes())
    }

    pub fn i64(self, tag: u16, value: i64) -> Self {
        self.item(tag, &value.to_be_bytes())
    }

    pub fn u8(self, tag: u16, value: u8) -> Self {
        self.item(tag, &[value])
    }

    pub fn rational(self, tag: u16, num: i32, den: i32) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&num.to_be_bytes());
        data.extend_from_slice(&den.to_be_bytes());
        self.item(tag, &data)
    }

    pub fn ul(self, tag: u16, label: &[u8; 16]) -> Self {
        self.item(tag, label)
    }

    pub fn umid(self, tag: u16, umid: &[u8; 32]) -> Self {
        self.item(tag, umid)
    }

    pub fn utf16(self, tag: u16, text: &str) -> Self {
        let mut data = Vec::new();
        for unit in text.encode_utf16() {
            data.extend_from_slice(&unit.to_be_bytes());
        }
        self.item(tag, &data)
    }

    pub fn uid_batch(self, tag: u16, uids: &[[u8; 16]]) -> Self {
        let mut data = Vec::new();
        data.extend_from_slice(&(uids.len() as u32).to_be_bytes());
        data.extend_from_slice(&16u32.to_be_bytes());
        for uid in uids {
            data.extend_from_slice(uid);
        }
        self.item(tag, &data)
    }

    /// Serialize to a KLV.
    pub fn build(self) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&self.key);
        data.extend(ber(self.value.len()));
        data.extend(self.value);
        data
    }
}

/// A 16-byte instance uid with a recognizable tag byte.
pub fn uid(tag: u8) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[0] = 0x10;
    bytes[15] = tag;
    bytes
}

/// A 32-byte package UMID with a recognizable tag byte.
pub fn umid(tag: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[..4].copy_from_slice(&[0x06, 0x0A, 0x2B, 0x34]);
    bytes[31] = tag;
    bytes
}

/// A generic-container essence element key for a track number.
pub fn essence_key(track_number: u32) -> [u8; 16] {
    let n = track_number.to_be_bytes();
    [
        0x06, 0x0E, 0x2B, 0x34, 0x01, 0x02, 0x01, 0x01, 0x0D, 0x01, 0x03, 0x01, n[0], n[1], n[2], n[3],
    ]
}

/// An essence element KLV.
pub fn essence_klv(track_number: u32, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(&essence_key(track_number));
    data.extend(ber(payload.len()));
    data.extend_from_slice(payload);
    data
}

/// One variable-bytes-per-edit-unit index entry.
#[derive(Debug, Clone, Copy)]
pub struct TestIndexEntry {
    pub temporal_offset: i8,
    pub key_frame_offset: i8,
    pub flags: u8,
    pub stream_offset: u64,
}

/// An index table segment KLV.
pub fn index_segment_klv(
    edit_rate: (i32, i32),
    duration: i64,
    edit_unit_byte_count: u32,
    index_sid: u32,
    body_sid: u32,
    entries: &[TestIndexEntry],
) -> Vec<u8> {
    let mut builder = SetBuilder::new(labels::INDEX_TABLE_SEGMENT, uid(0xF0))
        .rational(0x3F0B, edit_rate.0, edit_rate.1)
        .i64(0x3F0C, 0)
        .i64(0x3F0D, duration)
        .u32(0x3F05, edit_unit_byte_count)
        .u32(0x3F06, index_sid)
        .u32(0x3F07, body_sid);

    if !entries.is_empty() {
        let mut data = Vec::new();
        data.extend_from_slice(&(entries.len() as u32).to_be_bytes());
        data.extend_from_slice(&11u32.to_be_bytes());
        for entry in entries {
            data.push(entry.temporal_offset as u8);
            data.push(entry.key_frame_offset as u8);
            data.push(entry.flags);
            data.extend_from_slice(&entry.stream_offset.to_be_bytes());
        }
        builder = builder.item(0x3F0A, &data);
    }

    builder.build()
}

/// A whole synthesized MXF file.
pub struct TestMxf {
    pub op: [u8; 16],
    pub essence_containers: Vec<[u8; 16]>,
    pub body_sid: u32,
    pub index_sid: u32,
    pub primer_entries: Vec<(u16, [u8; 16])>,
    pub metadata_sets: Vec<Vec<u8>>,
    pub index_segments: Vec<Vec<u8>>,
    pub essence: Vec<Vec<u8>>,
}

impl TestMxf {
    pub fn new(op: [u8; 16]) -> Self {
        TestMxf {
            op,
            essence_containers: Vec::new(),
            body_sid: 1,
            index_sid: 2,
            primer_entries: Vec::new(),
            metadata_sets: Vec::new(),
            index_segments: Vec::new(),
            essence: Vec::new(),
        }
    }

    fn primer_klv(&self) -> Vec<u8> {
        let mut value = Vec::new();
        value.extend_from_slice(&(self.primer_entries.len() as u32).to_be_bytes());
        value.extend_from_slice(&18u32.to_be_bytes());
        for (tag, ul) in &self.primer_entries {
            value.extend_from_slice(&tag.to_be_bytes());
            value.extend_from_slice(ul);
        }

        let mut data = Vec::new();
        data.extend_from_slice(&labels::PRIMER_PACK);
        data.extend(ber(value.len()));
        data.extend(value);
        data
    }

    fn partition_klv(
        &self,
        kind: u8,
        status: u8,
        this_partition: u64,
        footer_partition: u64,
        header_byte_count: u64,
        index_byte_count: u64,
        body_sid: u32,
        index_sid: u32,
    ) -> Vec<u8> {
        let mut key = [
            0x06, 0x0E, 0x2B, 0x34, 0x02, 0x05, 0x01, 0x01, 0x0D, 0x01, 0x02, 0x01, 0x01, 0x00, 0x00, 0x00,
        ];
        key[13] = kind;
        key[14] = status;

        let mut value = Vec::new();
        value.extend_from_slice(&1u16.to_be_bytes());
        value.extend_from_slice(&3u16.to_be_bytes());
        value.extend_from_slice(&1u32.to_be_bytes()); // kag
        value.extend_from_slice(&this_partition.to_be_bytes());
        value.extend_from_slice(&0u64.to_be_bytes()); // previous
        value.extend_from_slice(&footer_partition.to_be_bytes());
        value.extend_from_slice(&header_byte_count.to_be_bytes());
        value.extend_from_slice(&index_byte_count.to_be_bytes());
        value.extend_from_slice(&index_sid.to_be_bytes());
        value.extend_from_slice(&0u64.to_be_bytes()); // body offset
        value.extend_from_slice(&body_sid.to_be_bytes());
        value.extend_from_slice(&self.op);
        value.extend_from_slice(&(self.essence_containers.len() as u32).to_be_bytes());
        value.extend_from_slice(&16u32.to_be_bytes());
        for label in &self.essence_containers {
            value.extend_from_slice(label);
        }

        let mut data = Vec::new();
        data.extend_from_slice(&key);
        data.extend_from_slice(&ber4(value.len()));
        data.extend(value);
        data
    }

    /// Serialize the file: header partition, primer + metadata, index
    /// segments, essence, footer partition.
    pub fn build(&self) -> Vec<u8> {
        let mut metadata = self.primer_klv();
        for set in &self.metadata_sets {
            metadata.extend_from_slice(set);
        }
        let header_byte_count = metadata.len() as u64;

        let index_block: Vec<u8> = self.index_segments.concat();
        let index_byte_count = index_block.len() as u64;

        let essence_block: Vec<u8> = self.essence.concat();

        let partition_size = self
            .partition_klv(0x02, 0x04, 0, 0, 0, 0, 0, 0)
            .len() as u64;
        let footer_offset =
            partition_size + header_byte_count + index_byte_count + essence_block.len() as u64;

        let mut data = self.partition_klv(
            0x02,
            0x04,
            0,
            footer_offset,
            header_byte_count,
            index_byte_count,
            self.body_sid,
            self.index_sid,
        );
        data.extend(metadata);
        data.extend(index_block);
        data.extend(essence_block);
        data.extend(self.partition_klv(0x04, 0x04, footer_offset, footer_offset, 0, 0, 0, 0));
        data
    }
}

/// Standard instance uid assignments for the basic graphs.
pub mod ids {
    pub const PREFACE: u8 = 0x01;
    pub const CONTENT_STORAGE: u8 = 0x02;
    pub const MATERIAL_PACKAGE: u8 = 0x03;
    pub const SOURCE_PACKAGE: u8 = 0x04;
    pub const MP_TRACK: u8 = 0x05;
    pub const MP_SEQUENCE: u8 = 0x06;
    pub const MP_CLIP: u8 = 0x07;
    pub const SP_TRACK: u8 = 0x08;
    pub const SP_SEQUENCE: u8 = 0x09;
    pub const SP_CLIP: u8 = 0x0A;
    pub const DESCRIPTOR: u8 = 0x0B;
    pub const ECD: u8 = 0x0C;
    pub const MP_TC_TRACK: u8 = 0x0D;
    pub const MP_TC_SEQUENCE: u8 = 0x0E;
    pub const MP_TC_COMPONENT: u8 = 0x0F;
    pub const MP_TRACK_2: u8 = 0x15;
    pub const MP_SEQUENCE_2: u8 = 0x16;
    pub const MP_CLIP_2: u8 = 0x17;
    pub const SP_TRACK_2: u8 = 0x18;
    pub const SP_SEQUENCE_2: u8 = 0x19;
    pub const SP_CLIP_2: u8 = 0x1A;
    pub const CHILD_DESCRIPTOR_1: u8 = 0x1B;
    pub const CHILD_DESCRIPTOR_2: u8 = 0x1C;
}

pub const MP_UMID_TAG: u8 = 0xA0;
pub const SP_UMID_TAG: u8 = 0xB0;

pub const PICTURE_TRACK_NUMBER: u32 = 0x15010501;
pub const SOUND_TRACK_NUMBER: u32 = 0x16020301;

/// Build the structural sets shared by single-essence-track files:
/// preface, content storage, material package with one timeline track and a
/// timecode track, a file source package with one track, and the essence
/// container data set.
#[allow(clippy::too_many_arguments)]
pub fn basic_structural_sets(
    data_def: &[u8; 16],
    edit_rate: (i32, i32),
    duration: i64,
    track_number: u32,
    descriptor_key: [u8; 16],
    descriptor_items: impl FnOnce(SetBuilder) -> SetBuilder,
    body_sid: u32,
    index_sid: u32,
) -> Vec<Vec<u8>> {
    use ids::*;

    let mut sets = Vec::new();
    sets.push(
        SetBuilder::new(labels::PREFACE, uid(PREFACE))
            .u16(0x3B05, 259)
            .item(0x3B03, &uid(CONTENT_STORAGE))
            .ul(0x3B09, &labels::OP_1A)
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::CONTENT_STORAGE, uid(CONTENT_STORAGE))
            .uid_batch(0x1901, &[uid(MATERIAL_PACKAGE), uid(SOURCE_PACKAGE)])
            .uid_batch(0x1902, &[uid(ECD)])
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::MATERIAL_PACKAGE, uid(MATERIAL_PACKAGE))
            .umid(0x4401, &umid(MP_UMID_TAG))
            .utf16(0x4402, "test clip")
            .uid_batch(0x4403, &[uid(MP_TRACK), uid(MP_TC_TRACK)])
            .build(),
    );

    // material essence track
    sets.push(
        SetBuilder::new(labels::TIMELINE_TRACK, uid(MP_TRACK))
            .u32(0x4801, 1)
            .u32(0x4804, 0)
            .rational(0x4B01, edit_rate.0, edit_rate.1)
            .i64(0x4B02, 0)
            .item(0x4803, &uid(MP_SEQUENCE))
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::SEQUENCE, uid(MP_SEQUENCE))
            .ul(0x0201, data_def)
            .i64(0x0202, duration)
            .uid_batch(0x1001, &[uid(MP_CLIP)])
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::SOURCE_CLIP, uid(MP_CLIP))
            .ul(0x0201, data_def)
            .i64(0x0202, duration)
            .i64(0x1201, 0)
            .umid(0x1101, &umid(SP_UMID_TAG))
            .u32(0x1102, 1)
            .build(),
    );

    // material timecode track: start at 01:00:00:00
    sets.push(
        SetBuilder::new(labels::TIMELINE_TRACK, uid(MP_TC_TRACK))
            .u32(0x4801, 100)
            .u32(0x4804, 0)
            .rational(0x4B01, edit_rate.0, edit_rate.1)
            .i64(0x4B02, 0)
            .item(0x4803, &uid(MP_TC_SEQUENCE))
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::SEQUENCE, uid(MP_TC_SEQUENCE))
            .ul(0x0201, &labels::DDEF_TIMECODE)
            .i64(0x0202, duration)
            .uid_batch(0x1001, &[uid(MP_TC_COMPONENT)])
            .build(),
    );
    let timecode_base = (edit_rate.0 as f64 / edit_rate.1 as f64).round() as u16;
    sets.push(
        SetBuilder::new(labels::TIMECODE_COMPONENT, uid(MP_TC_COMPONENT))
            .i64(0x0202, duration)
            .u16(0x1502, timecode_base)
            .i64(0x1501, timecode_base as i64 * 3600)
            .u8(0x1503, 0)
            .build(),
    );

    // file source package
    sets.push(
        SetBuilder::new(labels::SOURCE_PACKAGE, uid(SOURCE_PACKAGE))
            .umid(0x4401, &umid(SP_UMID_TAG))
            .uid_batch(0x4403, &[uid(SP_TRACK)])
            .item(0x4701, &uid(DESCRIPTOR))
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::TIMELINE_TRACK, uid(SP_TRACK))
            .u32(0x4801, 1)
            .u32(0x4804, track_number)
            .rational(0x4B01, edit_rate.0, edit_rate.1)
            .i64(0x4B02, 0)
            .item(0x4803, &uid(SP_SEQUENCE))
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::SEQUENCE, uid(SP_SEQUENCE))
            .ul(0x0201, data_def)
            .i64(0x0202, duration)
            .uid_batch(0x1001, &[uid(SP_CLIP)])
            .build(),
    );
    sets.push(
        SetBuilder::new(labels::SOURCE_CLIP, uid(SP_CLIP))
            .ul(0x0201, data_def)
            .i64(0x0202, duration)
            .i64(0x1201, 0)
            .umid(0x1101, &[0u8; 32])
            .u32(0x1102, 0)
            .build(),
    );

    let descriptor = descriptor_items(
        SetBuilder::new(descriptor_key, uid(DESCRIPTOR))
            .rational(0x3001, edit_rate.0, edit_rate.1)
            .i64(0x3002, duration),
    );
    sets.push(descriptor.build());

    sets.push(
        SetBuilder::new(labels::ESSENCE_CONTAINER_DATA, uid(ECD))
            .umid(0x2701, &umid(SP_UMID_TAG))
            .u32(0x3F06, index_sid)
            .u32(0x3F07, body_sid)
            .build(),
    );

    sets
}

/// A complete 25 fps uncompressed-picture file with `duration` frames of
/// `frame_size`-byte essence.
pub fn basic_video_file(duration: i64, frame_size: usize) -> TestMxf {
    let mut mxf = TestMxf::new(labels::OP_1A);
    mxf.essence_containers = vec![labels::EC_UNCOMPRESSED_FRAME];
    mxf.metadata_sets = basic_structural_sets(
        &labels::DDEF_PICTURE,
        (25, 1),
        duration,
        PICTURE_TRACK_NUMBER,
        labels::CDCI_DESCRIPTOR,
        |b| {
            b.ul(0x3004, &labels::EC_UNCOMPRESSED_FRAME)
                .u32(0x3203, 1920)
                .u32(0x3202, 1080)
                .u32(0x3209, 1920)
                .u32(0x3208, 1080)
                .rational(0x320E, 16, 9)
                .u32(0x3301, 10)
                .u32(0x3302, 2)
                .u32(0x3308, 1)
        },
        1,
        2,
    );

    let unit_size = essence_klv(PICTURE_TRACK_NUMBER, &vec![0; frame_size]).len() as u32;
    mxf.index_segments = vec![index_segment_klv((25, 1), duration, unit_size, 2, 1, &[])];
    for i in 0..duration {
        mxf.essence
            .push(essence_klv(PICTURE_TRACK_NUMBER, &vec![i as u8; frame_size]));
    }
    mxf
}
