//! End-to-end open and read tests over synthesized MXF files.

mod common;

use common::*;
use mxfclip::byte_source::MemoryByteSource;
use mxfclip::ul::labels;
use mxfclip::{DataDef, EssenceType, FileReader, MxfError, OpenOptions, OpenResult, WrappingType};
use std::path::Path;

fn open_bytes(data: Vec<u8>) -> mxfclip::Result<FileReader> {
    FileReader::open_source(
        Box::new(MemoryByteSource::new(data)),
        Path::new("test.mxf"),
        OpenOptions::default(),
    )
}

#[test]
fn test_open_basic_video_file() {
    let reader = open_bytes(basic_video_file(10, 100).build()).unwrap();

    assert_eq!(reader.track_count(), 1);
    assert_eq!(reader.duration(), 10);
    assert_eq!(reader.origin(), 0);
    assert_eq!(reader.edit_rate(), mxfclip_core::Rational::new(25, 1));
    assert_eq!(reader.wrapping_type(), WrappingType::Frame);
    assert_eq!(reader.body_sid(), 1);
    assert_eq!(reader.index_sid(), 2);
    assert!(reader.op_label().is_op_1a());
    assert!(reader.is_complete());
    assert!(reader.is_seekable());
    assert_eq!(reader.material_package_name(), Some("test clip"));
    assert_eq!(reader.mxf_version(), 259);

    let info = reader.track_info(0).unwrap();
    assert_eq!(info.common().data_def, DataDef::Picture);
    assert_eq!(info.common().essence_type, EssenceType::UncompressedPicture);
    assert_eq!(info.common().duration, 10);
    let picture = info.as_picture().unwrap();
    assert_eq!(picture.stored_width, 1920);
    assert_eq!(picture.stored_height, 1080);
    assert!(picture.is_cdci);
    assert_eq!(picture.component_depth, 10);
}

#[test]
fn test_material_start_timecode() {
    let reader = open_bytes(basic_video_file(10, 100).build()).unwrap();
    let timecode = reader.material_start_timecode().unwrap();
    assert_eq!(timecode.rounded_base(), 25);
    assert_eq!(timecode.to_string(), "01:00:00:00");
}

#[test]
fn test_read_frames() {
    let mut reader = open_bytes(basic_video_file(10, 100).build()).unwrap();

    assert_eq!(reader.read(4), 4);
    assert_eq!(reader.position(), 4);
    for expected in 0..4u8 {
        let frame = reader.take_frame(0).unwrap();
        assert_eq!(frame.edit_unit_position, expected as i64);
        assert_eq!(frame.size(), 100);
        assert_eq!(frame.data[0], expected);
    }
    assert!(reader.take_frame(0).is_none());

    // reads never exceed the request and stop at the end
    assert_eq!(reader.read(20), 6);
    assert_eq!(reader.position(), 10);
    assert_eq!(reader.read(1), 0);
    assert!(!reader.read_error());
}

#[test]
fn test_seek_and_read() {
    let mut reader = open_bytes(basic_video_file(10, 100).build()).unwrap();

    reader.seek(7).unwrap();
    assert_eq!(reader.position(), 7);
    assert_eq!(reader.read(1), 1);
    let frame = reader.take_frame(0).unwrap();
    assert_eq!(frame.edit_unit_position, 7);
    assert_eq!(frame.data[0], 7);
    assert_eq!(reader.position(), 8);
}

#[test]
fn test_intra_codec_has_no_precharge_or_rollout() {
    let reader = open_bytes(basic_video_file(10, 100).build()).unwrap();
    for position in 0..10 {
        assert_eq!(reader.max_precharge(position, false).unwrap(), 0);
        assert_eq!(reader.max_rollout(position, false).unwrap(), 0);
    }
    assert_eq!(reader.read_limits(false).unwrap(), (0, 10));
}

#[test]
fn test_disabled_track_reads_no_frames() {
    let mut reader = open_bytes(basic_video_file(10, 100).build()).unwrap();
    reader.set_track_enabled(0, false);
    assert!(!reader.is_enabled());
    assert_eq!(reader.read(2), 0);
    assert!(reader.take_frame(0).is_none());
}

/// A long-GOP variant of the basic file with explicit index entries.
fn long_gop_file(entries: &[TestIndexEntry]) -> Vec<u8> {
    let duration = entries.len() as i64;
    let frame_size = 100usize;
    let mut mxf = TestMxf::new(labels::OP_1A);
    mxf.essence_containers = vec![labels::EC_MPEG_ES_FRAME];

    let mut coding = labels::PC_MPEG2_PREFIX;
    coding[13] = 0x01;
    coding[14] = 0x03;
    mxf.metadata_sets = basic_structural_sets(
        &labels::DDEF_PICTURE,
        (25, 1),
        duration,
        PICTURE_TRACK_NUMBER,
        labels::MPEG_VIDEO_DESCRIPTOR,
        |b| {
            b.ul(0x3004, &labels::EC_MPEG_ES_FRAME)
                .ul(0x3201, &coding)
                .u32(0x3203, 1920)
                .u32(0x3202, 1080)
        },
        1,
        2,
    );

    let unit_size = essence_klv(PICTURE_TRACK_NUMBER, &vec![0; frame_size]).len() as u64;
    let sized: Vec<TestIndexEntry> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| TestIndexEntry {
            stream_offset: i as u64 * unit_size,
            ..*e
        })
        .collect();
    mxf.index_segments = vec![index_segment_klv((25, 1), duration, 0, 2, 1, &sized)];
    for i in 0..duration {
        mxf.essence
            .push(essence_klv(PICTURE_TRACK_NUMBER, &vec![i as u8; frame_size]));
    }
    mxf.build()
}

fn entry(temporal_offset: i8, key_frame_offset: i8) -> TestIndexEntry {
    TestIndexEntry {
        temporal_offset,
        key_frame_offset,
        flags: if key_frame_offset == 0 { 0x80 } else { 0x00 },
        stream_offset: 0,
    }
}

#[test]
fn test_inter_frame_precharge_from_key_frame_offsets() {
    // repeating GOP: key frame every third unit
    let entries: Vec<TestIndexEntry> = [0, -1, -2, 0, -1, -2, 0, -1, -2, 0]
        .iter()
        .map(|&k| entry(0, k))
        .collect();
    let reader = open_bytes(long_gop_file(&entries)).unwrap();

    let info = reader.track_info(0).unwrap();
    assert_eq!(info.common().essence_type, EssenceType::Mpeg2LongGop);

    assert_eq!(reader.max_precharge(2, false).unwrap(), -2);
    assert_eq!(reader.max_precharge(3, false).unwrap(), 0);
    assert_eq!(reader.max_precharge(5, false).unwrap(), -2);
    assert_eq!(reader.max_rollout(2, false).unwrap(), 0);
}

#[test]
fn test_b_frame_precharge_resolves_through_anchor() {
    // the entry at position 4 is a B frame referencing the anchor at 2,
    // which itself points back two units
    let mut entries: Vec<TestIndexEntry> = (0..10).map(|_| entry(0, 0)).collect();
    entries[2] = entry(0, -2);
    entries[4] = entry(-2, 0);
    let reader = open_bytes(long_gop_file(&entries)).unwrap();

    assert_eq!(reader.max_precharge(4, false).unwrap(), -4);
}

#[test]
fn test_rollout_from_temporal_offset() {
    let mut entries: Vec<TestIndexEntry> = (0..10).map(|_| entry(0, 0)).collect();
    entries[6] = entry(2, 0);
    let reader = open_bytes(long_gop_file(&entries)).unwrap();

    assert_eq!(reader.max_rollout(6, false).unwrap(), 2);
    assert_eq!(reader.max_rollout(7, false).unwrap(), 0);
}

#[test]
fn test_read_restores_position_after_abort() {
    let mut reader = open_bytes(basic_video_file(10, 100).build()).unwrap();
    reader.seek(3).unwrap();
    let position = reader.position();
    assert_eq!(reader.read(2), 2);
    assert_eq!(reader.position(), position + 2);
}

#[test]
fn test_open_not_an_mxf_file() {
    let error = open_bytes(b"RIFF not an mxf file at all....".to_vec()).unwrap_err();
    assert_eq!(error.open_result(), OpenResult::InvalidFile);
}

#[test]
fn test_open_no_header_metadata() {
    // a header partition with nothing after it: the metadata block the
    // partition advertises is missing entirely
    let built = TestMxf::new(labels::OP_1A).build();
    let primer_offset = built
        .windows(16)
        .position(|w| w == labels::PRIMER_PACK)
        .unwrap();
    let header_only = built[..primer_offset].to_vec();

    let error = open_bytes(header_only).unwrap_err();
    assert_eq!(error.open_result(), OpenResult::NoHeaderMetadata);
}

#[test]
fn test_open_missing_index_table() {
    let mut mxf = basic_video_file(4, 50);
    mxf.index_segments.clear();
    let error = open_bytes(mxf.build()).unwrap_err();
    assert!(matches!(error, MxfError::NoIndexTable));
    assert_eq!(error.open_result(), OpenResult::NoIndexTable);
}

#[test]
fn test_non_seekable_source_reads_sequentially() {
    let data = basic_video_file(5, 64).build();
    let mut reader = FileReader::open_source(
        Box::new(MemoryByteSource::new_non_seekable(data)),
        Path::new("stream.mxf"),
        OpenOptions::default(),
    )
    .unwrap();

    assert!(!reader.is_seekable());
    // the extent cannot be confirmed without seeking
    assert!(!reader.is_complete());
    assert_eq!(reader.duration(), 5);

    assert_eq!(reader.read(3), 3);
    let frame = reader.take_frame(0).unwrap();
    assert_eq!(frame.edit_unit_position, 0);
    assert_eq!(frame.size(), 64);
    assert_eq!(reader.read(10), 2);
}

#[test]
fn test_file_ids_lists_this_file() {
    let reader = open_bytes(basic_video_file(2, 16).build()).unwrap();
    assert_eq!(reader.file_ids(), vec![reader.file_id()]);
}

/// A video file with an additional timed-text track whose material
/// sequence leads with filler.
fn timed_text_file(duration: i64, tt_lead_filler: i64) -> Vec<u8> {
    let tt_sp_umid_tag = 0xD0;
    let tt_sp = uid(0x40);
    let tt_sp_track = uid(0x41);
    let tt_sp_sequence = uid(0x42);
    let tt_sp_clip = uid(0x43);
    let tt_descriptor = uid(0x44);
    let tt_mp_track = uid(0x45);
    let tt_mp_sequence = uid(0x46);
    let tt_mp_filler = uid(0x47);
    let tt_mp_clip = uid(0x48);
    let tt_ecd = uid(0x49);

    let mut mxf = basic_video_file(duration, 64);
    mxf.essence_containers.push(labels::EC_TIMED_TEXT);

    // splice the timed-text sets into the structural graph: the content
    // storage and material package gain references, the rest are new sets
    mxf.metadata_sets[1] = SetBuilder::new(labels::CONTENT_STORAGE, uid(ids::CONTENT_STORAGE))
        .uid_batch(
            0x1901,
            &[uid(ids::MATERIAL_PACKAGE), uid(ids::SOURCE_PACKAGE), tt_sp],
        )
        .uid_batch(0x1902, &[uid(ids::ECD), tt_ecd])
        .build();
    mxf.metadata_sets[2] = SetBuilder::new(labels::MATERIAL_PACKAGE, uid(ids::MATERIAL_PACKAGE))
        .umid(0x4401, &umid(MP_UMID_TAG))
        .utf16(0x4402, "tt clip")
        .uid_batch(0x4403, &[uid(ids::MP_TRACK), uid(ids::MP_TC_TRACK), tt_mp_track])
        .build();

    mxf.metadata_sets.push(
        SetBuilder::new(labels::TIMELINE_TRACK, tt_mp_track)
            .u32(0x4801, 3)
            .u32(0x4804, 0)
            .rational(0x4B01, 25, 1)
            .i64(0x4B02, 0)
            .item(0x4803, &tt_mp_sequence)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::SEQUENCE, tt_mp_sequence)
            .ul(0x0201, &labels::DDEF_DATA)
            .i64(0x0202, tt_lead_filler + duration)
            .uid_batch(0x1001, &[tt_mp_filler, tt_mp_clip])
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::FILLER, tt_mp_filler)
            .ul(0x0201, &labels::DDEF_DATA)
            .i64(0x0202, tt_lead_filler)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::SOURCE_CLIP, tt_mp_clip)
            .ul(0x0201, &labels::DDEF_DATA)
            .i64(0x0202, duration)
            .i64(0x1201, 0)
            .umid(0x1101, &umid(tt_sp_umid_tag))
            .u32(0x1102, 1)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::SOURCE_PACKAGE, tt_sp)
            .umid(0x4401, &umid(tt_sp_umid_tag))
            .uid_batch(0x4403, &[tt_sp_track])
            .item(0x4701, &tt_descriptor)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::TIMELINE_TRACK, tt_sp_track)
            .u32(0x4801, 1)
            .u32(0x4804, 0x17080101)
            .rational(0x4B01, 25, 1)
            .i64(0x4B02, 0)
            .item(0x4803, &tt_sp_sequence)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::SEQUENCE, tt_sp_sequence)
            .ul(0x0201, &labels::DDEF_DATA)
            .i64(0x0202, duration)
            .uid_batch(0x1001, &[tt_sp_clip])
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::SOURCE_CLIP, tt_sp_clip)
            .ul(0x0201, &labels::DDEF_DATA)
            .i64(0x0202, duration)
            .i64(0x1201, 0)
            .umid(0x1101, &[0u8; 32])
            .u32(0x1102, 0)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::TIMED_TEXT_DESCRIPTOR, tt_descriptor)
            .rational(0x3001, 25, 1)
            .i64(0x3002, duration)
            .ul(0x3004, &labels::EC_TIMED_TEXT)
            .utf16(0x4405, "UTF-8")
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::ESSENCE_CONTAINER_DATA, tt_ecd)
            .umid(0x2701, &umid(tt_sp_umid_tag))
            .u32(0x3F07, 3)
            .build(),
    );

    mxf.build()
}

#[test]
fn test_timed_text_lead_filler_folds_into_duration() {
    let reader = open_bytes(timed_text_file(10, 5)).unwrap();

    assert_eq!(reader.track_count(), 2);
    assert_eq!(reader.duration(), 10);

    let picture = reader.track_info(0).unwrap();
    assert_eq!(picture.common().data_def, DataDef::Picture);
    assert_eq!(picture.common().lead_filler_offset, 0);

    let text = reader.track_info(1).unwrap();
    assert_eq!(text.common().data_def, DataDef::Data);
    assert_eq!(text.common().essence_type, EssenceType::TimedText);
    // the lead filler moved into the duration and the manifest start
    assert_eq!(text.common().lead_filler_offset, 0);
    assert_eq!(text.common().duration, 15);
    let manifest = text.as_data().unwrap().timed_text_manifest.as_ref().unwrap();
    assert_eq!(manifest.start, 5);
    assert_eq!(manifest.ucs_encoding.as_deref(), Some("UTF-8"));
}

#[test]
fn test_text_objects_from_static_dm_track() {
    let dm_track = uid(0x50);
    let dm_sequence = uid(0x51);
    let dm_segment = uid(0x52);
    let dm_framework = uid(0x53);
    let text_object = uid(0x54);

    let mut mxf = basic_video_file(4, 32);
    mxf.primer_entries = vec![
        (0x8101, labels::ITEM_TEXT_BASED_OBJECT),
        (0x8102, labels::ITEM_TEXT_MIME_MEDIA_TYPE),
        (0x8103, labels::ITEM_TEXT_LANGUAGE_CODE),
    ];
    mxf.metadata_sets[2] = SetBuilder::new(labels::MATERIAL_PACKAGE, uid(ids::MATERIAL_PACKAGE))
        .umid(0x4401, &umid(MP_UMID_TAG))
        .utf16(0x4402, "test clip")
        .uid_batch(0x4403, &[uid(ids::MP_TRACK), uid(ids::MP_TC_TRACK), dm_track])
        .build();
    mxf.metadata_sets.push(
        SetBuilder::new(labels::STATIC_TRACK, dm_track)
            .u32(0x4801, 200)
            .u32(0x4804, 0)
            .item(0x4803, &dm_sequence)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::SEQUENCE, dm_sequence)
            .ul(0x0201, &labels::DDEF_DESCRIPTIVE)
            .uid_batch(0x1001, &[dm_segment])
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::DM_SEGMENT, dm_segment)
            .ul(0x0201, &labels::DDEF_DESCRIPTIVE)
            .item(0x6101, &dm_framework)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::TEXT_BASED_DM_FRAMEWORK, dm_framework)
            .item(0x8101, &text_object)
            .build(),
    );
    mxf.metadata_sets.push(
        SetBuilder::new(labels::TEXT_BASED_OBJECT, text_object)
            .utf16(0x8102, "application/xml")
            .utf16(0x8103, "en")
            .build(),
    );

    let reader = open_bytes(mxf.build()).unwrap();
    assert_eq!(reader.text_objects().len(), 1);
    let object = &reader.text_objects()[0];
    assert_eq!(object.material_track_id, 200);
    assert_eq!(object.component_index, 0);
    assert_eq!(object.mime_type.as_deref(), Some("application/xml"));
    assert_eq!(object.language_code.as_deref(), Some("en"));
}

#[test]
fn test_unsupported_component_in_material_sequence() {
    // a timecode component inside a picture track sequence is not a
    // SourceClip, Filler or EssenceGroup
    let mut mxf = basic_video_file(4, 32);
    let bogus = uid(0x60);
    mxf.metadata_sets[4] = SetBuilder::new(labels::SEQUENCE, uid(ids::MP_SEQUENCE))
        .ul(0x0201, &labels::DDEF_PICTURE)
        .i64(0x0202, 4)
        .uid_batch(0x1001, &[bogus, uid(ids::MP_CLIP)])
        .build();
    mxf.metadata_sets.push(
        SetBuilder::new(labels::TIMECODE_COMPONENT, bogus)
            .i64(0x0202, 4)
            .u16(0x1502, 25)
            .i64(0x1501, 0)
            .u8(0x1503, 0)
            .build(),
    );

    let error = open_bytes(mxf.build()).unwrap_err();
    assert_eq!(error.open_result(), OpenResult::NotSupported);
}
