//! Essence type classification from descriptors and container labels.

use crate::metadata::{DataDef, Descriptor};
use crate::ul::{labels, Ul};

/// The coded essence families the reader distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EssenceType {
    UncompressedPicture,
    D10,
    Dv,
    Mpeg2LongGop,
    Avc,
    AvcIntra50,
    AvcIntra100,
    AvcIntra200,
    WavePcm,
    D10Aes3Pcm,
    VbiData,
    AncData,
    TimedText,
    Unknown,
}

impl EssenceType {
    /// Inter-frame-coded types need precharge/rollout around a target
    /// position.
    pub fn is_inter_frame_coded(&self) -> bool {
        matches!(self, EssenceType::Mpeg2LongGop | EssenceType::Avc)
    }

    /// Whether leading frames must be pre-read for side-band info. VBI and
    /// ANC tracks read the caller's configured manifest frame count; the
    /// others read one frame.
    pub fn requires_frame_info(&self) -> bool {
        matches!(
            self,
            EssenceType::AvcIntra50
                | EssenceType::AvcIntra100
                | EssenceType::AvcIntra200
                | EssenceType::D10Aes3Pcm
                | EssenceType::VbiData
                | EssenceType::AncData
        )
    }

    /// Whether this type carries a VBI or ANC data manifest.
    pub fn is_st436(&self) -> bool {
        matches!(self, EssenceType::VbiData | EssenceType::AncData)
    }
}

/// Classify a descriptor + essence container label pair.
pub fn classify_essence(data_def: DataDef, descriptor: &Descriptor, container_label: Ul) -> EssenceType {
    use crate::metadata::DescriptorKind;

    match descriptor.kind {
        DescriptorKind::TimedText => return EssenceType::TimedText,
        DescriptorKind::Vbi => return EssenceType::VbiData,
        DescriptorKind::Anc => return EssenceType::AncData,
        _ => {}
    }

    let container = if container_label.is_null() {
        descriptor.essence_container
    } else {
        container_label
    };
    let mapping = container_mapping(&container);

    // the D-10 container carries both the picture and the AES3 sound
    if mapping == Some(0x01) {
        return match data_def {
            DataDef::Sound => EssenceType::D10Aes3Pcm,
            _ => EssenceType::D10,
        };
    }

    match data_def {
        DataDef::Picture => {
            if let Some(picture) = descriptor.picture.as_ref() {
                let coding = &picture.picture_essence_coding;
                if has_prefix(coding, &labels::PC_AVC_INTRA_PREFIX, 14) {
                    return match coding.as_bytes()[14] & 0xF0 {
                        0x10 => EssenceType::AvcIntra50,
                        0x30 => EssenceType::AvcIntra200,
                        _ => EssenceType::AvcIntra100,
                    };
                }
                if has_prefix(coding, &labels::PC_AVC_PREFIX, 14) {
                    return EssenceType::Avc;
                }
                if has_prefix(coding, &labels::PC_MPEG2_PREFIX, 13) {
                    return EssenceType::Mpeg2LongGop;
                }
            }
            match mapping {
                Some(0x02) => EssenceType::Dv,
                Some(0x05) => EssenceType::UncompressedPicture,
                Some(0x04) => EssenceType::Mpeg2LongGop,
                Some(0x10) => EssenceType::Avc,
                _ => EssenceType::Unknown,
            }
        }
        DataDef::Sound => match mapping {
            Some(0x06) => EssenceType::WavePcm,
            _ => {
                if descriptor.kind == DescriptorKind::WaveAudio || descriptor.kind == DescriptorKind::Aes3 {
                    EssenceType::WavePcm
                } else {
                    EssenceType::Unknown
                }
            }
        },
        _ => EssenceType::Unknown,
    }
}

/// The mapping-kind byte of a generic-container label.
fn container_mapping(label: &Ul) -> Option<u8> {
    if label.is_essence_container() && label.as_bytes()[12] == 0x02 {
        Some(label.as_bytes()[13])
    } else {
        None
    }
}

fn has_prefix(label: &Ul, prefix: &[u8; 16], len: usize) -> bool {
    // byte 7 is the registry version and may differ
    let a = label.as_bytes();
    a[..7] == prefix[..7] && a[8..len] == prefix[8..len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::DescriptorKind;

    fn picture_descriptor(coding: [u8; 16]) -> Descriptor {
        let mut descriptor = Descriptor::new(DescriptorKind::Cdci);
        descriptor.picture.as_mut().unwrap().picture_essence_coding = Ul(coding);
        descriptor
    }

    #[test]
    fn test_classify_wave_pcm() {
        let descriptor = Descriptor::new(DescriptorKind::WaveAudio);
        assert_eq!(
            classify_essence(DataDef::Sound, &descriptor, Ul(labels::EC_BWF_FRAME)),
            EssenceType::WavePcm
        );
    }

    #[test]
    fn test_classify_d10_sides() {
        let picture = Descriptor::new(DescriptorKind::Cdci);
        assert_eq!(
            classify_essence(DataDef::Picture, &picture, Ul(labels::EC_D10)),
            EssenceType::D10
        );
        let sound = Descriptor::new(DescriptorKind::GenericSound);
        assert_eq!(
            classify_essence(DataDef::Sound, &sound, Ul(labels::EC_D10)),
            EssenceType::D10Aes3Pcm
        );
    }

    #[test]
    fn test_classify_avc_intra() {
        let mut coding = labels::PC_AVC_INTRA_PREFIX;
        coding[14] = 0x21;
        let descriptor = picture_descriptor(coding);
        assert_eq!(
            classify_essence(DataDef::Picture, &descriptor, Ul(labels::EC_AVC_FRAME)),
            EssenceType::AvcIntra100
        );
        assert!(EssenceType::AvcIntra100.requires_frame_info());
        assert!(!EssenceType::AvcIntra100.is_inter_frame_coded());
    }

    #[test]
    fn test_classify_avc_long_gop() {
        let mut coding = labels::PC_AVC_PREFIX;
        coding[14] = 0x52;
        let descriptor = picture_descriptor(coding);
        let essence_type = classify_essence(DataDef::Picture, &descriptor, Ul(labels::EC_AVC_FRAME));
        assert_eq!(essence_type, EssenceType::Avc);
        assert!(essence_type.is_inter_frame_coded());
    }

    #[test]
    fn test_classify_falls_back_to_descriptor_container() {
        let descriptor = {
            let mut d = Descriptor::new(DescriptorKind::Cdci);
            d.essence_container = Ul(labels::EC_UNCOMPRESSED_FRAME);
            d
        };
        assert_eq!(
            classify_essence(DataDef::Picture, &descriptor, Ul::null()),
            EssenceType::UncompressedPicture
        );
    }

    #[test]
    fn test_classify_timed_text() {
        let descriptor = Descriptor::new(DescriptorKind::TimedText);
        assert_eq!(
            classify_essence(DataDef::Data, &descriptor, Ul(labels::EC_TIMED_TEXT)),
            EssenceType::TimedText
        );
    }
}
