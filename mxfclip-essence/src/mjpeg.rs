//! MJPEG frame-size parser for Avid MJPEG essence streams.
//!
//! Frames are baseline JPEG images delimited by SOI (`FFD8`) and EOI
//! (`FFD9`). Interlaced material stores one field per image; with
//! `single_field == false` two back-to-back field images form one logical
//! frame and the parser reports both field sizes.
//!
//! Parsing is incremental: the marker state, in-segment length bytes and
//! skip counters survive across `parse_frame_size` calls so the parser can
//! resume where the previous, shorter buffer ended.

use crate::parser::{EssenceParser, ParsedFrameSize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expect the 0xFF of the next marker.
    MarkerPrefix,
    /// Expect the marker type byte.
    MarkerType,
    /// Expect the first segment length byte.
    LenByte1,
    /// Expect the second segment length byte.
    LenByte2,
    /// Skipping segment payload bytes.
    SkipSegment,
    /// Scanning entropy-coded data for a 0xFF.
    ScanEntropy,
    /// Saw 0xFF inside entropy-coded data; classify the next byte.
    EntropyMarker,
}

/// Incremental MJPEG frame-size parser.
pub struct MjpegEssenceParser {
    single_field: bool,

    offset: usize,
    state: State,

    len_byte1: u8,
    in_sos_segment: bool,
    skip_count: u32,

    field_count: u32,
    first_field_size: u32,
}

impl MjpegEssenceParser {
    /// Create a parser. `single_field` selects whether one image is a whole
    /// frame or one field of a two-field frame.
    pub fn new(single_field: bool) -> Self {
        Self {
            single_field,
            offset: 0,
            state: State::MarkerPrefix,
            len_byte1: 0,
            in_sos_segment: false,
            skip_count: 0,
            field_count: 0,
            first_field_size: 0,
        }
    }

    /// Standalone markers carry no length field.
    fn is_standalone(marker: u8) -> bool {
        marker == 0x01 || (0xD0..=0xD9).contains(&marker)
    }

    fn handle_marker(&mut self, marker: u8) -> Option<ParsedFrameSize> {
        match marker {
            0xFF => {
                // fill byte, stay in place
            }
            0xD9 => {
                // EOI: one complete image
                self.field_count += 1;
                if self.single_field || self.field_count == 2 {
                    let total = self.offset as u32;
                    return Some(if self.single_field {
                        ParsedFrameSize::Frame(total)
                    } else {
                        ParsedFrameSize::Fields {
                            first: self.first_field_size,
                            second: total - self.first_field_size,
                        }
                    });
                }
                self.first_field_size = self.offset as u32;
                self.state = State::MarkerPrefix;
            }
            m if Self::is_standalone(m) => {
                self.state = State::MarkerPrefix;
            }
            m => {
                self.in_sos_segment = m == 0xDA;
                self.state = State::LenByte1;
            }
        }
        None
    }
}

impl EssenceParser for MjpegEssenceParser {
    fn parse_frame_start(&mut self, data: &[u8]) -> Option<usize> {
        data.windows(2).position(|w| w == [0xFF, 0xD8])
    }

    fn reset_parse_frame_size(&mut self) {
        self.offset = 0;
        self.state = State::MarkerPrefix;
        self.len_byte1 = 0;
        self.in_sos_segment = false;
        self.skip_count = 0;
        self.field_count = 0;
        self.first_field_size = 0;
    }

    fn parse_frame_size(&mut self, data: &[u8]) -> ParsedFrameSize {
        while self.offset < data.len() {
            let byte = data[self.offset];

            match self.state {
                State::MarkerPrefix => {
                    if byte != 0xFF {
                        return ParsedFrameSize::Null;
                    }
                    self.state = State::MarkerType;
                }
                State::MarkerType => {
                    self.offset += 1;
                    if let Some(complete) = self.handle_marker(byte) {
                        return complete;
                    }
                    continue;
                }
                State::LenByte1 => {
                    self.len_byte1 = byte;
                    self.state = State::LenByte2;
                }
                State::LenByte2 => {
                    let len = ((self.len_byte1 as u32) << 8) | byte as u32;
                    if len < 2 {
                        return ParsedFrameSize::Null;
                    }
                    self.skip_count = len - 2;
                    self.state = if self.skip_count > 0 {
                        State::SkipSegment
                    } else if self.in_sos_segment {
                        State::ScanEntropy
                    } else {
                        State::MarkerPrefix
                    };
                }
                State::SkipSegment => {
                    let available = (data.len() - self.offset) as u32;
                    let skipped = available.min(self.skip_count);
                    self.skip_count -= skipped;
                    self.offset += skipped as usize;
                    if self.skip_count == 0 {
                        self.state = if self.in_sos_segment {
                            State::ScanEntropy
                        } else {
                            State::MarkerPrefix
                        };
                    }
                    continue;
                }
                State::ScanEntropy => {
                    if byte == 0xFF {
                        self.state = State::EntropyMarker;
                    }
                }
                State::EntropyMarker => {
                    match byte {
                        // byte stuffing and restart markers stay in the scan
                        0x00 => self.state = State::ScanEntropy,
                        m if (0xD0..=0xD7).contains(&m) => self.state = State::ScanEntropy,
                        0xFF => {}
                        m => {
                            self.offset += 1;
                            if let Some(complete) = self.handle_marker(m) {
                                return complete;
                            }
                            continue;
                        }
                    }
                }
            }

            self.offset += 1;
        }

        if !self.single_field && self.field_count == 1 {
            ParsedFrameSize::FirstField(self.first_field_size)
        } else {
            ParsedFrameSize::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A minimal single-field JPEG: SOI, one tagged segment, SOS with a tiny
    /// entropy run, EOI.
    fn minimal_image(entropy: &[u8]) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8]; // SOI
        data.extend([0xFF, 0xDB, 0x00, 0x04, 0xAA, 0xBB]); // DQT, len 4
        data.extend([0xFF, 0xDA, 0x00, 0x02]); // SOS, len 2
        data.extend(entropy);
        data.extend([0xFF, 0xD9]); // EOI
        data
    }

    #[test]
    fn test_parse_frame_start() {
        let mut parser = MjpegEssenceParser::new(true);
        let mut data = vec![0x00, 0x01];
        data.extend(minimal_image(&[0x12, 0x34]));
        assert_eq!(parser.parse_frame_start(&data), Some(2));
        assert_eq!(parser.parse_frame_start(&[0x00; 16]), None);
    }

    #[test]
    fn test_parse_single_field_frame() {
        let image = minimal_image(&[0x12, 0x34, 0x56]);
        let mut parser = MjpegEssenceParser::new(true);
        parser.reset_parse_frame_size();
        assert_eq!(
            parser.parse_frame_size(&image),
            ParsedFrameSize::Frame(image.len() as u32)
        );
    }

    #[test]
    fn test_parse_two_field_frame() {
        let field1 = minimal_image(&[0x12, 0x34]);
        let field2 = minimal_image(&[0x56, 0x78, 0x9A]);
        let mut data = field1.clone();
        data.extend(&field2);

        let mut parser = MjpegEssenceParser::new(false);
        parser.reset_parse_frame_size();
        assert_eq!(
            parser.parse_frame_size(&data),
            ParsedFrameSize::Fields {
                first: field1.len() as u32,
                second: field2.len() as u32,
            }
        );
    }

    #[test]
    fn test_first_field_pending() {
        let field1 = minimal_image(&[0x12]);
        let mut parser = MjpegEssenceParser::new(false);
        parser.reset_parse_frame_size();
        assert_eq!(
            parser.parse_frame_size(&field1),
            ParsedFrameSize::FirstField(field1.len() as u32)
        );
    }

    #[test]
    fn test_entropy_stuffing_and_restart() {
        // 0xFF00 stuffing and an RST marker inside the entropy run must not
        // terminate the image
        let image = minimal_image(&[0x11, 0xFF, 0x00, 0x22, 0xFF, 0xD3, 0x33]);
        let mut parser = MjpegEssenceParser::new(true);
        parser.reset_parse_frame_size();
        assert_eq!(
            parser.parse_frame_size(&image),
            ParsedFrameSize::Frame(image.len() as u32)
        );
    }

    #[test]
    fn test_invalid_leading_byte() {
        let mut parser = MjpegEssenceParser::new(true);
        parser.reset_parse_frame_size();
        assert_eq!(parser.parse_frame_size(&[0x12, 0x34]), ParsedFrameSize::Null);
    }

    #[test]
    fn test_resumable_split_parse() {
        let image = minimal_image(&[0x11, 0x22, 0x33, 0x44]);

        // parse the whole image in one call
        let mut whole = MjpegEssenceParser::new(true);
        whole.reset_parse_frame_size();
        let expected = whole.parse_frame_size(&image);
        assert!(expected.is_complete());

        // for every split point, parse the prefix then the full buffer
        for split in 1..image.len() {
            let mut parser = MjpegEssenceParser::new(true);
            parser.reset_parse_frame_size();
            let first = parser.parse_frame_size(&image[..split]);
            assert!(
                first.needs_more_data(),
                "split {} unexpectedly terminal: {:?}",
                split,
                first
            );
            assert_eq!(parser.parse_frame_size(&image), expected, "split {}", split);
        }
    }

    #[test]
    fn test_reset_discards_state() {
        let image = minimal_image(&[0x11]);
        let mut parser = MjpegEssenceParser::new(true);
        parser.reset_parse_frame_size();
        // consume part of the image, then reset and parse from scratch
        let partial = parser.parse_frame_size(&image[..5]);
        assert!(partial.needs_more_data());
        parser.reset_parse_frame_size();
        assert_eq!(
            parser.parse_frame_size(&image),
            ParsedFrameSize::Frame(image.len() as u32)
        );
    }
}
