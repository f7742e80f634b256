//! The pluggable frame-boundary parser contract.

/// The outcome of an incremental frame-size parse.
///
/// Interlaced codecs that wrap one field per container unit (e.g. Avid
/// MJPEG) report the two field sizes separately so consumers can aggregate
/// both fields into one logical edit unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedFrameSize {
    /// More bytes are needed before the size is known.
    Unknown,
    /// The data is not a valid frame. Terminal.
    Null,
    /// A complete single frame of the given size.
    Frame(u32),
    /// The first field of a two-field frame is complete; the second field
    /// size is still pending. More bytes are needed.
    FirstField(u32),
    /// Both fields of a two-field frame.
    Fields { first: u32, second: u32 },
}

impl ParsedFrameSize {
    /// True when the full frame size is known.
    pub fn is_complete(&self) -> bool {
        matches!(self, ParsedFrameSize::Frame(_) | ParsedFrameSize::Fields { .. })
    }

    /// True when the parser needs more bytes to decide.
    pub fn needs_more_data(&self) -> bool {
        matches!(self, ParsedFrameSize::Unknown | ParsedFrameSize::FirstField(_))
    }

    /// True when the data was rejected as not a frame boundary.
    pub fn is_null(&self) -> bool {
        matches!(self, ParsedFrameSize::Null)
    }

    /// Total size in bytes of a complete frame, fields combined.
    pub fn size(&self) -> u32 {
        match self {
            ParsedFrameSize::Frame(size) => *size,
            ParsedFrameSize::Fields { first, second } => first + second,
            _ => 0,
        }
    }

    /// Last-resort completion at end of stream: assume the remaining
    /// `data_size` bytes are valid frame data.
    ///
    /// A pending second field is completed by the bytes past the first
    /// field; a plain unknown becomes a whole frame if any bytes remain.
    pub fn complete_size(self, data_size: u32) -> Option<ParsedFrameSize> {
        match self {
            ParsedFrameSize::Frame(_) | ParsedFrameSize::Fields { .. } => Some(self),
            ParsedFrameSize::FirstField(first) if data_size > first => Some(ParsedFrameSize::Fields {
                first,
                second: data_size - first,
            }),
            ParsedFrameSize::Unknown if data_size > 0 => Some(ParsedFrameSize::Frame(data_size)),
            _ => None,
        }
    }
}

/// Codec-specific frame boundary detection over a raw byte buffer.
///
/// `parse_frame_size` must be resumable: repeated calls with progressively
/// larger buffers (always starting at the same frame start) continue where
/// the previous call left off. Implementations keep whatever private state
/// they need between calls; `reset_parse_frame_size` is the only way to
/// discard it.
pub trait EssenceParser {
    /// Locate the byte offset of the first recognizable frame start within
    /// the window, or `None` if there is none.
    fn parse_frame_start(&mut self, data: &[u8]) -> Option<usize>;

    /// Clear incremental frame-size parser state.
    fn reset_parse_frame_size(&mut self);

    /// Parse the size of the frame starting at offset 0 of `data`.
    fn parse_frame_size(&mut self, data: &[u8]) -> ParsedFrameSize;

    /// Populate codec-specific side info from a complete frame.
    fn parse_frame_info(&mut self, data: &[u8], frame_size: ParsedFrameSize) {
        let _ = (data, frame_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_frame_size_states() {
        assert!(ParsedFrameSize::Unknown.needs_more_data());
        assert!(ParsedFrameSize::FirstField(100).needs_more_data());
        assert!(ParsedFrameSize::Null.is_null());
        assert!(ParsedFrameSize::Frame(10).is_complete());
        assert!(ParsedFrameSize::Fields { first: 4, second: 6 }.is_complete());
    }

    #[test]
    fn test_parsed_frame_size_total() {
        assert_eq!(ParsedFrameSize::Frame(10).size(), 10);
        assert_eq!(ParsedFrameSize::Fields { first: 4, second: 6 }.size(), 10);
        assert_eq!(ParsedFrameSize::Unknown.size(), 0);
    }

    #[test]
    fn test_complete_size() {
        assert_eq!(
            ParsedFrameSize::Unknown.complete_size(100),
            Some(ParsedFrameSize::Frame(100))
        );
        assert_eq!(ParsedFrameSize::Unknown.complete_size(0), None);
        assert_eq!(
            ParsedFrameSize::FirstField(60).complete_size(100),
            Some(ParsedFrameSize::Fields { first: 60, second: 40 })
        );
        assert_eq!(ParsedFrameSize::FirstField(100).complete_size(100), None);
        assert_eq!(ParsedFrameSize::Null.complete_size(100), None);
        // already complete sizes pass through unchanged
        assert_eq!(
            ParsedFrameSize::Frame(10).complete_size(100),
            Some(ParsedFrameSize::Frame(10))
        );
    }
}
