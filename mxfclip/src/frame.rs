//! Frame payloads and the transactional per-track frame buffer.

use mxfclip_core::Rational;
use std::collections::VecDeque;

/// One decoded-container frame: opaque essence bytes plus the timeline
/// metadata a decoder needs.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Clip-timeline position of this frame.
    pub edit_unit_position: i64,
    /// Edit rate the position counts in.
    pub edit_rate: Rational,
    /// Track-local position.
    pub track_position: i64,
    /// Offset back to the anchor frame from the index entry.
    pub key_frame_offset: i8,
    /// Presentation-to-decode offset from the index entry.
    pub temporal_offset: i8,
    /// Index entry flags.
    pub flags: u8,
    /// The essence bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame carries no payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-track frame queue with transactional reads.
///
/// Frames pushed between `start_read` and `complete_read` become visible
/// atomically; `abort_read` discards them so a failed multi-reader pull
/// leaves the buffer unchanged.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    completed: VecDeque<Frame>,
    pending: Vec<Frame>,
    next_frame_position: i64,
    next_frame_edit_rate: Rational,
    next_track_position: i64,
    temporary: bool,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the clip position the next pushed frame belongs to.
    pub fn set_next_frame_position(&mut self, edit_rate: Rational, position: i64) {
        self.next_frame_edit_rate = edit_rate;
        self.next_frame_position = position;
    }

    /// Record the track-local position of the next pushed frame.
    pub fn set_next_frame_track_position(&mut self, position: i64) {
        self.next_track_position = position;
    }

    /// The recorded clip position for the next frame.
    pub fn next_frame_position(&self) -> (Rational, i64) {
        (self.next_frame_edit_rate, self.next_frame_position)
    }

    /// The recorded track-local position for the next frame.
    pub fn next_frame_track_position(&self) -> i64 {
        self.next_track_position
    }

    /// Begin a read transaction.
    pub fn start_read(&mut self) {
        self.pending.clear();
    }

    /// Push a frame into the open transaction.
    pub fn push(&mut self, frame: Frame) {
        self.pending.push(frame);
    }

    /// Commit the open transaction.
    pub fn complete_read(&mut self) {
        self.completed.extend(self.pending.drain(..));
    }

    /// Discard the open transaction.
    pub fn abort_read(&mut self) {
        self.pending.clear();
    }

    /// Pop the oldest committed frame.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.completed.pop_front()
    }

    /// Pop the newest committed frame.
    pub fn pop_last_frame(&mut self) -> Option<Frame> {
        self.completed.pop_back()
    }

    /// Number of committed frames.
    pub fn len(&self) -> usize {
        self.completed.len()
    }

    /// Whether no committed frames are queued.
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }

    /// Switch temporary mode. Used while pre-reading frames for side-band
    /// info; leaving temporary mode drops everything buffered meanwhile.
    pub fn set_temporary(&mut self, temporary: bool) {
        if self.temporary && !temporary {
            self.completed.clear();
            self.pending.clear();
        }
        self.temporary = temporary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(position: i64) -> Frame {
        Frame {
            edit_unit_position: position,
            edit_rate: Rational::fps_25(),
            track_position: position,
            key_frame_offset: 0,
            temporal_offset: 0,
            flags: 0x80,
            data: vec![0xAB; 4],
        }
    }

    #[test]
    fn test_complete_read_commits() {
        let mut buffer = FrameBuffer::new();
        buffer.start_read();
        buffer.push(frame(0));
        buffer.push(frame(1));
        assert!(buffer.is_empty());

        buffer.complete_read();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop_frame().unwrap().edit_unit_position, 0);
        assert_eq!(buffer.pop_frame().unwrap().edit_unit_position, 1);
    }

    #[test]
    fn test_abort_read_discards() {
        let mut buffer = FrameBuffer::new();
        buffer.start_read();
        buffer.push(frame(0));
        buffer.abort_read();
        buffer.complete_read();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_temporary_mode_clears_on_exit() {
        let mut buffer = FrameBuffer::new();
        buffer.set_temporary(true);
        buffer.start_read();
        buffer.push(frame(0));
        buffer.complete_read();
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.pop_last_frame().unwrap().edit_unit_position, 0);

        buffer.start_read();
        buffer.push(frame(1));
        buffer.complete_read();
        buffer.set_temporary(false);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_next_frame_positions() {
        let mut buffer = FrameBuffer::new();
        buffer.set_next_frame_position(Rational::fps_25(), 7);
        buffer.set_next_frame_track_position(9);
        assert_eq!(buffer.next_frame_position(), (Rational::fps_25(), 7));
        assert_eq!(buffer.next_frame_track_position(), 9);
    }
}
