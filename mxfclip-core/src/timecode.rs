//! SMPTE 12M start timecode extracted from MXF timecode components.
//!
//! MXF stores timecode as a rounded integer base (e.g. 30 for 29.97 fps), a
//! drop-frame flag and a frame offset. This mirrors that representation and
//! renders it as `HH:MM:SS:FF` (or `HH:MM:SS;FF` for drop frame).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A start timecode at a rounded integer base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timecode {
    rounded_base: u16,
    drop_frame: bool,
    offset: i64,
}

impl Timecode {
    /// Create a timecode from a rounded base, drop-frame flag and frame
    /// offset. Drop frame is only honored for the 30 and 60 bases.
    pub fn new(rounded_base: u16, drop_frame: bool, offset: i64) -> Self {
        let drop_frame = drop_frame && (rounded_base == 30 || rounded_base == 60);
        Self {
            rounded_base,
            drop_frame,
            offset: offset.max(0),
        }
    }

    /// The rounded timecode base (frames per second).
    pub fn rounded_base(&self) -> u16 {
        self.rounded_base
    }

    /// Whether this is drop-frame timecode.
    pub fn is_drop_frame(&self) -> bool {
        self.drop_frame
    }

    /// The frame offset from midnight.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Split into display fields, compensating dropped frame numbers.
    ///
    /// Frame numbers 0..drop are skipped at the start of every minute except
    /// each tenth minute (2 per minute at base 30, 4 at base 60).
    fn fields(&self) -> (u8, u8, u8, u8) {
        let base = self.rounded_base as i64;
        if base == 0 {
            return (0, 0, 0, 0);
        }

        let (total_minutes, display_frames) = if self.drop_frame {
            let drop = base / 15;
            let frames_per_minute = base * 60 - drop;
            let frames_per_ten_minutes = frames_per_minute * 10 + drop;

            let ten_minute_blocks = self.offset / frames_per_ten_minutes;
            let rem = self.offset % frames_per_ten_minutes;
            // the first minute of each ten-minute block has no dropped frames
            let (extra_minutes, rem) = if rem < base * 60 {
                (0, rem)
            } else {
                let after_first = rem - base * 60;
                (1 + after_first / frames_per_minute, after_first % frames_per_minute)
            };
            let display = if extra_minutes > 0 { rem + drop } else { rem };
            (ten_minute_blocks * 10 + extra_minutes, display)
        } else {
            (self.offset / (base * 60), self.offset % (base * 60))
        };

        let frames = (display_frames % base) as u8;
        let seconds = ((display_frames / base) % 60) as u8;
        let minutes = (total_minutes % 60) as u8;
        let hours = ((total_minutes / 60) % 24) as u8;
        (hours, minutes, seconds, frames)
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (h, m, s, fr) = self.fields();
        let sep = if self.drop_frame { ';' } else { ':' };
        write!(f, "{:02}:{:02}:{:02}{}{:02}", h, m, s, sep, fr)
    }
}
