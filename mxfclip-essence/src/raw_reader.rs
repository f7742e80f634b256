//! Buffered reader that frames a raw essence stream into sized samples.

use crate::error::{EssenceError, Result};
use crate::parser::{EssenceParser, ParsedFrameSize};
use crate::source::EssenceSource;

const READ_BLOCK_SIZE: u32 = 8192;
const PARSE_FRAME_START_SIZE: u32 = 8192;

/// Reads sized samples out of an unstructured essence byte stream.
///
/// The reader owns a growable sample buffer. With a fixed sample size it
/// bulk-reads whole samples; otherwise it drives the configured
/// [`EssenceParser`] incrementally, pulling `read_block_size` bytes at a
/// time until the parser resolves a frame boundary.
pub struct RawEssenceReader {
    source: Box<dyn EssenceSource>,
    parser: Option<Box<dyn EssenceParser>>,
    buffer: Vec<u8>,
    max_read_length: u64,
    total_read_length: u64,
    max_sample_size: u32,
    fixed_sample_size: u32,
    sample_data_size: u32,
    num_samples: u32,
    frame_start_size: u32,
    read_block_size: u32,
    read_first_sample: bool,
    last_sample_read: bool,
}

impl RawEssenceReader {
    /// Create a reader over an essence source.
    pub fn new(source: Box<dyn EssenceSource>) -> Self {
        Self {
            source,
            parser: None,
            buffer: Vec::with_capacity(READ_BLOCK_SIZE as usize),
            max_read_length: 0,
            total_read_length: 0,
            max_sample_size: 0,
            fixed_sample_size: 0,
            sample_data_size: 0,
            num_samples: 0,
            frame_start_size: PARSE_FRAME_START_SIZE,
            read_block_size: READ_BLOCK_SIZE,
            read_first_sample: false,
            last_sample_read: false,
        }
    }

    /// Set the frame-boundary parser. Required unless a fixed sample size
    /// is configured.
    pub fn set_essence_parser(&mut self, parser: Box<dyn EssenceParser>) {
        self.parser = Some(parser);
    }

    /// Cap the cumulative number of bytes pulled from the source
    /// (0 = unlimited).
    pub fn set_max_read_length(&mut self, len: u64) {
        self.max_read_length = len;
    }

    /// Number of bytes pulled for the initial frame-start search.
    pub fn set_frame_start_size(&mut self, len: u32) {
        self.frame_start_size = len;
    }

    /// Number of bytes pulled per incremental parse step.
    pub fn set_read_block_size(&mut self, len: u32) {
        self.read_block_size = len;
    }

    /// Bypass the parser: every sample is exactly `size` bytes
    /// (0 = parse-driven).
    pub fn set_fixed_sample_size(&mut self, size: u32) {
        self.fixed_sample_size = size;
    }

    /// Guard against runaway parses: exceeding this per-sample size is an
    /// error (0 = unchecked).
    pub fn set_check_max_sample_size(&mut self, size: u32) {
        self.max_sample_size = size;
    }

    /// Read up to `num_samples` samples into the sample buffer. Returns the
    /// number of complete samples now available via [`Self::sample_data`].
    pub fn read_samples(&mut self, num_samples: u32) -> Result<u32> {
        if self.last_sample_read {
            return Ok(0);
        }

        // shift bytes left over from the previous read to the buffer start;
        // needed even with a fixed sample size because the previous read may
        // have run parse-driven
        self.buffer.drain(..self.sample_data_size as usize);
        self.sample_data_size = 0;
        self.num_samples = 0;

        if self.fixed_sample_size == 0 {
            for _ in 0..num_samples {
                if !self.read_and_parse_sample()? {
                    break;
                }
            }
        } else {
            let wanted = self.fixed_sample_size as u64 * num_samples as u64;
            if wanted > self.buffer.len() as u64 {
                self.read_bytes((wanted - self.buffer.len() as u64) as u32);
            }
            if (self.buffer.len() as u64) < wanted {
                self.last_sample_read = true;
            }

            self.num_samples = self.buffer.len() as u32 / self.fixed_sample_size;
            self.sample_data_size = self.num_samples * self.fixed_sample_size;
            self.buffer.truncate(self.sample_data_size as usize);
        }

        Ok(self.num_samples)
    }

    /// The bytes of the samples produced by the last [`Self::read_samples`].
    pub fn sample_data(&self) -> &[u8] {
        &self.buffer[..self.sample_data_size as usize]
    }

    /// Number of samples produced by the last [`Self::read_samples`].
    pub fn num_samples(&self) -> u32 {
        self.num_samples
    }

    /// Total sample bytes produced by the last [`Self::read_samples`].
    pub fn sample_data_size(&self) -> u32 {
        self.sample_data_size
    }

    /// Size of one sample from the last read. Only meaningful with a fixed
    /// sample size or a single parsed sample.
    pub fn sample_size(&self) -> Option<u32> {
        if self.num_samples > 0 && (self.fixed_sample_size > 0 || self.num_samples == 1) {
            Some(self.sample_data_size / self.num_samples)
        } else {
            None
        }
    }

    /// True once the stream end was reached or parsing terminated.
    pub fn last_sample_read(&self) -> bool {
        self.last_sample_read
    }

    /// Cumulative bytes pulled from the source.
    pub fn total_read_length(&self) -> u64 {
        self.total_read_length
    }

    /// Rewind the source and clear all reader state.
    pub fn reset(&mut self) -> Result<()> {
        self.source.seek_start()?;
        self.total_read_length = 0;
        self.buffer.clear();
        self.sample_data_size = 0;
        self.num_samples = 0;
        self.read_first_sample = false;
        self.last_sample_read = false;
        Ok(())
    }

    fn read_and_parse_sample(&mut self) -> Result<bool> {
        let mut parser = self.parser.take().ok_or(EssenceError::NoParser)?;
        let result = self.parse_one_sample(parser.as_mut());
        self.parser = Some(parser);
        result
    }

    fn parse_one_sample(&mut self, parser: &mut dyn EssenceParser) -> Result<bool> {
        let sample_start = self.sample_data_size as usize;

        if !self.read_first_sample {
            // find the start of the first sample
            self.read_bytes(self.frame_start_size);
            let offset = match parser.parse_frame_start(&self.buffer[sample_start..]) {
                Some(offset) => offset,
                None => {
                    log::warn!("Failed to find start of raw essence sample");
                    self.last_sample_read = true;
                    return Ok(false);
                }
            };

            // discard any bytes before the first sample start
            if offset > 0 {
                self.buffer.drain(sample_start..sample_start + offset);
            }

            self.read_first_sample = true;
        } else {
            self.read_bytes(self.read_block_size);
        }

        parser.reset_parse_frame_size();

        let mut sample_size;
        loop {
            sample_size = parser.parse_frame_size(&self.buffer[sample_start..]);
            if !sample_size.needs_more_data() {
                break;
            }

            if self.max_sample_size > 0 && (self.buffer.len() - sample_start) as u32 > self.max_sample_size {
                return Err(EssenceError::MaxSampleSize(self.max_sample_size));
            }

            if self.read_bytes(self.read_block_size) == 0 {
                break;
            }
        }

        // pull remaining bytes if the declared size exceeds what is buffered
        let mut sample_num_read = (self.buffer.len() - sample_start) as u32;
        if sample_size.is_complete() && sample_size.size() > sample_num_read {
            sample_num_read += self.read_bytes(sample_size.size() - sample_num_read);
            if sample_size.size() > sample_num_read {
                log::warn!(
                    "Failed to read last remaining {} bytes in frame",
                    sample_size.size() - sample_num_read
                );
                self.last_sample_read = true;
                return Ok(false);
            }
        }

        if sample_size.is_null() {
            self.last_sample_read = true;
            return Ok(false);
        }

        if sample_size.needs_more_data() {
            // end of stream mid-frame: assume the remaining bytes are valid
            // sample data and try to complete the size
            self.last_sample_read = true;
            if let Some(completed) = sample_size.complete_size(sample_num_read) {
                self.sample_data_size += completed.size();
                self.num_samples += 1;
            }
            return Ok(false);
        }

        self.sample_data_size += sample_size.size();
        self.num_samples += 1;
        Ok(true)
    }

    /// Pull up to `size` bytes from the source into the buffer, honoring the
    /// cumulative read cap. Short counts at end of stream are not errors.
    fn read_bytes(&mut self, size: u32) -> u32 {
        debug_assert!(self.max_read_length == 0 || self.total_read_length <= self.max_read_length);

        let mut actual_size = size as u64;
        if self.max_read_length > 0 && self.total_read_length + actual_size > self.max_read_length {
            actual_size = self.max_read_length - self.total_read_length;
        }
        if actual_size == 0 {
            return 0;
        }

        let old_len = self.buffer.len();
        self.buffer.resize(old_len + actual_size as usize, 0);

        let mut num_read = 0usize;
        while num_read < actual_size as usize {
            match self.source.read(&mut self.buffer[old_len + num_read..]) {
                Ok(0) => break,
                Ok(n) => num_read += n,
                Err(e) => {
                    log::error!("Failed to read from raw essence source: {}", e);
                    break;
                }
            }
        }

        self.buffer.truncate(old_len + num_read);
        self.total_read_length += num_read as u64;
        num_read as u32
    }

    /// Push-mode entry: append caller-provided bytes instead of pulling from
    /// the source. Returns the number of bytes accepted under the read cap.
    pub fn append_bytes(&mut self, bytes: &[u8]) -> u32 {
        let mut actual_size = bytes.len() as u64;
        if self.max_read_length > 0 && self.total_read_length + actual_size > self.max_read_length {
            actual_size = self.max_read_length - self.total_read_length;
        }
        if actual_size == 0 {
            return 0;
        }

        self.buffer.extend_from_slice(&bytes[..actual_size as usize]);
        self.total_read_length += actual_size;
        actual_size as u32
    }
}
