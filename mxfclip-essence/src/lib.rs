//! # mxfclip-essence
//!
//! Raw essence framing for the mxfclip MXF clip reader.
//!
//! A raw essence stream is a bare concatenation of coded frames with no
//! container framing. This crate turns such a stream into an ordered
//! sequence of sized samples:
//! - [`EssenceSource`] abstracts the byte stream
//! - [`EssenceParser`] is the pluggable codec-specific frame-boundary
//!   detector with incremental, resumable parsing
//! - [`RawEssenceReader`] drives the parser over a growable buffer
//! - [`MjpegEssenceParser`] is the in-tree parser for Avid MJPEG streams,
//!   including the interlaced one-field-per-wrap layout

pub mod error;
pub mod mjpeg;
pub mod parser;
pub mod raw_reader;
pub mod source;

pub use error::{EssenceError, Result};
pub use mjpeg::MjpegEssenceParser;
pub use parser::{EssenceParser, ParsedFrameSize};
pub use raw_reader::RawEssenceReader;
pub use source::{EssenceSource, FileEssenceSource, MemoryEssenceSource};
