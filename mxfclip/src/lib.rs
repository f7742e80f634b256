//! # mxfclip
//!
//! MXF (Material eXchange Format) clip reader.
//!
//! MXF is the SMPTE 377 container for professional broadcast essence. This
//! crate reads MXF files and exposes the contained essence as a set of
//! sample-addressable tracks aligned on a common timeline:
//!
//! - header metadata resolution across the material package, file source
//!   packages and externally referenced companion files
//! - a multi-file timeline that keeps the internal essence stream and any
//!   external streams frame-aligned under arbitrary edit-rate ratios
//! - precharge and rollout queries for inter-frame-coded essence
//! - KLV, partition, primer and index-table decoding
//!
//! # Example
//!
//! ```no_run
//! use mxfclip::FileReader;
//!
//! let mut reader = FileReader::open("clip.mxf").unwrap();
//! println!("{} tracks, duration {}", reader.track_count(), reader.duration());
//!
//! reader.read(1);
//! for track in 0..reader.track_count() {
//!     if let Some(frame) = reader.take_frame(track) {
//!         println!("track {}: {} bytes at {}", track, frame.size(), frame.edit_unit_position);
//!     }
//! }
//! ```

pub mod byte_source;
pub mod error;
pub mod essence;
pub mod essence_type;
pub mod file_index;
pub mod frame;
pub mod index;
pub mod klv;
pub mod metadata;
pub mod partition;
pub mod reader;
pub mod resolver;
pub mod track;
pub mod ul;

pub use byte_source::{ByteSource, FileByteSource, MemoryByteSource};
pub use error::{MxfError, OpenResult, Result};
pub use essence_type::EssenceType;
pub use file_index::{FileId, FileIndex, McaLabelIndex};
pub use frame::{Frame, FrameBuffer};
pub use index::{IndexEntry, IndexTable, IndexTableSegment};
pub use metadata::{DataDef, HeaderMetadata};
pub use partition::{PartitionKind, PartitionPack};
pub use reader::{FileReader, OpenOptions, TextObject};
pub use resolver::{
    DefaultFileFactory, DefaultPackageResolver, FileFactory, PackageResolver, ResolvedPackage,
    SourceClipRef,
};
pub use track::{PictureTrackInfo, SoundTrackInfo, TrackInfo, TrackReader};
pub use ul::{Ul, WrappingType, UL};
