//! # mxfclip-core
//!
//! Core types and utilities for the mxfclip MXF clip reader.
//!
//! This crate provides the building blocks shared by the reader crates:
//! - Error handling types
//! - Normalized edit-rate rationals and position/duration conversion
//! - Sample sequences for cross-rate timeline arithmetic
//! - UMID material identifiers
//! - SMPTE timecode

pub mod error;
pub mod rational;
pub mod sequence;
pub mod timecode;
pub mod umid;

pub use error::{CoreError, Result};
pub use rational::{Rational, Rounding};
pub use sequence::SampleSequence;
pub use timecode::Timecode;
pub use umid::Umid;
