//! Error types for the MXF reader.

use thiserror::Error;

/// Result type alias using our MxfError type.
pub type Result<T> = std::result::Result<T, MxfError>;

/// Errors that can occur while opening or reading an MXF file.
#[derive(Error, Debug)]
pub enum MxfError {
    /// IO error during read/seek.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not open the underlying file.
    #[error("Could not open file: {0}")]
    OpenFail(String),

    /// Invalid or not an MXF file.
    #[error("Invalid MXF file: {0}")]
    InvalidFile(String),

    /// Structurally valid but outside the implementation envelope.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// No partition carries header metadata.
    #[error("Header metadata not found")]
    NoHeaderMetadata,

    /// Header metadata present but undecodable or inconsistent.
    #[error("Invalid header metadata: {0}")]
    InvalidHeaderMetadata(String),

    /// No usable essence in the file.
    #[error("No essence available")]
    NoEssence,

    /// The essence has no index table.
    #[error("No essence index table")]
    NoIndexTable,

    /// The index table does not cover the essence.
    #[error("Incomplete index table")]
    IncompleteIndexTable,

    /// Invalid KLV structure.
    #[error("Invalid KLV at offset {offset}: {message}")]
    InvalidKlv { message: String, offset: u64 },

    /// BER length encoding error.
    #[error("BER encoding error: {0}")]
    Ber(String),

    /// Timeline arithmetic error.
    #[error("Timeline error: {0}")]
    Core(#[from] mxfclip_core::CoreError),

    /// Catch-all failure.
    #[error("{0}")]
    Other(String),
}

/// The single result code reported by the open operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenResult {
    Success,
    OpenFail,
    InvalidFile,
    NotSupported,
    NoHeaderMetadata,
    InvalidHeaderMetadata,
    NoEssence,
    NoIndexTable,
    IncompleteIndexTable,
    GeneralFail,
}

impl OpenResult {
    /// Human-readable description, mirroring the open error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpenResult::Success => "success",
            OpenResult::OpenFail => "could not open file",
            OpenResult::InvalidFile => "invalid or not an MXF file",
            OpenResult::NotSupported => "not supported",
            OpenResult::NoHeaderMetadata => "header metadata not found",
            OpenResult::InvalidHeaderMetadata => "invalid header metadata",
            OpenResult::NoEssence => "no essence available",
            OpenResult::NoIndexTable => "no essence index table",
            OpenResult::IncompleteIndexTable => "incomplete index table",
            OpenResult::GeneralFail => "general error",
        }
    }
}

impl MxfError {
    /// Classify this error into the open result code set.
    pub fn open_result(&self) -> OpenResult {
        match self {
            MxfError::OpenFail(_) => OpenResult::OpenFail,
            MxfError::InvalidFile(_) | MxfError::InvalidKlv { .. } | MxfError::Ber(_) => OpenResult::InvalidFile,
            MxfError::NotSupported(_) | MxfError::Core(_) => OpenResult::NotSupported,
            MxfError::NoHeaderMetadata => OpenResult::NoHeaderMetadata,
            MxfError::InvalidHeaderMetadata(_) => OpenResult::InvalidHeaderMetadata,
            MxfError::NoEssence => OpenResult::NoEssence,
            MxfError::NoIndexTable => OpenResult::NoIndexTable,
            MxfError::IncompleteIndexTable => OpenResult::IncompleteIndexTable,
            MxfError::Io(_) | MxfError::Other(_) => OpenResult::GeneralFail,
        }
    }

    /// Create a catch-all error.
    pub fn other(msg: impl Into<String>) -> Self {
        MxfError::Other(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MxfError::InvalidKlv {
            message: "truncated".into(),
            offset: 1000,
        };
        assert!(err.to_string().contains("1000"));
    }

    #[test]
    fn test_open_result_classification() {
        assert_eq!(
            MxfError::NoHeaderMetadata.open_result(),
            OpenResult::NoHeaderMetadata
        );
        assert_eq!(
            MxfError::NotSupported("x".into()).open_result(),
            OpenResult::NotSupported
        );
        assert_eq!(
            MxfError::InvalidFile("y".into()).open_result(),
            OpenResult::InvalidFile
        );
    }

    #[test]
    fn test_open_result_strings() {
        assert_eq!(OpenResult::Success.as_str(), "success");
        assert_eq!(OpenResult::GeneralFail.as_str(), "general error");
    }
}
