//! Error types for raw essence reading.

use thiserror::Error;

/// Errors that can occur while framing raw essence.
#[derive(Error, Debug)]
pub enum EssenceError {
    /// I/O error from the essence source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A parse was requested without a configured parser.
    #[error("No essence parser configured")]
    NoParser,

    /// The incremental parse exceeded the configured sample-size guard.
    #[error("Maximum raw sample size {0} exceeded")]
    MaxSampleSize(u32),
}

/// Result type alias using our EssenceError type.
pub type Result<T> = std::result::Result<T, EssenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EssenceError::MaxSampleSize(1024);
        assert!(err.to_string().contains("1024"));
    }
}
