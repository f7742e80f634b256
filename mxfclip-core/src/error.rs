//! Error types for the core crate.

use crate::rational::Rational;
use thiserror::Error;

/// Errors raised by the core timeline arithmetic.
#[derive(Error, Debug)]
pub enum CoreError {
    /// An edit rate with a zero denominator or numerator where one is required.
    #[error("Invalid edit rate: {0}")]
    InvalidRate(Rational),

    /// No integer sample sequence exists for the rate pair.
    #[error("Edit rate {higher} is incompatible with clip edit rate {lower}")]
    IncompatibleRates { lower: Rational, higher: Rational },

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias using our CoreError type.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        CoreError::InvalidParameter(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::IncompatibleRates {
            lower: Rational::new(25, 1),
            higher: Rational::new(44100, 1),
        };
        assert!(err.to_string().contains("44100"));
        assert!(err.to_string().contains("25"));
    }
}
