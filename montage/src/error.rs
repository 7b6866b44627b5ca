//! Error types for stitching operations.

use thiserror::Error;

/// Invalid input detected before any pairwise work starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigurationError {
    #[error("Stitching needs at least 2 tiles, got {0}")]
    TooFewTiles(usize),

    #[error("Grid width must be at least 1, got {0}")]
    InvalidGridWidth(usize),

    #[error(
        "Tile {index} is {width}x{height}, expected {expected_width}x{expected_height} like the first tile"
    )]
    DimensionMismatch {
        index: usize,
        width: usize,
        height: usize,
        expected_width: usize,
        expected_height: usize,
    },

    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Errors that abort a stitching run.
#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Stitching cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_few_tiles_message() {
        let err = Error::from(ConfigurationError::TooFewTiles(1));
        assert_eq!(err.to_string(), "Stitching needs at least 2 tiles, got 1");
    }

    #[test]
    fn test_dimension_mismatch_message() {
        let err = ConfigurationError::DimensionMismatch {
            index: 3,
            width: 90,
            height: 100,
            expected_width: 100,
            expected_height: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("Tile 3"));
        assert!(msg.contains("90x100"));
        assert!(msg.contains("expected 100x100"));
    }

    #[test]
    fn test_invalid_parameter_message() {
        let err = ConfigurationError::InvalidParameter {
            name: "scale",
            reason: "must be in (0, 1], got 1.5".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid parameter `scale`: must be in (0, 1], got 1.5"
        );
    }

    #[test]
    fn test_cancelled_message() {
        assert_eq!(Error::Cancelled.to_string(), "Stitching cancelled");
    }
}
