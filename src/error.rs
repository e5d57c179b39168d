//! # Error Types
//!
//! Custom error types for the blackbox decoder using `thiserror`.

use thiserror::Error;

/// Main error type for the blackbox decoder
#[derive(Debug, Error)]
pub enum BblDecoderError {
    /// I/O errors while opening or mapping the log file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The input file contains no bytes at all
    #[error("Log file is zero bytes long")]
    EmptyLog,

    /// The requested sub-log does not exist in this file
    #[error("Sub-log index {index} out of range (file contains {count} logs)")]
    InvalidLogIndex { index: usize, count: usize },

    /// The selected sub-log ended before any data frame was seen
    #[error("Log contained no data frames")]
    NoFrames,

    /// Data frames started before the main field names were declared
    #[error("Log is missing its main field name definitions")]
    MissingFieldDefinitions,

    /// A predictor needed a named field the header never declared
    #[error("{predictor} prediction requires the {field} field, which is not defined")]
    MissingFieldIndex {
        predictor: &'static str,
        field: &'static str,
    },

    /// The field-definition table carried a predictor code we don't understand
    #[error("Unsupported field predictor {0}")]
    UnknownPredictor(u16),

    /// The field-definition table carried an encoding code we don't understand
    #[error("Unsupported field encoding {0}")]
    UnknownEncoding(u8),
}

/// Result type alias for the blackbox decoder
pub type Result<T> = std::result::Result<T, BblDecoderError>;
