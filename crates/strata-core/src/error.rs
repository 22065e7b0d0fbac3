//! Error types for schema inference.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while inferring a schema from a payload.
#[derive(Error, Debug)]
pub enum Error {
    /// The payload contains a JSON shape the engine cannot map to a
    /// column or table (null, empty array, array of numbers, nested
    /// array, mixed-type array element, ...).
    #[error("unsupported shape at '{path}': {detail}")]
    UnsupportedShape {
        /// Dotted field path from the payload root, e.g. `msg.votes[1]`.
        path: String,
        /// Description of what was found.
        detail: String,
    },

    /// A numeric field does not fit a 64-bit integer column.
    #[error("non-integer number at '{path}': {value}")]
    NonIntegerNumber {
        /// Dotted field path from the payload root.
        path: String,
        /// The offending value, rendered as text.
        value: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn unsupported(path: &str, detail: impl Into<String>) -> Self {
        Self::UnsupportedShape {
            path: path.to_string(),
            detail: detail.into(),
        }
    }
}
