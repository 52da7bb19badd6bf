//! Error types for record decoding in sensorgate-types.

use thiserror::Error;

/// Errors that can occur when turning a sensor line into a record.
///
/// This error type is platform-agnostic and does not include
/// BLE or serial errors (those belong in sensorgate-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The line could not be parsed in the configured decode mode.
    #[error("Malformed line: {0}")]
    Malformed(String),

    /// The line parsed, but the top-level value is not an object.
    #[error("Expected a key/value object, got {0}")]
    NotAnObject(String),

    /// A field required by the sensor class is absent.
    #[error("Missing field '{0}'")]
    MissingField(String),

    /// A field required by the sensor class is not numeric.
    #[error("Field '{field}' is not numeric: {value}")]
    InvalidField {
        /// The field name after renaming.
        field: String,
        /// The offending value, as text.
        value: String,
    },

    /// The configured sensor class or decode mode is unknown.
    #[error("Unknown {kind} '{value}'")]
    Unknown {
        /// What was being parsed (`sensor class`, `decode mode`).
        kind: &'static str,
        /// The rejected input.
        value: String,
    },
}

/// Result type alias using sensorgate-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;
