//! Error types for sensorgate-core.
//!
//! This module defines the errors raised by the BLE link layer and the
//! serial transport. None of them cross a queue boundary: device workers
//! log link errors and reconnect, and the serial bridge converts transport
//! errors into degraded replies after its single recovery attempt.
//!
//! # Recovery by error type
//!
//! | Error Type | Who handles it | Strategy |
//! |------------|----------------|----------|
//! | [`Error::Bluetooth`] | device worker | cleanup, reconnect after delay |
//! | [`Error::NotConnected`] | device worker | cleanup, reconnect after delay |
//! | [`Error::MissingNotify`] | device worker | cleanup, reconnect after delay |
//! | [`Error::CharacteristicNotFound`] | device worker | fatal for notify endpoint, logged for command endpoint |
//! | [`Error::WriteFailed`] | device worker | logged, not fatal |
//! | [`Error::Serial`] / [`Error::Io`] | serial bridge | recover port, retry once |
//! | [`Error::Timeout`] | both | treated like the underlying I/O failure |
//! | [`Error::InvalidConfig`] | caller | fix configuration and restart |

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur on the BLE link or the serial transport.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Serial port error.
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Peripheral not found during lookup.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Operation attempted while not connected (link dropped or port closed).
    #[error("Not connected")]
    NotConnected,

    /// Required BLE characteristic not found on the peripheral.
    #[error("Characteristic not found: {uuid} (searched {searched} characteristics)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of characteristics that were searched.
        searched: usize,
    },

    /// The notify endpoint exists but does not support notifications.
    #[error("Characteristic {0} does not support notifications")]
    MissingNotify(String),

    /// Write operation failed.
    #[error("Write failed to {target}: {reason}")]
    WriteFailed {
        /// Characteristic UUID or descriptor handle.
        target: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(identifier.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, searched: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            searched,
        }
    }

    /// Create a write failure.
    pub fn write_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using sensorgate-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
