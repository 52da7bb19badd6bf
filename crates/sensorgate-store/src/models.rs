//! Data models for stored readings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use sensorgate_types::DecodedRecord;

/// A reading stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Database row ID.
    pub id: i64,
    /// Capture time in Unix milliseconds.
    pub ts_ms: i64,
    /// Peripheral name.
    pub device: String,
    /// Sensor identifier.
    pub sensor_id: String,
    /// Decoded key/value object.
    pub payload: Value,
}

impl StoredReading {
    /// Build an unsaved reading from a decoded record.
    pub fn from_record(record: &DecodedRecord) -> Self {
        Self {
            id: 0, // Will be set by database
            ts_ms: record.captured_at_ms,
            device: record.device.clone(),
            sensor_id: record.sensor_id.clone(),
            payload: Value::Object(record.fields.clone()),
        }
    }

    /// Capture time as a UTC timestamp, if representable.
    pub fn captured_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(self.ts_ms) * 1_000_000).ok()
    }
}
