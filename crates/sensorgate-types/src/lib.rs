//! Platform-agnostic types for the sensorgate field gateway.
//!
//! This crate provides the record and configuration vocabulary shared by
//! the BLE/serial runtime (sensorgate-core), the local store and the
//! gateway service.
//!
//! # Features
//!
//! - Decoded sensor records and typed measurements
//! - Sensor classes and line decode modes
//! - UUID constants for the Bluno serial-over-BLE service
//! - Error types for record decoding
//!
//! # Example
//!
//! ```
//! use sensorgate_types::{DecodeMode, SensorClass};
//!
//! let class: SensorClass = "amb".parse().unwrap();
//! assert_eq!(class.required_fields(), &["gas", "temp", "hum", "pres"]);
//! assert_eq!(DecodeMode::default(), DecodeMode::Json);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{DecodeError, DecodeResult};
pub use types::{DecodeMode, DecodedRecord, Measurement, SensorClass};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value, json};

    fn ambient_fields(gas: f64, temp: f64, hum: f64, pres: f64) -> Map<String, Value> {
        match json!({"gas": gas, "temp": temp, "hum": hum, "pres": pres}) {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_extra_keys_are_ignored() {
        let mut fields = ambient_fields(1.0, 2.0, 3.0, 4.0);
        fields.insert("rssi".into(), json!(-60));
        fields.insert("note".into(), json!("hello"));
        let m = Measurement::from_fields(SensorClass::Ambient, &fields).unwrap();
        assert_eq!(m.class(), SensorClass::Ambient);
    }

    #[test]
    fn test_door_record_rejects_ambient_fields() {
        let fields = ambient_fields(1.0, 2.0, 3.0, 4.0);
        let err = Measurement::from_fields(SensorClass::Door, &fields).unwrap_err();
        assert_eq!(err, DecodeError::MissingField("light".into()));
    }

    #[test]
    fn test_error_display() {
        let err = DecodeError::Unknown {
            kind: "sensor class",
            value: "xyz".into(),
        };
        assert_eq!(err.to_string(), "Unknown sensor class 'xyz'");
        let err = DecodeError::InvalidField {
            field: "temp".into(),
            value: "\"hot\"".into(),
        };
        assert!(err.to_string().contains("temp"));
    }

    #[test]
    fn test_uuids_reexport() {
        assert_eq!(uuids::CCCD_SCAN_SPAN, 12);
    }

    proptest! {
        #[test]
        fn ambient_values_survive_extraction(
            gas in -1.0e6f64..1.0e6,
            temp in -50.0f64..80.0,
            hum in 0.0f64..100.0,
            pres in 300.0f64..1200.0,
        ) {
            let fields = ambient_fields(gas, temp, hum, pres);
            let m = Measurement::from_fields(SensorClass::Ambient, &fields).unwrap();
            prop_assert_eq!(m, Measurement::Ambient {
                gas,
                temperature: temp,
                humidity: hum,
                pressure: pres,
            });
        }

        #[test]
        fn payload_always_carries_timestamp(ts in 0i64..i64::MAX / 2, light in 0.0f64..1000.0) {
            let record = DecodedRecord {
                device: "d".into(),
                sensor_id: "s".into(),
                sensor_numeric_id: "1".into(),
                captured_at_ms: ts,
                measurement: Measurement::Door { light, shock_delta: 0.0 },
                fields: Map::new(),
            };
            let payload = record.payload();
            prop_assert_eq!(payload.get("ts").and_then(Value::as_i64), Some(ts));
            prop_assert!(payload.get("temp").is_none());
        }
    }
}
