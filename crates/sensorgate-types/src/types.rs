//! Core types for decoded sensor records.

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// How a peripheral's text lines are interpreted.
///
/// # Examples
///
/// ```
/// use sensorgate_types::DecodeMode;
///
/// assert_eq!("json".parse::<DecodeMode>(), Ok(DecodeMode::Json));
/// assert_eq!("kv".parse::<DecodeMode>(), Ok(DecodeMode::KeyValue));
/// assert!("xml".parse::<DecodeMode>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DecodeMode {
    /// Lines are only logged, never forwarded.
    Raw,
    /// Each line is a JSON object.
    #[default]
    Json,
    /// Each line is a list of `key=value` pairs.
    #[cfg_attr(feature = "serde", serde(rename = "kv"))]
    KeyValue,
}

impl FromStr for DecodeMode {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "raw" => Ok(DecodeMode::Raw),
            "json" => Ok(DecodeMode::Json),
            "kv" => Ok(DecodeMode::KeyValue),
            _ => Err(DecodeError::Unknown {
                kind: "decode mode",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeMode::Raw => write!(f, "raw"),
            DecodeMode::Json => write!(f, "json"),
            DecodeMode::KeyValue => write!(f, "kv"),
        }
    }
}

/// Class of sensor attached to a peripheral.
///
/// The class decides which fields a record must carry and forms one segment
/// of the outbound topic, so `Display` yields the short topic form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SensorClass {
    /// Ambient sensor: gas, temperature, humidity, pressure.
    #[default]
    #[cfg_attr(feature = "serde", serde(rename = "amb", alias = "ambient"))]
    Ambient,
    /// Door/shock sensor: light level and shock delta.
    #[cfg_attr(feature = "serde", serde(rename = "door", alias = "shock"))]
    Door,
}

impl SensorClass {
    /// Field names a record of this class must carry (after renaming).
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            SensorClass::Ambient => &["gas", "temp", "hum", "pres"],
            SensorClass::Door => &["light", "shock_delta"],
        }
    }
}

impl FromStr for SensorClass {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "amb" | "ambient" => Ok(SensorClass::Ambient),
            "door" | "shock" => Ok(SensorClass::Door),
            _ => Err(DecodeError::Unknown {
                kind: "sensor class",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SensorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorClass::Ambient => write!(f, "amb"),
            SensorClass::Door => write!(f, "door"),
        }
    }
}

/// Typed numeric fields of a decoded record.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "class", rename_all = "snake_case"))]
pub enum Measurement {
    /// Ambient sensor values.
    Ambient {
        /// Gas resistance / concentration (sensor units).
        gas: f64,
        /// Temperature in degrees Celsius.
        temperature: f64,
        /// Relative humidity percentage.
        humidity: f64,
        /// Atmospheric pressure in hPa.
        pressure: f64,
    },
    /// Door/shock sensor values.
    Door {
        /// Ambient light level.
        light: f64,
        /// Change in shock reading since the previous sample.
        shock_delta: f64,
    },
}

impl Measurement {
    /// Build a measurement of `class` from a decoded key/value object.
    ///
    /// Numeric values may be JSON numbers or numeric strings. Extra keys are
    /// ignored.
    pub fn from_fields(class: SensorClass, fields: &Map<String, Value>) -> Result<Self, DecodeError> {
        match class {
            SensorClass::Ambient => Ok(Measurement::Ambient {
                gas: number(fields, "gas")?,
                temperature: number(fields, "temp")?,
                humidity: number(fields, "hum")?,
                pressure: number(fields, "pres")?,
            }),
            SensorClass::Door => Ok(Measurement::Door {
                light: number(fields, "light")?,
                shock_delta: number(fields, "shock_delta")?,
            }),
        }
    }

    /// The sensor class this measurement belongs to.
    pub fn class(&self) -> SensorClass {
        match self {
            Measurement::Ambient { .. } => SensorClass::Ambient,
            Measurement::Door { .. } => SensorClass::Door,
        }
    }
}

fn number(fields: &Map<String, Value>, key: &str) -> Result<f64, DecodeError> {
    let value = fields
        .get(key)
        .ok_or_else(|| DecodeError::MissingField(key.to_string()))?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| DecodeError::InvalidField {
        field: key.to_string(),
        value: value.to_string(),
    })
}

/// A record decoded from one line of a peripheral's notification stream.
///
/// Each downstream consumer receives its own clone.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecodedRecord {
    /// Configured peripheral name.
    pub device: String,
    /// Configured sensor identifier.
    pub sensor_id: String,
    /// Sensor numeric identifier used in the outbound topic.
    pub sensor_numeric_id: String,
    /// Capture time in Unix milliseconds (when the line was reassembled).
    pub captured_at_ms: i64,
    /// Typed values.
    pub measurement: Measurement,
    /// The decoded object after key renaming.
    pub fields: Map<String, Value>,
}

impl DecodedRecord {
    /// The sensor class of this record.
    pub fn sensor_class(&self) -> SensorClass {
        self.measurement.class()
    }

    /// Compact outbound payload: timestamp plus class-specific values.
    ///
    /// ```
    /// use sensorgate_types::{DecodedRecord, Measurement};
    ///
    /// let record = DecodedRecord {
    ///     device: "bluno-1".into(),
    ///     sensor_id: "ambiente1".into(),
    ///     sensor_numeric_id: "a01".into(),
    ///     captured_at_ms: 1_700_000_000_000,
    ///     measurement: Measurement::Door { light: 12.0, shock_delta: 0.5 },
    ///     fields: Default::default(),
    /// };
    /// assert_eq!(
    ///     record.payload().to_string(),
    ///     r#"{"ts":1700000000000,"light":12.0,"shock_delta":0.5}"#
    /// );
    /// ```
    pub fn payload(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("ts".to_string(), Value::from(self.captured_at_ms));
        match self.measurement {
            Measurement::Ambient {
                temperature,
                humidity,
                pressure,
                ..
            } => {
                obj.insert("temp".to_string(), Value::from(round2(temperature)));
                obj.insert("hum".to_string(), Value::from(round2(humidity)));
                obj.insert("pres".to_string(), Value::from(round2(pressure)));
            }
            Measurement::Door { light, shock_delta } => {
                obj.insert("light".to_string(), Value::from(light));
                obj.insert("shock_delta".to_string(), Value::from(shock_delta));
            }
        }
        Value::Object(obj)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
