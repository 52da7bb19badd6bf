//! Decoding of reassembled notification lines into records.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use sensorgate_types::{DecodeError, DecodeMode, DecodeResult, DecodedRecord, Measurement};

use crate::device_config::DeviceConfig;

/// Parse a line according to `mode`.
///
/// Returns `Ok(None)` in raw mode, where lines are only logged.
pub fn parse_line(mode: DecodeMode, line: &str) -> DecodeResult<Option<Map<String, Value>>> {
    match mode {
        DecodeMode::Raw => Ok(None),
        DecodeMode::Json => parse_json(line).map(Some),
        DecodeMode::KeyValue => parse_kv(line).map(Some),
    }
}

/// Parse a line holding one JSON object.
pub fn parse_json(line: &str) -> DecodeResult<Map<String, Value>> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DecodeError::NotAnObject(type_name(&other).to_string())),
    }
}

/// Parse `key=value` pairs separated by `,`, `;` or whitespace.
///
/// Values that look like integers, floats or booleans become the matching
/// JSON type; anything else stays a string.
///
/// ```
/// use sensorgate_core::decode::parse_kv;
///
/// let map = parse_kv("gas=120, temp=21.5;hum=40 pres=1013").unwrap();
/// assert_eq!(map["gas"], 120);
/// assert_eq!(map["temp"], 21.5);
/// assert_eq!(map.len(), 4);
/// ```
pub fn parse_kv(line: &str) -> DecodeResult<Map<String, Value>> {
    let mut map = Map::new();
    for token in line
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|t| !t.is_empty())
    {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| DecodeError::Malformed(format!("expected key=value, got '{token}'")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DecodeError::Malformed(format!("empty key in '{token}'")));
        }
        map.insert(key.to_string(), scalar(value.trim()));
    }
    if map.is_empty() {
        return Err(DecodeError::Malformed("no key=value pairs".to_string()));
    }
    Ok(map)
}

fn scalar(text: &str) -> Value {
    if let Ok(i) = text.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = text.parse::<f64>()
        && let Some(n) = Number::from_f64(f)
    {
        return Value::Number(n);
    }
    match text {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Rename top-level keys; keys without a mapping are kept as-is.
pub fn apply_renames(
    fields: Map<String, Value>,
    renames: &HashMap<String, String>,
) -> Map<String, Value> {
    if renames.is_empty() {
        return fields;
    }
    fields
        .into_iter()
        .map(|(k, v)| match renames.get(&k) {
            Some(renamed) => (renamed.clone(), v),
            None => (k, v),
        })
        .collect()
}

/// Decode one line captured at `captured_at_ms` for the device in `config`.
///
/// Returns `Ok(None)` when the device is in raw mode.
pub fn decode_line(
    config: &DeviceConfig,
    captured_at_ms: i64,
    line: &str,
) -> DecodeResult<Option<DecodedRecord>> {
    let Some(fields) = parse_line(config.decode_mode, line)? else {
        return Ok(None);
    };
    let fields = apply_renames(fields, &config.renames);
    let measurement = Measurement::from_fields(config.sensor_class, &fields)?;
    Ok(Some(DecodedRecord {
        device: config.name.clone(),
        sensor_id: config.sensor_id.clone(),
        sensor_numeric_id: config.sensor_numeric_id.clone(),
        captured_at_ms,
        measurement,
        fields,
    }))
}
