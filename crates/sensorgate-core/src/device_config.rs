//! Per-peripheral configuration consumed by a device link worker.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use sensorgate_types::uuids::{BLUNO_COMMAND, BLUNO_SERIAL};
use sensorgate_types::{DecodeMode, SensorClass};

use crate::error::{Error, Result};

/// Default auth string written to the command endpoint after connecting.
pub const DEFAULT_AUTH: &str = "AT+PASSWORD=DFRobot";

/// Default link-config string written after the auth string.
pub const DEFAULT_LINK_CONFIG: &str = "AT+CURRUART=115200";

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Immutable configuration for one BLE peripheral.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sensorgate_core::DeviceConfig;
/// use sensorgate_types::{DecodeMode, SensorClass};
///
/// let config = DeviceConfig::new("bluno-1", "AA:BB:CC:DD:EE:FF")
///     .sensor("ambiente1", SensorClass::Ambient, "a01")
///     .decode_mode(DecodeMode::Json)
///     .rename("t", "temp")
///     .reconnect_delay(Duration::from_secs(10));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Human-readable name used in logs and records.
    pub name: String,
    /// Bluetooth address (or platform peripheral identifier).
    pub address: String,
    /// Characteristic that pushes notifications.
    pub notify_uuid: Uuid,
    /// Characteristic that accepts AT-style writes.
    pub command_uuid: Uuid,
    /// Auth string written after connecting (`None` skips the write).
    pub auth: Option<String>,
    /// Link-config string written after the auth string.
    pub link_config: Option<String>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
    /// How notification lines are decoded.
    pub decode_mode: DecodeMode,
    /// Top-level key renames applied after parsing.
    pub renames: HashMap<String, String>,
    /// Sensor identifier carried by every record.
    pub sensor_id: String,
    /// Sensor class deciding the measurement shape.
    pub sensor_class: SensorClass,
    /// Numeric identifier used in the outbound topic.
    pub sensor_numeric_id: String,
}

impl DeviceConfig {
    /// Create a configuration with Bluno defaults.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            sensor_id: name.clone(),
            name,
            address: address.into(),
            notify_uuid: BLUNO_SERIAL,
            command_uuid: BLUNO_COMMAND,
            auth: Some(DEFAULT_AUTH.to_string()),
            link_config: Some(DEFAULT_LINK_CONFIG.to_string()),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            decode_mode: DecodeMode::default(),
            renames: HashMap::new(),
            sensor_class: SensorClass::default(),
            sensor_numeric_id: String::new(),
        }
    }

    /// Set the sensor identity.
    #[must_use]
    pub fn sensor(
        mut self,
        sensor_id: impl Into<String>,
        class: SensorClass,
        numeric_id: impl Into<String>,
    ) -> Self {
        self.sensor_id = sensor_id.into();
        self.sensor_class = class;
        self.sensor_numeric_id = numeric_id.into();
        self
    }

    /// Set the notify and command endpoint UUIDs.
    #[must_use]
    pub fn endpoints(mut self, notify: Uuid, command: Uuid) -> Self {
        self.notify_uuid = notify;
        self.command_uuid = command;
        self
    }

    /// Set (or clear) the auth string.
    #[must_use]
    pub fn auth(mut self, auth: Option<String>) -> Self {
        self.auth = auth;
        self
    }

    /// Set (or clear) the link-config string.
    #[must_use]
    pub fn link_config(mut self, link_config: Option<String>) -> Self {
        self.link_config = link_config;
        self
    }

    /// Set the reconnect delay.
    #[must_use]
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set the decode mode.
    #[must_use]
    pub fn decode_mode(mut self, mode: DecodeMode) -> Self {
        self.decode_mode = mode;
        self
    }

    /// Add a key rename.
    #[must_use]
    pub fn rename(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.renames.insert(from.into(), to.into());
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(Error::invalid_config(format!(
                "device '{}' has an empty address",
                self.name
            )));
        }
        if self.reconnect_delay.is_zero() {
            return Err(Error::invalid_config(format!(
                "device '{}' reconnect delay must be > 0",
                self.name
            )));
        }
        Ok(())
    }
}
