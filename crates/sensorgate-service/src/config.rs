//! Gateway configuration.
//!
//! Loaded from a TOML file. Every section is optional; missing values fall
//! back to the defaults of a single-board field install.
//!
//! ```toml
//! [gateway]
//! id = "truck-01"
//! serial_port = "/dev/ttyACM0"
//!
//! [ble]
//! reconnect_interval = 5
//!
//! [[ble.devices]]
//! name = "Bluno-amb"
//! address = "C4:BE:84:20:1A:2B"
//! sensor_id = "ambiente1"
//! sensor_type = "amb"
//! sensor_numeric_id = "a01"
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sensorgate_core::DeviceConfig;
use sensorgate_core::device_config::{DEFAULT_AUTH, DEFAULT_LINK_CONFIG};
use sensorgate_types::uuids::{BLUNO_COMMAND, BLUNO_SERIAL};
use sensorgate_types::{DecodeMode, SensorClass};

/// Gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway identity and serial controller.
    pub gateway: GatewayConfig,
    /// Uplink topic settings.
    pub broker: BrokerConfig,
    /// Local database.
    pub storage: StorageConfig,
    /// Heartbeat settings.
    pub health: HealthConfig,
    /// Peripheral defaults and devices.
    pub ble: BleConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it does not exist.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Save configuration to a file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path.as_ref(), content).map_err(|e| ConfigError::Write {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Validate the configuration and return every problem found.
    ///
    /// This checks:
    /// - Serial port is set and the baud rate is non-zero
    /// - Storage path is not empty
    /// - Reconnect intervals are within 1 s - 1 hour
    /// - Device addresses are present and unique
    /// - Sensor classes and decode modes are known
    ///
    /// # Example
    ///
    /// ```
    /// use sensorgate_service::Config;
    ///
    /// let config = Config::default();
    /// config.validate().expect("Default config should be valid");
    /// ```
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.gateway.validate());
        errors.extend(self.storage.validate());
        errors.extend(self.ble.validate());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve every `[[ble.devices]]` entry against the `[ble]` defaults.
    pub fn device_configs(&self) -> Result<Vec<DeviceConfig>, ConfigError> {
        let mut devices = Vec::with_capacity(self.ble.devices.len());
        let mut errors = Vec::new();
        for (i, device) in self.ble.devices.iter().enumerate() {
            match device.resolve(&self.ble, &format!("ble.devices[{}]", i)) {
                Ok(config) => devices.push(config),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(devices)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

/// Gateway identity and the serial controller it talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway identifier used in outbound topics.
    pub id: String,
    /// Serial device of the uplink controller.
    pub serial_port: String,
    /// Serial baud rate.
    pub serial_baud: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id: "1".to_string(),
            serial_port: "/dev/ttyACM0".to_string(),
            serial_baud: 115_200,
        }
    }
}

impl GatewayConfig {
    /// Validate gateway configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.serial_port.trim().is_empty() {
            errors.push(ValidationError {
                field: "gateway.serial_port".to_string(),
                message: "serial port cannot be empty".to_string(),
            });
        }
        if self.serial_baud == 0 {
            errors.push(ValidationError {
                field: "gateway.serial_baud".to_string(),
                message: "baud rate must be greater than 0".to_string(),
            });
        }

        errors
    }
}

/// Uplink topic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// First topic segment.
    pub topic_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "fleet".to_string(),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/gateway.db"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.path.as_os_str().is_empty() {
            errors.push(ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Publish a heartbeat while running.
    pub enabled: bool,
    /// Seconds between heartbeats (floored at 5).
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
        }
    }
}

impl HealthConfig {
    /// Heartbeat interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Minimum reconnect interval in seconds.
pub const MIN_RECONNECT_INTERVAL: u64 = 1;
/// Maximum reconnect interval in seconds (1 hour).
pub const MAX_RECONNECT_INTERVAL: u64 = 3600;

/// Peripheral defaults shared by every device entry.
///
/// An empty `auth` or `link_config` string disables that write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleConfig {
    /// UUID of the notifying serial characteristic.
    pub notify_uuid: Uuid,
    /// UUID of the command characteristic.
    pub command_uuid: Uuid,
    /// Auth string written after connecting.
    pub auth: String,
    /// Link-config string written after auth.
    pub link_config: String,
    /// Seconds between reconnect attempts.
    pub reconnect_interval: u64,
    /// Peripherals to keep connected.
    pub devices: Vec<BleDeviceConfig>,
}

impl Default for BleConfig {
    fn default() -> Self {
        Self {
            notify_uuid: BLUNO_SERIAL,
            command_uuid: BLUNO_COMMAND,
            auth: DEFAULT_AUTH.to_string(),
            link_config: DEFAULT_LINK_CONFIG.to_string(),
            reconnect_interval: 5,
            devices: Vec::new(),
        }
    }
}

impl BleConfig {
    /// Validate the defaults and every device entry.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        errors.extend(validate_reconnect_interval(
            "ble.reconnect_interval",
            self.reconnect_interval,
        ));

        let mut seen_addresses = HashSet::new();
        for (i, device) in self.devices.iter().enumerate() {
            let prefix = format!("ble.devices[{}]", i);
            errors.extend(device.validate(&prefix));

            let addr_lower = device.address.trim().to_lowercase();
            if !addr_lower.is_empty() && !seen_addresses.insert(addr_lower) {
                errors.push(ValidationError {
                    field: format!("{}.address", prefix),
                    message: format!("duplicate device address '{}'", device.address),
                });
            }
        }

        errors
    }
}

fn default_sensor_type() -> String {
    SensorClass::default().to_string()
}

fn default_parse() -> String {
    DecodeMode::default().to_string()
}

/// One peripheral. Unset optional fields inherit from [`BleConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleDeviceConfig {
    /// Name used in logs and records.
    pub name: String,
    /// MAC address (or platform identifier).
    pub address: String,
    /// Sensor identifier; defaults to the name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
    /// Sensor class (`amb` or `door`).
    #[serde(default = "default_sensor_type")]
    pub sensor_type: String,
    /// Numeric identifier used as the last topic segment.
    #[serde(default)]
    pub sensor_numeric_id: String,
    /// Decode mode (`raw`, `json` or `kv`).
    #[serde(default = "default_parse")]
    pub parse: String,
    /// Top-level key renames applied after decoding.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub field_map: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_uuid: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_config: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect_interval: Option<u64>,
}

impl BleDeviceConfig {
    /// Create an entry with everything else inherited.
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            sensor_id: None,
            sensor_type: default_sensor_type(),
            sensor_numeric_id: String::new(),
            parse: default_parse(),
            field_map: HashMap::new(),
            notify_uuid: None,
            command_uuid: None,
            auth: None,
            link_config: None,
            reconnect_interval: None,
        }
    }

    /// Validate a device entry.
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.address.trim().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.address", prefix),
                message: "device address cannot be empty".to_string(),
            });
        }

        if self.name.trim().is_empty() {
            errors.push(ValidationError {
                field: format!("{}.name", prefix),
                message: "device name cannot be empty".to_string(),
            });
        }

        if let Err(e) = self.sensor_type.parse::<SensorClass>() {
            errors.push(ValidationError {
                field: format!("{}.sensor_type", prefix),
                message: e.to_string(),
            });
        }

        if let Err(e) = self.parse.parse::<DecodeMode>() {
            errors.push(ValidationError {
                field: format!("{}.parse", prefix),
                message: e.to_string(),
            });
        }

        if let Some(interval) = self.reconnect_interval {
            errors.extend(validate_reconnect_interval(
                &format!("{}.reconnect_interval", prefix),
                interval,
            ));
        }

        errors
    }

    /// Build the runtime device configuration, filling gaps from `defaults`.
    pub fn resolve(&self, defaults: &BleConfig, prefix: &str) -> Result<DeviceConfig, ValidationError> {
        let class: SensorClass = self.sensor_type.parse().map_err(|e: sensorgate_types::DecodeError| {
            ValidationError {
                field: format!("{}.sensor_type", prefix),
                message: e.to_string(),
            }
        })?;
        let mode: DecodeMode = self.parse.parse().map_err(|e: sensorgate_types::DecodeError| {
            ValidationError {
                field: format!("{}.parse", prefix),
                message: e.to_string(),
            }
        })?;

        let auth = self.auth.as_deref().unwrap_or(&defaults.auth);
        let link_config = self.link_config.as_deref().unwrap_or(&defaults.link_config);
        let interval = self.reconnect_interval.unwrap_or(defaults.reconnect_interval);
        let sensor_id = self.sensor_id.as_deref().unwrap_or(&self.name);

        let mut config = DeviceConfig::new(self.name.clone(), self.address.trim())
            .sensor(sensor_id, class, self.sensor_numeric_id.clone())
            .endpoints(
                self.notify_uuid.unwrap_or(defaults.notify_uuid),
                self.command_uuid.unwrap_or(defaults.command_uuid),
            )
            .auth(non_empty(auth))
            .link_config(non_empty(link_config))
            .reconnect_delay(Duration::from_secs(interval))
            .decode_mode(mode);
        for (from, to) in &self.field_map {
            config = config.rename(from.clone(), to.clone());
        }
        Ok(config)
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn validate_reconnect_interval(field: &str, interval: u64) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if interval < MIN_RECONNECT_INTERVAL {
        errors.push(ValidationError {
            field: field.to_string(),
            message: format!(
                "reconnect interval {} is too short (minimum {} second)",
                interval, MIN_RECONNECT_INTERVAL
            ),
        });
    } else if interval > MAX_RECONNECT_INTERVAL {
        errors.push(ValidationError {
            field: field.to_string(),
            message: format!(
                "reconnect interval {} is too long (maximum {} seconds / 1 hour)",
                interval, MAX_RECONNECT_INTERVAL
            ),
        });
    }
    errors
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// The field path (e.g., `gateway.serial_baud` or `ble.devices[0].address`).
    pub field: String,
    /// Description of the validation failure.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sensorgate")
        .join("gateway.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(err: ConfigError) -> Vec<String> {
        match err {
            ConfigError::Validation(errors) => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.gateway.id, "1");
        assert_eq!(config.gateway.serial_port, "/dev/ttyACM0");
        assert_eq!(config.gateway.serial_baud, 115_200);
        assert_eq!(config.broker.topic_prefix, "fleet");
        assert_eq!(config.storage.path, PathBuf::from("./data/gateway.db"));
        assert!(config.health.enabled);
        assert_eq!(config.ble.reconnect_interval, 5);
        assert!(config.ble.devices.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
            [gateway]
            id = "truck-01"

            [[ble.devices]]
            name = "Bluno-amb"
            address = "C4:BE:84:20:1A:2B"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.gateway.id, "truck-01");
        assert_eq!(config.gateway.serial_baud, 115_200);
        assert_eq!(config.ble.devices.len(), 1);
        assert_eq!(config.ble.devices[0].sensor_type, "amb");
        assert_eq!(config.ble.devices[0].parse, "json");
        config.validate().unwrap();
    }

    #[test]
    fn test_device_inherits_defaults() {
        let toml = r#"
            [ble]
            auth = "AT+PASSWORD=secret"
            reconnect_interval = 9

            [[ble.devices]]
            name = "Bluno-door"
            address = "AA:BB:CC:DD:EE:01"
            sensor_id = "puerta1"
            sensor_type = "door"
            sensor_numeric_id = "d01"
            parse = "kv"
            link_config = ""
            field_map = { l = "light", s = "shock_delta" }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        let devices = config.device_configs().unwrap();
        let device = &devices[0];

        assert_eq!(device.name, "Bluno-door");
        assert_eq!(device.sensor_id, "puerta1");
        assert_eq!(device.sensor_class, SensorClass::Door);
        assert_eq!(device.sensor_numeric_id, "d01");
        assert_eq!(device.decode_mode, DecodeMode::KeyValue);
        assert_eq!(device.auth.as_deref(), Some("AT+PASSWORD=secret"));
        assert_eq!(device.link_config, None);
        assert_eq!(device.reconnect_delay, Duration::from_secs(9));
        assert_eq!(device.notify_uuid, BLUNO_SERIAL);
        assert_eq!(device.renames.get("l").map(String::as_str), Some("light"));
    }

    #[test]
    fn test_sensor_id_defaults_to_name() {
        let mut config = Config::default();
        config.ble.devices.push(BleDeviceConfig::new("Bluno-1", "AA:BB"));
        let devices = config.device_configs().unwrap();
        assert_eq!(devices[0].sensor_id, "Bluno-1");
        assert_eq!(devices[0].reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_gateway() {
        let mut config = Config::default();
        config.gateway.serial_port = " ".to_string();
        config.gateway.serial_baud = 0;
        let fields = fields(config.validate().unwrap_err());
        assert_eq!(fields, vec!["gateway.serial_port", "gateway.serial_baud"]);
    }

    #[test]
    fn test_validate_devices() {
        let mut config = Config::default();
        config.ble.devices.push(BleDeviceConfig::new("a", ""));
        config.ble.devices.push(BleDeviceConfig::new("b", "AA:BB:CC:DD:EE:FF"));
        config.ble.devices.push(BleDeviceConfig::new("c", "aa:bb:cc:dd:ee:ff"));
        let mut bad = BleDeviceConfig::new("d", "11:22");
        bad.sensor_type = "thermo".to_string();
        bad.parse = "xml".to_string();
        bad.reconnect_interval = Some(0);
        config.ble.devices.push(bad);

        let fields = fields(config.validate().unwrap_err());
        assert_eq!(
            fields,
            vec![
                "ble.devices[0].address",
                "ble.devices[2].address",
                "ble.devices[3].sensor_type",
                "ble.devices[3].parse",
                "ble.devices[3].reconnect_interval",
            ]
        );
    }

    #[test]
    fn test_validate_reconnect_interval_bounds() {
        let mut config = Config::default();
        config.ble.reconnect_interval = MAX_RECONNECT_INTERVAL;
        assert!(config.validate().is_ok());
        config.ble.reconnect_interval = MAX_RECONNECT_INTERVAL + 1;
        let fields = fields(config.validate().unwrap_err());
        assert_eq!(fields, vec!["ble.reconnect_interval"]);
    }

    #[test]
    fn test_device_configs_reports_unknown_class() {
        let mut config = Config::default();
        let mut device = BleDeviceConfig::new("a", "AA");
        device.sensor_type = "thermo".to_string();
        config.ble.devices.push(device);
        let fields = fields(config.device_configs().unwrap_err());
        assert_eq!(fields, vec!["ble.devices[0].sensor_type"]);
    }

    #[test]
    fn test_validation_error_display() {
        let error = ConfigError::Validation(vec![
            ValidationError {
                field: "gateway.serial_baud".to_string(),
                message: "baud rate must be greater than 0".to_string(),
            },
            ValidationError {
                field: "storage.path".to_string(),
                message: "database path cannot be empty".to_string(),
            },
        ]);
        let text = error.to_string();
        assert!(text.contains("  - gateway.serial_baud: baud rate must be greater than 0"));
        assert!(text.contains("  - storage.path: database path cannot be empty"));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("gateway.toml");

        let mut config = Config::default();
        config.gateway.id = "truck-07".to_string();
        config.health.interval_secs = 60;
        let mut device = BleDeviceConfig::new("Bluno-amb", "AA:BB:CC:DD:EE:FF");
        device.sensor_numeric_id = "a01".to_string();
        device.reconnect_interval = Some(10);
        config.ble.devices.push(device);

        config.save(&config_path).unwrap();
        let loaded = Config::load_validated(&config_path).unwrap();

        assert_eq!(loaded.gateway.id, "truck-07");
        assert_eq!(loaded.health.interval_secs, 60);
        assert_eq!(loaded.ble.devices.len(), 1);
        assert_eq!(loaded.ble.devices[0].sensor_numeric_id, "a01");
        assert_eq!(loaded.ble.devices[0].reconnect_interval, Some(10));
        assert_eq!(loaded.ble.devices[0].auth, None);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load("/nonexistent/sensorgate.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[gateway\nid = ").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("sensorgate/gateway.toml"));
    }
}
