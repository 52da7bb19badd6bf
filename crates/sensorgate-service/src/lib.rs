//! Field gateway service: BLE sensors to a serial-attached uplink and SQLite.
//!
//! This crate provides the `sensorgate` binary and the pieces it wires together:
//! - A device link worker per configured peripheral (from `sensorgate-core`)
//! - The telemetry publisher, which sends every record through the serial bridge
//! - The store ingester, which mirrors every record into the local database
//! - An optional heartbeat with radio link details
//! - One-shot diagnostics (`ping`, `at`, `gps`, `pub`, `health`, `diag`)
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/sensorgate/gateway.toml`:
//!
//! ```toml
//! [gateway]
//! id = "truck-01"
//! serial_port = "/dev/ttyACM0"
//! serial_baud = 115200
//!
//! [broker]
//! topic_prefix = "fleet"
//!
//! [storage]
//! path = "./data/gateway.db"
//!
//! [health]
//! enabled = true
//! interval_secs = 30
//!
//! [ble]
//! auth = "AT+PASSWORD=DFRobot"
//! link_config = "AT+CURRUART=115200"
//! reconnect_interval = 5
//!
//! [[ble.devices]]
//! name = "Bluno-amb"
//! address = "C4:BE:84:20:1A:2B"
//! sensor_id = "ambiente1"
//! sensor_type = "amb"
//! sensor_numeric_id = "a01"
//! parse = "json"
//! ```
//!
//! Records are published on `{topic_prefix}/{id}/{sensor_type}/{sensor_numeric_id}`.

pub mod commands;
pub mod config;
pub mod gateway;
pub mod health;
pub mod ingester;
pub mod publisher;
pub mod task;

pub use commands::{Diagnostic, Report};
pub use config::{
    BleConfig, BleDeviceConfig, BrokerConfig, Config, ConfigError, GatewayConfig, HealthConfig,
    StorageConfig, ValidationError, default_config_path,
};
pub use gateway::{Gateway, GatewayError, run};
pub use health::HealthProber;
pub use ingester::Ingester;
pub use publisher::{Publisher, PublisherStats, Topics, make_topic};
pub use task::ServiceTask;
