//! Link layer of the sensorgate field gateway.
//!
//! This crate holds the two long-lived I/O engines of the gateway and the
//! plumbing between them:
//!
//! - **Device link workers** ([`DeviceWorker`]): one per configured BLE
//!   peripheral. Connect, authenticate, enable notifications, reassemble
//!   notification chunks into lines ([`LineBuffer`]), decode them into
//!   [`DecodedRecord`]s and hand them to the telemetry and persistence
//!   queues without ever blocking.
//! - **Serial command bridge** ([`SerialBridge`]): the single owner of the
//!   half-duplex serial link to the radio controller. Serializes probe,
//!   locate, publish, AT, direct and health requests from any number of
//!   callers, with warm-up, inter-command gaps, and one recovery per
//!   request.
//!
//! Hardware sits behind two traits, [`GattLink`] (btleplug backend in
//! [`ble`]) and [`SerialTransport`] (serialport backend in [`transport`]),
//! so everything above them runs against the mocks in [`mock`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensorgate_core::{BleConnector, DeviceConfig, DeviceWorker, RecordSinks};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (telemetry, mut records) = mpsc::channel(100);
//!     let (persistence, _stored) = mpsc::channel(100);
//!
//!     let config = DeviceConfig::new("bluno-1", "AA:BB:CC:DD:EE:FF");
//!     let worker = DeviceWorker::spawn(
//!         config,
//!         Arc::new(BleConnector::default()),
//!         RecordSinks { telemetry, persistence },
//!     );
//!
//!     if let Some(record) = records.recv().await {
//!         println!("{}: {}", record.sensor_id, record.payload());
//!     }
//!     worker.stop().await;
//! }
//! ```

pub mod ble;
pub mod bridge;
pub mod decode;
pub mod device_config;
pub mod error;
pub mod line_buffer;
pub mod link;
pub mod metrics;
pub mod mock;
pub mod queue;
pub mod scan;
pub mod transport;
pub mod util;
pub mod worker;

pub use sensorgate_types::uuids;
pub use sensorgate_types::{
    DecodeError, DecodeMode, DecodedRecord, Measurement, SensorClass,
};

pub use ble::{BleConnector, BleLink, ConnectionConfig};
pub use bridge::{BridgeOptions, SerialBridge};
pub use decode::{decode_line, parse_line};
pub use device_config::DeviceConfig;
pub use error::{Error, Result};
pub use line_buffer::LineBuffer;
pub use link::{CharacteristicInfo, DescriptorInfo, GattLink, LinkConnector, NotificationHandler};
pub use metrics::{BridgeStats, LinkStats};
pub use queue::DropOldestQueue;
pub use scan::{ScanOptions, find_device};
pub use transport::{SerialPortTransport, SerialTransport};
pub use util::{format_peripheral_id, now_ms};
pub use worker::{DeviceWorker, RecordSinks, WorkerState};
