//! Local persistence for sensorgate readings.
//!
//! Every decoded record is mirrored to a single SQLite table,
//! `readings(id, ts_ms, device, sensor_id, payload)`, with the decoded
//! key/value object stored as compact JSON text. The schema is versioned so
//! later releases can migrate existing gateway databases in place.
//!
//! # Example
//!
//! ```no_run
//! use sensorgate_store::Store;
//!
//! let store = Store::open("./data/gateway.db")?;
//! for reading in store.recent_readings(10)? {
//!     println!("{} {} {}", reading.ts_ms, reading.sensor_id, reading.payload);
//! }
//! # Ok::<(), sensorgate_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::StoredReading;
pub use queries::ReadingQuery;
pub use schema::SCHEMA_VERSION;
pub use store::Store;
