//! Main store implementation.

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::Value;
use tracing::{debug, info};

use sensorgate_types::DecodedRecord;

use crate::error::{Error, Result};
use crate::models::StoredReading;
use crate::queries::ReadingQuery;
use crate::schema;

/// SQLite-backed store for decoded readings.
pub struct Store {
    conn: Connection,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.conn.path())
            .finish()
    }
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(2))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// Insert one reading and return its row ID.
    pub fn insert_reading(
        &self,
        ts_ms: i64,
        device: &str,
        sensor_id: &str,
        payload: &Value,
    ) -> Result<i64> {
        let payload = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO readings (ts_ms, device, sensor_id, payload) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![ts_ms, device, sensor_id, payload],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Stored reading {} for {}", id, sensor_id);
        Ok(id)
    }

    /// Insert a decoded record: capture time, identity, and its key/value object.
    pub fn insert_record(&self, record: &DecodedRecord) -> Result<i64> {
        let reading = StoredReading::from_record(record);
        self.insert_reading(
            reading.ts_ms,
            &reading.device,
            &reading.sensor_id,
            &reading.payload,
        )
    }

    /// Query readings.
    pub fn query_readings(&self, query: &ReadingQuery) -> Result<Vec<StoredReading>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), row_to_raw)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawReading::into_stored).collect()
    }

    /// The most recent `limit` readings across all sensors, newest first.
    pub fn recent_readings(&self, limit: u32) -> Result<Vec<StoredReading>> {
        self.query_readings(&ReadingQuery::new().limit(limit))
    }

    /// The latest reading for a sensor.
    pub fn latest_reading(&self, sensor_id: &str) -> Result<Option<StoredReading>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, ts_ms, device, sensor_id, payload FROM readings
                 WHERE sensor_id = ? ORDER BY ts_ms DESC, id DESC LIMIT 1",
                [sensor_id],
                row_to_raw,
            )
            .optional()?;
        raw.map(RawReading::into_stored).transpose()
    }

    /// Count readings, optionally for one sensor.
    pub fn count_readings(&self, sensor_id: Option<&str>) -> Result<u64> {
        let count: i64 = match sensor_id {
            Some(id) => self.conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE sensor_id = ?",
                [id],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?,
        };

        Ok(count as u64)
    }
}

/// A row before its payload text is parsed.
struct RawReading {
    id: i64,
    ts_ms: i64,
    device: Option<String>,
    sensor_id: Option<String>,
    payload: Option<String>,
}

impl RawReading {
    fn into_stored(self) -> Result<StoredReading> {
        let payload = match self.payload.as_deref() {
            Some(text) if !text.is_empty() => serde_json::from_str(text)?,
            _ => Value::Null,
        };
        Ok(StoredReading {
            id: self.id,
            ts_ms: self.ts_ms,
            device: self.device.unwrap_or_default(),
            sensor_id: self.sensor_id.unwrap_or_default(),
            payload,
        })
    }
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawReading> {
    Ok(RawReading {
        id: row.get(0)?,
        ts_ms: row.get(1)?,
        device: row.get(2)?,
        sensor_id: row.get(3)?,
        payload: row.get(4)?,
    })
}
