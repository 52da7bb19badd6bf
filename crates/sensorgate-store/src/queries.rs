//! Query builder for stored readings.
//!
//! # Example
//!
//! ```
//! use sensorgate_store::{ReadingQuery, Store};
//!
//! let store = Store::open_in_memory()?;
//! let query = ReadingQuery::new()
//!     .sensor("ambiente1")
//!     .since_ms(1_700_000_000_000)
//!     .limit(50);
//! let readings = store.query_readings(&query)?;
//! assert!(readings.is_empty());
//! # Ok::<(), sensorgate_store::Error>(())
//! ```

/// Fluent query builder for [`Store::query_readings`](crate::Store::query_readings).
///
/// By default results are ordered by `ts_ms` descending (newest first).
#[derive(Debug, Default, Clone)]
pub struct ReadingQuery {
    /// Filter by peripheral name.
    pub device: Option<String>,
    /// Filter by sensor identifier.
    pub sensor_id: Option<String>,
    /// Readings captured at or after this time (Unix ms).
    pub since_ms: Option<i64>,
    /// Readings captured at or before this time (Unix ms).
    pub until_ms: Option<i64>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by `ts_ms` descending.
    pub newest_first: bool,
}

impl ReadingQuery {
    /// Create a query matching everything, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Only readings from peripheral `device`.
    pub fn device(mut self, device: &str) -> Self {
        self.device = Some(device.to_string());
        self
    }

    /// Only readings from sensor `sensor_id`.
    pub fn sensor(mut self, sensor_id: &str) -> Self {
        self.sensor_id = Some(sensor_id.to_string());
        self
    }

    /// Only readings captured at or after `ts_ms`.
    pub fn since_ms(mut self, ts_ms: i64) -> Self {
        self.since_ms = Some(ts_ms);
        self
    }

    /// Only readings captured at or before `ts_ms`.
    pub fn until_ms(mut self, ts_ms: i64) -> Self {
        self.until_ms = Some(ts_ms);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `offset` results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order chronologically.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref device) = self.device {
            conditions.push("device = ?");
            params.push(Box::new(device.clone()));
        }
        if let Some(ref sensor_id) = self.sensor_id {
            conditions.push("sensor_id = ?");
            params.push(Box::new(sensor_id.clone()));
        }
        if let Some(since) = self.since_ms {
            conditions.push("ts_ms >= ?");
            params.push(Box::new(since));
        }
        if let Some(until) = self.until_ms {
            conditions.push("ts_ms <= ?");
            params.push(Box::new(until));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, ts_ms, device, sensor_id, payload FROM readings {} ORDER BY ts_ms {}, id {}",
            where_clause, order, order
        );

        // SQLite needs a LIMIT for OFFSET; -1 means unlimited.
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset)),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
