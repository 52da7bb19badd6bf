//! Telemetry publisher: drains the telemetry queue into the uplink.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sensorgate_core::SerialBridge;
use sensorgate_types::DecodedRecord;

use crate::task::ServiceTask;

/// Join non-empty segments with `/`.
///
/// ```
/// use sensorgate_service::publisher::make_topic;
///
/// assert_eq!(make_topic(&["fleet", "", "amb", "a01"]), "fleet/amb/a01");
/// ```
pub fn make_topic(segments: &[&str]) -> String {
    segments
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// Outbound topic layout for one gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
    gateway_id: String,
}

impl Topics {
    /// Topics under `{prefix}/{gateway_id}`.
    pub fn new(prefix: impl Into<String>, gateway_id: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            gateway_id: gateway_id.into(),
        }
    }

    /// Gateway identifier.
    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// `{prefix}/{gateway_id}/{sensor_class}/{sensor_numeric_id}`.
    pub fn telemetry(&self, record: &DecodedRecord) -> String {
        let class = record.sensor_class().to_string();
        make_topic(&[
            self.prefix.as_str(),
            self.gateway_id.as_str(),
            class.as_str(),
            record.sensor_numeric_id.as_str(),
        ])
    }

    /// `{prefix}/{gateway_id}/health`.
    pub fn health(&self) -> String {
        make_topic(&[self.prefix.as_str(), self.gateway_id.as_str(), "health"])
    }
}

/// Publisher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    /// Records handed to the uplink.
    pub published: u64,
    /// Records the bridge could not send.
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    failed: AtomicU64,
}

/// Running publisher loop.
#[derive(Debug)]
pub struct Publisher {
    task: ServiceTask,
    counters: Arc<Counters>,
}

impl Publisher {
    /// Spawn the loop. It exits when stopped or when every sender is gone.
    pub fn spawn(
        bridge: Arc<SerialBridge>,
        topics: Topics,
        records: mpsc::Receiver<DecodedRecord>,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let shared = Arc::clone(&counters);
        let task = ServiceTask::spawn("publisher", move |cancel| {
            run(bridge, topics, records, shared, cancel)
        });
        Self { task, counters }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PublisherStats {
        PublisherStats {
            published: self.counters.published.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Stop the loop and wait for it.
    pub async fn stop(&self) {
        self.task.stop().await;
    }
}

async fn run(
    bridge: Arc<SerialBridge>,
    topics: Topics,
    mut records: mpsc::Receiver<DecodedRecord>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    info!("Publisher started");
    loop {
        let record = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            record = records.recv() => match record {
                Some(record) => record,
                None => {
                    debug!("Telemetry queue closed");
                    break;
                }
            },
        };

        let topic = topics.telemetry(&record);
        let payload = record.payload().to_string();
        debug!("payload bytes: {}, payload: {}", payload.len(), payload);

        // Stop abandons only the wait; an accepted request still runs.
        let ok = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            ok = bridge.publish(&topic, &payload) => ok,
        };
        if ok {
            counters.published.fetch_add(1, Ordering::Relaxed);
            info!(sensor_id = %record.sensor_id, "Published to {}", topic);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(sensor_id = %record.sensor_id, "Publish to {} failed", topic);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorgate_types::Measurement;

    fn record(measurement: Measurement, numeric_id: &str) -> DecodedRecord {
        DecodedRecord {
            device: "bluno-1".into(),
            sensor_id: "ambiente1".into(),
            sensor_numeric_id: numeric_id.into(),
            captured_at_ms: 1_700_000_000_000,
            measurement,
            fields: Default::default(),
        }
    }

    #[test]
    fn test_make_topic_skips_empty_segments() {
        assert_eq!(make_topic(&["fleet", "1", "amb", "a01"]), "fleet/1/amb/a01");
        assert_eq!(make_topic(&["", "1", "", "a01"]), "1/a01");
        assert_eq!(make_topic(&[]), "");
    }

    #[test]
    fn test_telemetry_topic() {
        let topics = Topics::new("fleet", "truck-01");
        let ambient = record(
            Measurement::Ambient {
                gas: 1.0,
                temperature: 2.0,
                humidity: 3.0,
                pressure: 4.0,
            },
            "a01",
        );
        assert_eq!(topics.telemetry(&ambient), "fleet/truck-01/amb/a01");

        let door = record(
            Measurement::Door {
                light: 1.0,
                shock_delta: 0.0,
            },
            "",
        );
        assert_eq!(topics.telemetry(&door), "fleet/truck-01/door");
    }

    #[test]
    fn test_health_topic() {
        assert_eq!(Topics::new("fleet", "1").health(), "fleet/1/health");
        assert_eq!(Topics::new("", "1").health(), "1/health");
    }
}
