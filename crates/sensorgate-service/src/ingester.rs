//! Store ingester: mirrors the persistence queue into SQLite.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use sensorgate_store::Store;
use sensorgate_types::DecodedRecord;

use crate::task::ServiceTask;

/// Running ingester loop.
#[derive(Debug)]
pub struct Ingester {
    task: ServiceTask,
}

impl Ingester {
    /// Spawn the loop. It exits when stopped or when every sender is gone.
    pub fn spawn(store: Arc<Mutex<Store>>, records: mpsc::Receiver<DecodedRecord>) -> Self {
        let task = ServiceTask::spawn("ingester", move |cancel| run(store, records, cancel));
        Self { task }
    }

    /// Stop the loop, after it has stored whatever is already queued.
    pub async fn stop(&self) {
        self.task.stop().await;
    }
}

async fn run(
    store: Arc<Mutex<Store>>,
    mut records: mpsc::Receiver<DecodedRecord>,
    cancel: CancellationToken,
) {
    info!("Ingester started");
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            record = records.recv() => match record {
                Some(record) => ingest(&store, &record).await,
                None => {
                    debug!("Persistence queue closed");
                    return;
                }
            },
        }
    }

    let mut flushed = 0usize;
    while let Ok(record) = records.try_recv() {
        ingest(&store, &record).await;
        flushed += 1;
    }
    if flushed > 0 {
        info!("Stored {} queued record(s) on shutdown", flushed);
    }
}

async fn ingest(store: &Mutex<Store>, record: &DecodedRecord) {
    let store = store.lock().await;
    match store.insert_record(record) {
        Ok(id) => debug!(sensor_id = %record.sensor_id, "Stored reading {}", id),
        Err(e) => error!(sensor_id = %record.sensor_id, "Failed to store reading: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorgate_types::Measurement;
    use serde_json::{Map, Value};

    fn record(ts: i64) -> DecodedRecord {
        let mut fields = Map::new();
        fields.insert("light".into(), Value::from(ts));
        fields.insert("shock_delta".into(), Value::from(0.25));
        DecodedRecord {
            device: "bluno-2".into(),
            sensor_id: "puerta1".into(),
            sensor_numeric_id: "d01".into(),
            captured_at_ms: ts,
            measurement: Measurement::Door {
                light: ts as f64,
                shock_delta: 0.25,
            },
            fields,
        }
    }

    #[tokio::test]
    async fn test_ingests_until_senders_drop() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        let (tx, rx) = mpsc::channel(8);
        let ingester = Ingester::spawn(Arc::clone(&store), rx);

        for ts in 1..=3 {
            tx.send(record(ts)).await.unwrap();
        }
        drop(tx);
        while !ingester.task.is_finished().await {
            tokio::task::yield_now().await;
        }

        let store = store.lock().await;
        assert_eq!(store.count_readings(Some("puerta1")).unwrap(), 3);
        let latest = store.latest_reading("puerta1").unwrap().unwrap();
        assert_eq!(latest.ts_ms, 3);
        assert_eq!(latest.device, "bluno-2");
        assert_eq!(latest.payload["shock_delta"], Value::from(0.25));
    }

    #[tokio::test]
    async fn test_stop_flushes_queued_records() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));
        // Hold the lock so nothing is stored before stop is requested.
        let guard = store.lock().await;
        let (tx, rx) = mpsc::channel(8);
        let ingester = Ingester::spawn(Arc::clone(&store), rx);
        for ts in 1..=4 {
            tx.send(record(ts)).await.unwrap();
        }

        let stop = tokio::spawn(async move { ingester.stop().await });
        tokio::task::yield_now().await;
        drop(guard);
        stop.await.unwrap();

        assert_eq!(store.lock().await.count_readings(None).unwrap(), 4);
        drop(tx);
    }
}
