//! Gateway orchestration: wires device workers, the serial bridge, the
//! publisher, the ingester and the heartbeat together, and tears them down
//! in dependency order.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::{Mutex, mpsc};
use tracing::info;

use sensorgate_core::{
    BleConnector, BridgeOptions, DeviceWorker, LinkConnector, RecordSinks, SerialBridge,
    SerialPortTransport, SerialTransport, WorkerState,
};
use sensorgate_store::Store;

use crate::config::{Config, ConfigError};
use crate::health::HealthProber;
use crate::ingester::Ingester;
use crate::publisher::{Publisher, PublisherStats, Topics};

/// Capacity of the telemetry and persistence queues.
pub const RECORD_QUEUE_CAPACITY: usize = 256;

/// Gateway startup errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Failed to open store: {0}")]
    Store(#[from] sensorgate_store::Error),
    #[error("Failed to open serial bridge: {0}")]
    Bridge(#[from] sensorgate_core::Error),
    #[error("Failed to wait for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// A running gateway.
pub struct Gateway {
    bridge: Arc<SerialBridge>,
    store: Arc<Mutex<Store>>,
    workers: Vec<DeviceWorker>,
    publisher: Publisher,
    health: Option<HealthProber>,
    ingester: Ingester,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("workers", &self.workers.len())
            .field("health", &self.health.is_some())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Open the bridge and start every task.
    ///
    /// `connector` and `transport` are the hardware seams; [`run`] passes the
    /// btleplug and serialport backends.
    pub async fn start(
        config: &Config,
        connector: Arc<dyn LinkConnector>,
        transport: Box<dyn SerialTransport>,
        store: Store,
        options: BridgeOptions,
    ) -> Result<Self, GatewayError> {
        let devices = config.device_configs()?;
        let bridge = Arc::new(SerialBridge::open(transport, options).await?);
        let store = Arc::new(Mutex::new(store));
        let topics = Topics::new(config.broker.topic_prefix.clone(), config.gateway.id.clone());

        let (telemetry, telemetry_rx) = mpsc::channel(RECORD_QUEUE_CAPACITY);
        let (persistence, persistence_rx) = mpsc::channel(RECORD_QUEUE_CAPACITY);

        let publisher = Publisher::spawn(Arc::clone(&bridge), topics.clone(), telemetry_rx);
        let ingester = Ingester::spawn(Arc::clone(&store), persistence_rx);

        info!("Starting {} device worker(s)", devices.len());
        let workers = devices
            .into_iter()
            .map(|device| {
                DeviceWorker::spawn(
                    device,
                    Arc::clone(&connector),
                    RecordSinks {
                        telemetry: telemetry.clone(),
                        persistence: persistence.clone(),
                    },
                )
            })
            .collect();

        let health = config.health.enabled.then(|| {
            HealthProber::spawn(Arc::clone(&bridge), topics, config.health.interval())
        });

        info!(gateway_id = %config.gateway.id, "Gateway started");
        Ok(Self {
            bridge,
            store,
            workers,
            publisher,
            health,
            ingester,
        })
    }

    /// The shared serial bridge.
    pub fn bridge(&self) -> &Arc<SerialBridge> {
        &self.bridge
    }

    /// The shared store.
    pub fn store(&self) -> &Arc<Mutex<Store>> {
        &self.store
    }

    /// Name and state of every device worker.
    pub fn worker_states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|w| (w.name().to_string(), w.state()))
            .collect()
    }

    /// Publisher counters.
    pub fn publisher_stats(&self) -> PublisherStats {
        self.publisher.stats()
    }

    /// Stop everything: publisher, heartbeat, device workers, ingester,
    /// then the bridge. Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.publisher.stop().await;
        if let Some(health) = &self.health {
            health.stop().await;
        }
        // Every worker is cancelled before any is joined.
        join_all(self.workers.iter().map(|w| w.stop())).await;
        self.ingester.stop().await;
        self.bridge.shutdown().await;
        info!("Gateway stopped");
    }
}

/// Run the gateway on real hardware until Ctrl-C.
pub async fn run(config: Config) -> Result<(), GatewayError> {
    config.validate()?;

    let store = Store::open(&config.storage.path)?;
    let transport = SerialPortTransport::new(
        config.gateway.serial_port.clone(),
        config.gateway.serial_baud,
    );
    let gateway = Gateway::start(
        &config,
        Arc::new(BleConnector::default()),
        Box::new(transport),
        store,
        BridgeOptions::default(),
    )
    .await?;

    let signal = tokio::signal::ctrl_c().await;
    info!("Shutdown signal received");
    gateway.shutdown().await;
    signal.map_err(GatewayError::Signal)
}
