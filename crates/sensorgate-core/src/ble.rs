//! btleplug backend for [`GattLink`].
//!
//! btleplug does not expose ATT handles on every platform, so the link
//! assigns handles in discovery order following the usual GATT layout:
//! service declaration, then per characteristic a declaration, the value
//! handle and one handle per descriptor. The worker only compares handles
//! it obtained from the same link, so the numbering only needs to be
//! consistent within one connection.
//!
//! BlueZ and CoreBluetooth own the CCCD and reject raw writes to it, so a
//! CCCD write is carried out through `subscribe` on the parent
//! characteristic.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    CharPropFlags, Characteristic, Descriptor, Peripheral as _, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::{FutureExt, Stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use sensorgate_types::uuids::CLIENT_CHARACTERISTIC_CONFIG;

use crate::error::{Error, Result};
use crate::link::{
    CharacteristicInfo, DescriptorInfo, GattLink, LinkConnector, NotificationHandler,
};
use crate::scan::{ScanOptions, find_device, get_adapter};

/// Default timeout for establishing a connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for individual writes.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Connection timeouts for the btleplug backend.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for write operations.
    pub write_timeout: Duration,
    /// Peripheral lookup options.
    pub scan: ScanOptions,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            scan: ScanOptions::default(),
        }
    }
}

/// Opens [`BleLink`]s through the first Bluetooth adapter.
#[derive(Debug, Clone, Default)]
pub struct BleConnector {
    config: ConnectionConfig,
}

impl BleConnector {
    /// Create a connector with custom timeouts.
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl LinkConnector for BleConnector {
    #[tracing::instrument(level = "info", skip(self))]
    async fn connect(&self, address: &str) -> Result<Box<dyn GattLink>> {
        let adapter = get_adapter().await?;
        let peripheral = find_device(&adapter, address, &self.config.scan).await?;
        let link = BleLink::open(adapter, peripheral, self.config.clone()).await?;
        Ok(Box::new(link))
    }
}

struct HandleEntry {
    handle: u16,
    characteristic: Characteristic,
}

struct DescriptorEntry {
    handle: u16,
    descriptor: Descriptor,
    parent: Characteristic,
}

/// A connected btleplug peripheral.
pub struct BleLink {
    // Keeps the adapter alive for the lifetime of the connection.
    #[allow(dead_code)]
    adapter: Adapter,
    peripheral: Peripheral,
    characteristics: Vec<HandleEntry>,
    descriptors: Vec<DescriptorEntry>,
    notifications: Option<NotificationStream>,
    handler: Option<NotificationHandler>,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("characteristics", &self.characteristics.len())
            .field("descriptors", &self.descriptors.len())
            .field("streaming", &self.notifications.is_some())
            .finish_non_exhaustive()
    }
}

impl BleLink {
    /// Connect to `peripheral` and discover its services.
    pub async fn open(
        adapter: Adapter,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        info!("Connecting...");
        timeout(config.connection_timeout, peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect", config.connection_timeout))??;

        timeout(config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", config.discovery_timeout))??;

        let mut characteristics = Vec::new();
        let mut descriptors = Vec::new();
        let mut next: u16 = 1;
        for service in peripheral.services() {
            debug!("Service: {}", service.uuid);
            next = next.saturating_add(1);
            for characteristic in service.characteristics {
                next = next.saturating_add(1);
                let handle = next;
                next = next.saturating_add(1);
                debug!(
                    "  Characteristic {} handle={} props={:?}",
                    characteristic.uuid, handle, characteristic.properties
                );
                for descriptor in &characteristic.descriptors {
                    descriptors.push(DescriptorEntry {
                        handle: next,
                        descriptor: descriptor.clone(),
                        parent: characteristic.clone(),
                    });
                    next = next.saturating_add(1);
                }
                characteristics.push(HandleEntry {
                    handle,
                    characteristic,
                });
            }
        }
        info!(
            "Connected ({} characteristics, {} descriptors)",
            characteristics.len(),
            descriptors.len()
        );

        Ok(Self {
            adapter,
            peripheral,
            characteristics,
            descriptors,
            notifications: None,
            handler: None,
            config,
        })
    }

    fn deliver(&mut self, notification: ValueNotification) {
        if let Some(handler) = self.handler.as_mut() {
            handler(&notification.value);
        }
    }
}

#[async_trait]
impl GattLink for BleLink {
    async fn characteristic(&mut self, uuid: Uuid) -> Result<CharacteristicInfo> {
        let entry = find(&self.characteristics, uuid)
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), self.characteristics.len()))?;
        let props = entry.characteristic.properties;
        Ok(CharacteristicInfo {
            uuid,
            handle: entry.handle,
            notify: props.contains(CharPropFlags::NOTIFY) || props.contains(CharPropFlags::INDICATE),
        })
    }

    async fn descriptors(&mut self, start: u16, end: u16) -> Result<Vec<DescriptorInfo>> {
        Ok(self
            .descriptors
            .iter()
            .filter(|d| (start..=end).contains(&d.handle))
            .map(|d| DescriptorInfo {
                handle: d.handle,
                uuid: d.descriptor.uuid,
            })
            .collect())
    }

    async fn write_without_response(
        &mut self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<()> {
        let entry = find(&self.characteristics, characteristic.uuid).ok_or_else(|| {
            Error::characteristic_not_found(characteristic.uuid.to_string(), self.characteristics.len())
        })?;
        timeout(
            self.config.write_timeout,
            self.peripheral
                .write(&entry.characteristic, data, WriteType::WithoutResponse),
        )
        .await
        .map_err(|_| Error::timeout("write without response", self.config.write_timeout))??;
        Ok(())
    }

    async fn write_descriptor(&mut self, handle: u16, value: &[u8]) -> Result<()> {
        if let Some(entry) = self.descriptors.iter().find(|d| d.handle == handle) {
            if entry.descriptor.uuid == CLIENT_CHARACTERISTIC_CONFIG {
                debug!("CCCD write {:02x?} via subscribe on {}", value, entry.parent.uuid);
                return subscribe(&self.peripheral, &entry.parent, self.config.write_timeout).await;
            }
            timeout(
                self.config.write_timeout,
                self.peripheral.write_descriptor(&entry.descriptor, value),
            )
            .await
            .map_err(|_| Error::timeout("write descriptor", self.config.write_timeout))??;
            return Ok(());
        }

        // Firmware that lists no descriptors: handle + 1 is the CCCD.
        if let Some(entry) = self
            .characteristics
            .iter()
            .find(|e| e.handle.checked_add(1) == Some(handle))
        {
            debug!("Unlisted CCCD 0x{:04x}, subscribing to {}", handle, entry.characteristic.uuid);
            return subscribe(&self.peripheral, &entry.characteristic, self.config.write_timeout)
                .await;
        }

        Err(Error::write_failed(
            format!("handle 0x{handle:04x}"),
            "unknown descriptor handle",
        ))
    }

    async fn set_notification_handler(&mut self, handler: NotificationHandler) -> Result<()> {
        let stream = self.peripheral.notifications().await?;
        self.notifications = Some(stream);
        self.handler = Some(handler);
        Ok(())
    }

    async fn wait_for_notifications(&mut self, wait: Duration) -> Result<bool> {
        let Some(stream) = self.notifications.as_mut() else {
            tokio::time::sleep(wait).await;
            return Ok(false);
        };

        match timeout(wait, stream.next()).await {
            Ok(Some(first)) => {
                let mut ready = vec![first];
                while let Some(Some(more)) = stream.next().now_or_never() {
                    ready.push(more);
                }
                for notification in ready {
                    self.deliver(notification);
                }
                Ok(true)
            }
            Ok(None) => Err(Error::NotConnected),
            Err(_) => {
                if self.peripheral.is_connected().await? {
                    Ok(false)
                } else {
                    Err(Error::NotConnected)
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.notifications = None;
        self.handler = None;
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

async fn subscribe(
    peripheral: &Peripheral,
    characteristic: &Characteristic,
    wait: Duration,
) -> Result<()> {
    timeout(wait, peripheral.subscribe(characteristic))
        .await
        .map_err(|_| Error::timeout("subscribe", wait))??;
    Ok(())
}

fn find(entries: &[HandleEntry], uuid: Uuid) -> Option<&HandleEntry> {
    entries.iter().find(|e| e.characteristic.uuid == uuid)
}
