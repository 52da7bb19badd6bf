//! GATT link abstraction used by the device link worker.
//!
//! The worker only needs a handful of GATT operations: resolve a
//! characteristic, list descriptors in a handle range, write without
//! response, write a descriptor, and pump notifications. [`GattLink`]
//! captures exactly those so the worker can run against the btleplug
//! backend ([`crate::ble`]) or the mocks in [`crate::mock`].

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

/// Callback receiving raw notification chunks.
pub type NotificationHandler = Box<dyn FnMut(&[u8]) + Send>;

/// A resolved characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Value handle.
    pub handle: u16,
    /// Whether the characteristic supports notifications.
    pub notify: bool,
}

/// A descriptor discovered in a handle range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorInfo {
    /// Descriptor handle.
    pub handle: u16,
    /// Descriptor UUID.
    pub uuid: Uuid,
}

/// A live connection to one peripheral.
///
/// A link is owned by exactly one worker, so every operation takes
/// `&mut self`.
#[async_trait]
pub trait GattLink: Send {
    /// Resolve a characteristic by UUID.
    ///
    /// Fails with [`crate::Error::CharacteristicNotFound`] when absent.
    async fn characteristic(&mut self, uuid: Uuid) -> Result<CharacteristicInfo>;

    /// List descriptors whose handles fall in `start..=end`.
    async fn descriptors(&mut self, start: u16, end: u16) -> Result<Vec<DescriptorInfo>>;

    /// Write to a characteristic without waiting for a response.
    async fn write_without_response(
        &mut self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<()>;

    /// Write a descriptor value (with response).
    async fn write_descriptor(&mut self, handle: u16, value: &[u8]) -> Result<()>;

    /// Install the callback fed with every notification chunk.
    async fn set_notification_handler(&mut self, handler: NotificationHandler) -> Result<()>;

    /// Deliver pending notifications to the handler, waiting up to `timeout`.
    ///
    /// Returns `Ok(true)` when at least one notification was delivered.
    /// Link loss is reported as an error.
    async fn wait_for_notifications(&mut self, timeout: Duration) -> Result<bool>;

    /// Disconnect, best-effort.
    async fn disconnect(&mut self) -> Result<()>;
}

/// Opens links to peripherals by address.
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Connect to the peripheral at `address`.
    async fn connect(&self, address: &str) -> Result<Box<dyn GattLink>>;
}
