//! Peripheral lookup by address or name.
//!
//! Configured peripherals are looked up among the adapter's known
//! peripherals first; only when that misses is an active scan started,
//! with a few attempts of increasing length.

use std::time::Duration;

use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::util::{format_peripheral_id, normalize_address};

/// Options for looking up a peripheral.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Base scan duration; attempt `n` scans for `n * duration`.
    pub duration: Duration,
    /// Number of scan attempts after a cache miss.
    pub attempts: u32,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(3),
            attempts: 3,
        }
    }
}

impl ScanOptions {
    /// Set the base scan duration.
    #[must_use]
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Set the number of scan attempts.
    #[must_use]
    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }
}

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or_else(|| Error::device_not_found("no Bluetooth adapter available"))
}

/// Find a peripheral by address, platform identifier or name.
pub async fn find_device(adapter: &Adapter, identifier: &str, options: &ScanOptions) -> Result<Peripheral> {
    if let Some(peripheral) = find_peripheral_by_identifier(adapter, identifier).await? {
        debug!("Found {} among known peripherals", identifier);
        return Ok(peripheral);
    }

    for attempt in 1..=options.attempts {
        let scan_duration = options.duration * attempt;
        info!(
            "Scanning for {} (attempt {}/{}, {:?})",
            identifier, attempt, options.attempts, scan_duration
        );

        adapter.start_scan(ScanFilter::default()).await?;
        sleep(scan_duration).await;
        adapter.stop_scan().await?;

        if let Some(peripheral) = find_peripheral_by_identifier(adapter, identifier).await? {
            info!("Found {} on attempt {}", identifier, attempt);
            return Ok(peripheral);
        }
    }

    warn!(
        "{} not found after {} scan attempts",
        identifier, options.attempts
    );
    Err(Error::device_not_found(identifier))
}

/// Search the adapter's known peripherals for one matching `identifier`.
async fn find_peripheral_by_identifier(
    adapter: &Adapter,
    identifier: &str,
) -> Result<Option<Peripheral>> {
    let wanted_address = normalize_address(identifier);
    let identifier_lower = identifier.to_lowercase();

    for peripheral in adapter.peripherals().await? {
        let Ok(Some(props)) = peripheral.properties().await else {
            continue;
        };

        let address = props.address.to_string();
        if address != "00:00:00:00:00:00"
            && wanted_address.len() == 12
            && normalize_address(&address) == wanted_address
        {
            debug!("Matched by address: {}", address);
            return Ok(Some(peripheral));
        }

        // macOS exposes a CoreBluetooth UUID instead of the address
        let peripheral_id = format_peripheral_id(&peripheral.id()).to_lowercase();
        if peripheral_id == identifier_lower {
            debug!("Matched by peripheral ID: {}", peripheral_id);
            return Ok(Some(peripheral));
        }

        if let Some(name) = &props.local_name
            && name.eq_ignore_ascii_case(identifier)
        {
            debug!("Matched by name: {}", name);
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_options_builder() {
        let options = ScanOptions::default()
            .duration(Duration::from_secs(2))
            .attempts(0);
        assert_eq!(options.duration, Duration::from_secs(2));
        assert_eq!(options.attempts, 1);
    }
}
