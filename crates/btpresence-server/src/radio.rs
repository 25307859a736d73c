//! Radio selection.
//!
//! With the `bluetooth` feature the tracker drives BlueZ. Without it the
//! `simulated` devices from the configuration answer instead.

use std::sync::Arc;

use btpresence_core::{
    BtAddress, Discovery, MockDevice, MockDiscovery, PresenceError, SimulatedDevice,
};
use tracing::{info, warn};

/// Build the radio the tracker will use.
///
/// # Errors
///
/// Returns an error if the Bluetooth adapter cannot be opened, or a
/// simulated device has an invalid address.
#[cfg(feature = "bluetooth")]
pub async fn build(config: &btpresence_core::Config) -> btpresence_core::Result<Arc<dyn Discovery>> {
    if !config.simulated.is_empty() {
        warn!("Ignoring simulated devices, BlueZ support is compiled in");
    }
    let radio = btpresence_core::BluezDiscovery::new().await?;
    info!("Using BlueZ Bluetooth radio");
    Ok(Arc::new(radio))
}

/// Build the radio the tracker will use.
///
/// # Errors
///
/// Returns an error if a simulated device has an invalid address.
#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
pub async fn build(config: &btpresence_core::Config) -> btpresence_core::Result<Arc<dyn Discovery>> {
    if config.simulated.is_empty() {
        warn!("BlueZ support not compiled in and no simulated devices configured");
    }
    let radio = simulated(&config.simulated)?;
    info!(devices = config.simulated.len(), "Using simulated Bluetooth radio");
    Ok(Arc::new(radio))
}

/// Mock radio answering for `devices`.
///
/// # Errors
///
/// Returns [`PresenceError::InvalidAddress`] for the first bad address.
pub fn simulated(devices: &[SimulatedDevice]) -> Result<MockDiscovery, PresenceError> {
    let devices = devices
        .iter()
        .map(|device| -> Result<MockDevice, PresenceError> {
            let address: BtAddress = device.address.parse()?;
            let mut mock = MockDevice::new(address, device.name.clone());
            if !device.discoverable {
                mock = mock.hidden();
            }
            if !device.present {
                mock = mock.out_of_range();
            }
            Ok(mock)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MockDiscovery::with_devices(devices))
}
