//! Bluetooth device discovery.
//!
//! Two layers live here:
//!
//! - [`Discovery`] is the radio primitive: a broad inquiry, a targeted name
//!   lookup and inquiry cancellation. It reports transport failures as
//!   [`BluetoothError`].
//! - [`DiscoveryAdapter`] wraps a primitive for the poll loop. It checks the
//!   enabled flag, logs transport failures, and turns every call into an
//!   outcome value so nothing can escape the polling boundary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error};

use crate::address::BtAddress;
use crate::control::EnabledFlag;
use crate::types::Observation;

#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod mock;

/// Default inquiry length: 8 inquiry units of 1.28 s.
pub const DEFAULT_INQUIRY_DURATION: Duration = Duration::from_millis(8 * 1280);

/// Default wait for a targeted name lookup.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Failures of the Bluetooth transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BluetoothError {
    /// No adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Connecting to the Bluetooth daemon failed.
    #[error("Failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Underlying error.
        message: String,
    },

    /// The inquiry could not be run.
    #[error("Bluetooth discovery failed: {message}")]
    DiscoveryFailed {
        /// Underlying error.
        message: String,
    },

    /// A targeted lookup failed for a reason other than "no answer".
    #[error("Name lookup for {address} failed: {message}")]
    LookupFailed {
        /// Address that was looked up.
        address: String,
        /// Underlying error.
        message: String,
    },

    /// The radio refused to cancel the inquiry.
    #[error("Failed to cancel inquiry: {message}")]
    CancelFailed {
        /// Underlying error.
        message: String,
    },

    /// Anything else reported by the Bluetooth stack.
    #[error("Bluetooth error: {message}")]
    Internal {
        /// Underlying error.
        message: String,
    },
}

/// Result type for [`Discovery`] primitives.
pub type BluetoothResult<T> = std::result::Result<T, BluetoothError>;

/// Radio-level discovery primitive.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Run a broad inquiry for `duration`, resolving names of the responders.
    async fn inquiry(&self, duration: Duration) -> BluetoothResult<Vec<Observation>>;

    /// Page one device and resolve its name, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the device did not answer in time. A device that
    /// answered but whose name the radio does not know comes back with
    /// `name: None`.
    async fn lookup_name(
        &self,
        address: BtAddress,
        timeout: Duration,
    ) -> BluetoothResult<Option<Observation>>;

    /// Abort an inquiry in flight, if any.
    async fn cancel_inquiry(&self) -> BluetoothResult<()>;
}

/// Result of [`DiscoveryAdapter::scan_new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The inquiry ran; these devices answered.
    Devices(Vec<Observation>),
    /// The tracker is disabled; the radio was not touched.
    Disabled,
    /// The inquiry failed and was logged.
    Failed {
        /// Rendered transport error.
        reason: String,
    },
}

impl ScanOutcome {
    /// The discovered devices; empty for `Disabled` and `Failed`.
    #[must_use]
    pub fn into_devices(self) -> Vec<Observation> {
        match self {
            Self::Devices(devices) => devices,
            Self::Disabled | Self::Failed { .. } => Vec::new(),
        }
    }
}

/// Result of [`DiscoveryAdapter::lookup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    /// The device answered.
    Present(Observation),
    /// No answer within the timeout. Not an error.
    Absent,
    /// The lookup failed and was logged.
    Failed {
        /// Rendered transport error.
        reason: String,
    },
}

/// Discovery as seen by the poll loop.
#[derive(Clone)]
pub struct DiscoveryAdapter {
    radio: Arc<dyn Discovery>,
    flag: EnabledFlag,
    inquiry_duration: Duration,
}

impl DiscoveryAdapter {
    /// Wrap `radio`, gating broad scans on `flag`.
    #[must_use]
    pub fn new(radio: Arc<dyn Discovery>, flag: EnabledFlag, inquiry_duration: Duration) -> Self {
        Self {
            radio,
            flag,
            inquiry_duration,
        }
    }

    /// Broad scan for nearby devices.
    ///
    /// Safe to call at any time: returns [`ScanOutcome::Disabled`] without
    /// touching the radio when the tracker is off.
    pub async fn scan_new(&self) -> ScanOutcome {
        if !self.flag.is_enabled() {
            return ScanOutcome::Disabled;
        }

        debug!("Discovering Bluetooth devices");
        match self.radio.inquiry(self.inquiry_duration).await {
            Ok(devices) => {
                debug!(count = devices.len(), "Bluetooth devices discovered");
                ScanOutcome::Devices(devices)
            }
            Err(e) => {
                error!(error = %e, "Error discovering Bluetooth devices");
                ScanOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Targeted name lookup of one known address.
    pub async fn lookup(&self, address: BtAddress, timeout: Duration) -> LookupOutcome {
        debug!(%address, "Looking up Bluetooth device");
        match self.radio.lookup_name(address, timeout).await {
            Ok(Some(observation)) => LookupOutcome::Present(observation),
            Ok(None) => LookupOutcome::Absent,
            Err(e) => {
                error!(%address, error = %e, "Error looking up Bluetooth device");
                LookupOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockDevice, MockDiscovery};
    use super::*;
    use crate::state::InMemoryStateStore;

    fn addr(s: &str) -> BtAddress {
        s.parse().unwrap()
    }

    fn adapter(radio: Arc<MockDiscovery>, enabled: bool) -> DiscoveryAdapter {
        let flag = EnabledFlag::new(Arc::new(InMemoryStateStore::new()));
        flag.set(enabled);
        DiscoveryAdapter::new(radio, flag, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_scan_new_disabled_skips_radio() {
        let radio = Arc::new(MockDiscovery::with_devices(vec![MockDevice::new(
            addr("AA:BB:CC:DD:EE:01"),
            "Phone",
        )]));
        let adapter = adapter(radio.clone(), false);

        assert_eq!(adapter.scan_new().await, ScanOutcome::Disabled);
        assert_eq!(radio.inquiry_calls(), 0);
    }

    #[tokio::test]
    async fn test_scan_new_returns_discoverable_devices() {
        let radio = Arc::new(MockDiscovery::with_devices(vec![
            MockDevice::new(addr("AA:BB:CC:DD:EE:01"), "Phone"),
            MockDevice::new(addr("AA:BB:CC:DD:EE:02"), "Watch").hidden(),
        ]));
        let adapter = adapter(radio, true);

        let devices = adapter.scan_new().await.into_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name.as_deref(), Some("Phone"));
    }

    #[tokio::test]
    async fn test_scan_failure_becomes_outcome() {
        let radio = Arc::new(MockDiscovery::new());
        radio.fail_inquiry(true);
        let adapter = adapter(radio, true);

        let outcome = adapter.scan_new().await;
        assert!(matches!(outcome, ScanOutcome::Failed { .. }));
        assert!(outcome.into_devices().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_outcomes() {
        let present = addr("AA:BB:CC:DD:EE:01");
        let away = addr("AA:BB:CC:DD:EE:02");
        let broken = addr("AA:BB:CC:DD:EE:03");
        let radio = Arc::new(MockDiscovery::with_devices(vec![
            MockDevice::new(present, "Phone"),
            MockDevice::new(away, "Tablet").out_of_range(),
        ]));
        radio.fail_lookup(broken);
        let adapter = adapter(radio, true);
        let timeout = Duration::from_millis(10);

        assert_eq!(
            adapter.lookup(present, timeout).await,
            LookupOutcome::Present(Observation::new(present, Some("Phone".into())))
        );
        assert_eq!(adapter.lookup(away, timeout).await, LookupOutcome::Absent);
        assert!(matches!(
            adapter.lookup(broken, timeout).await,
            LookupOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_default_inquiry_duration() {
        assert_eq!(DEFAULT_INQUIRY_DURATION, Duration::from_millis(10_240));
    }
}
