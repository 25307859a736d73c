//! Enable/disable control surface.
//!
//! The tracker's on/off switch is an entity state in the host's
//! [`StateStore`]. It is read before every gated action instead of being
//! snapshotted, so a disable issued while a poll cycle is running stops the
//! remaining lookups of that same cycle.

use std::sync::Arc;

use tracing::{error, info};

use crate::discovery::Discovery;
use crate::state::{EntityState, StateStore};

/// Service domain the tracker registers under.
pub const DOMAIN: &str = "device_tracker";

/// Entity holding the enabled flag.
pub const ENTITY_ID: &str = "device_tracker.bluetooth_tracker";

/// Service name for [`TrackerControl::enable`].
pub const SERVICE_TURN_ON: &str = "bluetooth_tracker_turn_on";

/// Service name for [`TrackerControl::disable`].
pub const SERVICE_TURN_OFF: &str = "bluetooth_tracker_turn_off";

/// Handle to the tracker's on/off entity.
#[derive(Clone)]
pub struct EnabledFlag {
    store: Arc<dyn StateStore>,
    entity_id: String,
}

impl EnabledFlag {
    /// Flag backed by [`ENTITY_ID`] in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            entity_id: ENTITY_ID.to_string(),
        }
    }

    /// Current value. An entity without state counts as disabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        matches!(
            self.store.get(&self.entity_id).map(|record| record.state),
            Some(EntityState::On)
        )
    }

    /// Stored value, or `None` if the entity was never written.
    #[must_use]
    pub fn stored(&self) -> Option<EntityState> {
        self.store.get(&self.entity_id).map(|record| record.state)
    }

    /// Drive the flag to `enabled`.
    pub fn set(&self, enabled: bool) {
        let state = if enabled {
            EntityState::On
        } else {
            EntityState::Off
        };
        self.store.set(&self.entity_id, state);
    }

    /// Entity id of the flag.
    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl std::fmt::Debug for EnabledFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnabledFlag")
            .field("entity_id", &self.entity_id)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// The two externally invocable actions: enable and disable.
#[derive(Clone)]
pub struct TrackerControl {
    flag: EnabledFlag,
    radio: Arc<dyn Discovery>,
}

impl TrackerControl {
    /// Create the control surface over `flag`, cancelling inquiries on `radio`.
    #[must_use]
    pub fn new(flag: EnabledFlag, radio: Arc<dyn Discovery>) -> Self {
        Self { flag, radio }
    }

    /// Turn the tracker on.
    pub fn enable(&self) {
        info!(entity_id = %self.flag.entity_id(), "Turning on Bluetooth tracker");
        self.flag.set(true);
    }

    /// Turn the tracker off.
    ///
    /// Cancels any inquiry in flight on the radio first. If that fails the
    /// error is logged and the flag is still driven off.
    pub async fn disable(&self) {
        info!(entity_id = %self.flag.entity_id(), "Turning off Bluetooth tracker");

        match self.radio.cancel_inquiry().await {
            Ok(()) => info!("Turned off Bluetooth tracker"),
            Err(e) => error!(error = %e, "Error cancelling Bluetooth inquiry"),
        }

        self.flag.set(false);
    }

    /// Apply the startup rule: a tracker with no stored state, or one that
    /// was on, is enabled. A tracker restored as off stays off.
    ///
    /// Returns whether the tracker is enabled afterwards.
    pub fn restore(&self) -> bool {
        match self.flag.stored() {
            None | Some(EntityState::On) => {
                self.enable();
                true
            }
            Some(EntityState::Off) => {
                info!(entity_id = %self.flag.entity_id(), "Bluetooth tracker restored as off");
                false
            }
        }
    }

    /// The flag this surface drives.
    #[must_use]
    pub const fn flag(&self) -> &EnabledFlag {
        &self.flag
    }
}
