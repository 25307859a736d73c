//! # btpresence-core
//!
//! Core logic for the btpresence Bluetooth presence tracker.
//!
//! This crate provides:
//! - Bluetooth discovery (broad inquiry and targeted name lookup)
//! - The tracking set of polled addresses
//! - The self-rearming presence-polling loop
//! - Enable/disable control backed by an entity state store
//! - Configuration and known-devices loading
//!
//! ## Architecture
//!
//! - [`address`] - Bluetooth address parsing and validation
//! - [`discovery`] - Radio primitive trait, BlueZ and mock implementations, discovery adapter
//! - [`tracking`] - Track / do-not-track partitions
//! - [`presence`] - Presence sink trait and reporter
//! - [`control`] - Enabled flag and the enable/disable actions
//! - [`state`] - Entity state store
//! - [`scheduler`] - Single-shot scheduling primitive and the poll loop
//! - [`tracker`] - Poll cycle orchestration and startup
//! - [`known_devices`] - Persisted device records
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod control;
pub mod discovery;
pub mod error;
pub mod known_devices;
pub mod presence;
pub mod scheduler;
pub mod state;
pub mod tracker;
pub mod tracking;
pub mod types;

// Re-export primary types for convenience
pub use crate::address::{is_valid_mac_address, AddressError, BtAddress};
pub use crate::config::{
    Config, ConfigError, ConfigResult, ServerConfig, SimulatedDevice, TrackerConfig,
};
pub use crate::control::{EnabledFlag, TrackerControl};
#[cfg(feature = "bluetooth")]
pub use crate::discovery::bluez::BluezDiscovery;
pub use crate::discovery::mock::{MockDevice, MockDiscovery};
pub use crate::discovery::{
    BluetoothError, BluetoothResult, Discovery, DiscoveryAdapter, LookupOutcome, ScanOutcome,
};
pub use crate::error::{Error, PresenceError, Result};
pub use crate::known_devices::{KnownDevice, KnownDevicesError};
pub use crate::presence::{PresenceReporter, PresenceSink};
pub use crate::scheduler::{ManualScheduler, PollLoop, PollState, PollTask, Scheduler, TokioScheduler};
pub use crate::state::{EntityState, InMemoryStateStore, StateRecord, StateStore};
pub use crate::tracker::{setup, BluetoothTracker, CycleReport, TrackerHandle, TrackerSettings};
pub use crate::tracking::{TrackingSet, TrackingSnapshot, BT_PREFIX};
pub use crate::types::Observation;
