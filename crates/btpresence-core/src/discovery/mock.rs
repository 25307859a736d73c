//! In-process discovery for tests and for builds without BlueZ.
//!
//! Devices are scripted up front and can be changed at runtime. Every call to
//! the primitive is counted so tests can assert on radio traffic.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{BluetoothError, BluetoothResult, Discovery};
use crate::address::BtAddress;
use crate::types::Observation;

/// A scripted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDevice {
    /// Hardware address.
    pub address: BtAddress,
    /// Name returned by inquiries and lookups.
    pub name: String,
    /// Answers broad inquiries.
    pub discoverable: bool,
    /// Answers targeted lookups.
    pub in_range: bool,
    /// Lookups come back with the name, not just an answer.
    pub resolves_name: bool,
}

impl MockDevice {
    /// A discoverable, in-range device.
    #[must_use]
    pub fn new(address: BtAddress, name: impl Into<String>) -> Self {
        Self {
            address,
            name: name.into(),
            discoverable: true,
            in_range: true,
            resolves_name: true,
        }
    }

    /// Do not answer broad inquiries.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.discoverable = false;
        self
    }

    /// Do not answer lookups.
    #[must_use]
    pub const fn out_of_range(mut self) -> Self {
        self.in_range = false;
        self
    }

    /// Answer lookups without a name.
    #[must_use]
    pub const fn unresolved(mut self) -> Self {
        self.resolves_name = false;
        self
    }
}

/// Scripted [`Discovery`] implementation.
#[derive(Debug, Default)]
pub struct MockDiscovery {
    devices: Mutex<Vec<MockDevice>>,
    failing_lookups: Mutex<HashSet<BtAddress>>,
    lookup_log: Mutex<Vec<BtAddress>>,
    fail_inquiry: AtomicBool,
    fail_cancel: AtomicBool,
    inquiry_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl MockDiscovery {
    /// No devices in range.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `devices` in range.
    #[must_use]
    pub fn with_devices(devices: Vec<MockDevice>) -> Self {
        Self {
            devices: Mutex::new(devices),
            ..Self::default()
        }
    }

    /// Add or replace a device.
    pub fn upsert(&self, device: MockDevice) {
        let mut devices = lock(&self.devices);
        devices.retain(|d| d.address != device.address);
        devices.push(device);
    }

    /// Make every inquiry fail (or stop failing).
    pub fn fail_inquiry(&self, fail: bool) {
        self.fail_inquiry.store(fail, Ordering::SeqCst);
    }

    /// Make inquiry cancellation fail (or stop failing).
    pub fn fail_cancel(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }

    /// Make lookups of `address` fail with a transport error.
    pub fn fail_lookup(&self, address: BtAddress) {
        lock(&self.failing_lookups).insert(address);
    }

    /// Number of inquiries run so far.
    pub fn inquiry_calls(&self) -> usize {
        self.inquiry_calls.load(Ordering::SeqCst)
    }

    /// Number of lookups run so far.
    pub fn lookup_calls(&self) -> usize {
        lock(&self.lookup_log).len()
    }

    /// Addresses looked up so far, in call order.
    pub fn lookups(&self) -> Vec<BtAddress> {
        lock(&self.lookup_log).clone()
    }

    /// Number of cancellation requests so far.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn inquiry(&self, _duration: Duration) -> BluetoothResult<Vec<Observation>> {
        self.inquiry_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_inquiry.load(Ordering::SeqCst) {
            return Err(BluetoothError::DiscoveryFailed {
                message: "simulated inquiry failure".into(),
            });
        }

        Ok(lock(&self.devices)
            .iter()
            .filter(|d| d.discoverable)
            .map(|d| Observation::new(d.address, Some(d.name.clone())))
            .collect())
    }

    async fn lookup_name(
        &self,
        address: BtAddress,
        _timeout: Duration,
    ) -> BluetoothResult<Option<Observation>> {
        lock(&self.lookup_log).push(address);
        if lock(&self.failing_lookups).contains(&address) {
            return Err(BluetoothError::LookupFailed {
                address: address.to_string(),
                message: "simulated lookup failure".into(),
            });
        }

        Ok(lock(&self.devices)
            .iter()
            .find(|d| d.address == address && d.in_range)
            .map(|d| Observation::new(address, d.resolves_name.then(|| d.name.clone()))))
    }

    async fn cancel_inquiry(&self) -> BluetoothResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(BluetoothError::CancelFailed {
                message: "simulated cancel failure".into(),
            });
        }
        Ok(())
    }
}
