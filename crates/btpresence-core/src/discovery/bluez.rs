//! BlueZ-backed discovery (Linux only).
//!
//! Inquiries run through the BlueZ D-Bus API restricted to BR/EDR. A targeted
//! lookup pages the device by opening an L2CAP connection to its SDP channel;
//! a device that answers the page is present, one that does not is absent.
//!
//! Every inquiry drops unpaired devices from BlueZ, so their names are kept in
//! a [`NameCache`] that lookups fall back on.

use std::collections::HashMap;
use std::io;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bluer::l2cap::{SocketAddr, Stream};
use bluer::{Adapter, AdapterEvent, Address, AddressType, DiscoveryFilter, DiscoveryTransport};
use futures::StreamExt;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::{BluetoothError, BluetoothResult, Discovery};
use crate::address::BtAddress;
use crate::types::Observation;

/// L2CAP PSM of the SDP server, present on every classic device.
const SDP_PSM: u16 = 1;

// errno values reported when a page goes unanswered.
const EHOSTDOWN: i32 = 112;
const EHOSTUNREACH: i32 = 113;

/// Last known name of each device, kept across BlueZ cache flushes.
#[derive(Debug, Default)]
struct NameCache(Mutex<HashMap<Address, String>>);

impl NameCache {
    fn remember(&self, address: Address, name: &str) {
        if name.is_empty() {
            return;
        }
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address, name.to_string());
    }

    fn get(&self, address: Address) -> Option<String> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&address)
            .cloned()
    }
}

/// [`Discovery`] over the default BlueZ adapter.
pub struct BluezDiscovery {
    adapter: Adapter,
    cancel: Notify,
    names: NameCache,
    _session: bluer::Session,
}

impl BluezDiscovery {
    /// Open a session to `bluetoothd` and power on the default adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the daemon is unreachable, there is no adapter, or
    /// the adapter cannot be powered on.
    pub async fn new() -> BluetoothResult<Self> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| BluetoothError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| BluetoothError::AdapterNotFound)?;

        if !adapter.is_powered().await.map_err(internal)? {
            adapter
                .set_powered(true)
                .await
                .map_err(|_| BluetoothError::AdapterPoweredOff)?;
        }

        info!(adapter = %adapter.name(), "Using Bluetooth adapter");

        Ok(Self {
            adapter,
            cancel: Notify::new(),
            names: NameCache::default(),
            _session: session,
        })
    }

    /// Forget devices BlueZ remembers from earlier inquiries so that only
    /// current responders are reported. Paired and connected devices stay.
    async fn flush_cache(&self) -> BluetoothResult<()> {
        let addresses = self.adapter.device_addresses().await.map_err(discovery)?;
        for address in addresses {
            let Ok(device) = self.adapter.device(address) else {
                continue;
            };
            let keep = device.is_paired().await.unwrap_or(true)
                || device.is_connected().await.unwrap_or(true);
            if keep {
                continue;
            }
            if let Ok(Some(name)) = device.name().await {
                self.names.remember(address, &name);
            }
            if let Err(e) = self.adapter.remove_device(address).await {
                debug!(%address, error = %e, "Could not drop cached device");
            }
        }
        Ok(())
    }

    /// Name BlueZ currently holds for `address`, remembered for later.
    async fn resolved_name(&self, address: Address) -> Option<String> {
        let device = self.adapter.device(address).ok()?;
        let name = match device.name().await {
            Ok(Some(name)) => name,
            _ => device
                .alias()
                .await
                .ok()
                .filter(|alias| !is_default_alias(alias, address))?,
        };
        self.names.remember(address, &name);
        Some(name)
    }

    /// Observation of a device that answered a page.
    async fn answered(&self, address: BtAddress, target: Address) -> Observation {
        let name = match self.resolved_name(target).await {
            Some(name) => Some(name),
            None => self.names.get(target),
        };
        if name.is_none() {
            debug!(%address, "Device answered without a known name");
        }
        Observation::new(address, name)
    }
}

#[async_trait]
impl Discovery for BluezDiscovery {
    async fn inquiry(&self, duration: Duration) -> BluetoothResult<Vec<Observation>> {
        self.flush_cache().await?;

        let filter = DiscoveryFilter {
            transport: DiscoveryTransport::BrEdr,
            ..DiscoveryFilter::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(discovery)?;

        let cancelled = self.cancel.notified();
        tokio::pin!(cancelled);

        let mut responders: Vec<Address> = Vec::new();
        {
            let events = self.adapter.discover_devices().await.map_err(discovery)?;
            tokio::pin!(events);
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);

            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    () = &mut cancelled => {
                        info!("Bluetooth inquiry cancelled");
                        break;
                    }
                    event = events.next() => match event {
                        Some(AdapterEvent::DeviceAdded(address)) => {
                            if !responders.contains(&address) {
                                responders.push(address);
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
            // Dropping the event stream stops discovery on the adapter.
        }

        let mut observations = Vec::with_capacity(responders.len());
        for address in responders {
            let name = self.resolved_name(address).await;
            observations.push(Observation::new(BtAddress::new(address.0), name));
        }
        Ok(observations)
    }

    async fn lookup_name(
        &self,
        address: BtAddress,
        timeout: Duration,
    ) -> BluetoothResult<Option<Observation>> {
        let target = Address::new(address.octets());
        let socket_addr = SocketAddr::new(target, AddressType::BrEdr, SDP_PSM);

        match tokio::time::timeout(timeout, Stream::connect(socket_addr)).await {
            Err(_) => Ok(None),
            Ok(Err(e)) if is_unanswered_page(&e) => Ok(None),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => {
                // The device answered the page but refused the channel.
                Ok(Some(self.answered(address, target).await))
            }
            Ok(Err(e)) => Err(BluetoothError::LookupFailed {
                address: address.to_string(),
                message: e.to_string(),
            }),
            Ok(Ok(stream)) => {
                drop(stream);
                Ok(Some(self.answered(address, target).await))
            }
        }
    }

    async fn cancel_inquiry(&self) -> BluetoothResult<()> {
        self.cancel.notify_waiters();
        let discovering = self
            .adapter
            .is_discovering()
            .await
            .map_err(|e| BluetoothError::CancelFailed {
                message: e.to_string(),
            })?;
        debug!(discovering, "Inquiry cancellation requested");
        Ok(())
    }
}

fn is_unanswered_page(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::TimedOut
        || matches!(e.raw_os_error(), Some(EHOSTDOWN | EHOSTUNREACH))
}

/// Without a name BlueZ aliases a device to its dashed address.
fn is_default_alias(alias: &str, address: Address) -> bool {
    alias == address.to_string().replace(':', "-")
}

fn discovery(e: bluer::Error) -> BluetoothError {
    BluetoothError::DiscoveryFailed {
        message: e.to_string(),
    }
}

fn internal(e: bluer::Error) -> BluetoothError {
    BluetoothError::Internal {
        message: e.to_string(),
    }
}
