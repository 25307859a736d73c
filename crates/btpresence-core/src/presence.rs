//! Presence reporting.
//!
//! Every successful lookup becomes one `see` call on the host's presence sink.
//! Aggregation (last seen, consider-home windows) is the sink's job.

use std::sync::Arc;

use tracing::debug;

use crate::tracking::BT_PREFIX;
use crate::types::Observation;

/// The host's "device seen" ingestion point.
pub trait PresenceSink: Send + Sync {
    /// Record that the device `mac` was observed, optionally with its name.
    fn see(&self, mac: &str, host_name: Option<&str>);
}

/// Forwards observations to a [`PresenceSink`] under the Bluetooth namespace.
#[derive(Clone)]
pub struct PresenceReporter {
    sink: Arc<dyn PresenceSink>,
}

impl PresenceReporter {
    /// Report into `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn PresenceSink>) -> Self {
        Self { sink }
    }

    /// Forward one observation verbatim.
    pub fn report(&self, observation: &Observation) {
        let mac = format!("{BT_PREFIX}{}", observation.address);
        debug!(%mac, name = ?observation.name, "Reporting Bluetooth device as seen");
        self.sink.see(&mac, observation.name.as_deref());
    }
}
