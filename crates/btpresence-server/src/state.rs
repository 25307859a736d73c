//! Application state shared across handlers.

use std::sync::Arc;

use btpresence_core::{
    setup, BluetoothTracker, Config, Discovery, InMemoryStateStore, PollLoop, PollTask,
    Scheduler, StateStore, TrackerControl,
};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::presence::PresenceRegistry;
use crate::services::{register_tracker_services, ServiceRegistry};

/// Shared application state type used by all handlers.
pub type SharedState = Arc<RwLock<AppState>>;

/// Everything the HTTP surface reads from.
pub struct AppState {
    /// Effective configuration.
    pub config: Config,

    /// Entity states, including the tracker's on/off entity.
    pub store: Arc<dyn StateStore>,

    /// Aggregated device sightings.
    pub registry: Arc<PresenceRegistry>,

    /// Invocable services.
    pub services: Arc<ServiceRegistry>,

    /// The presence tracker.
    pub tracker: Arc<BluetoothTracker>,

    /// Enable/disable surface of the tracker.
    pub control: TrackerControl,

    /// The running poll loop, once armed.
    pub poll_loop: Option<Arc<PollLoop>>,

    /// When the host came up.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Wire the tracker to fresh host collaborators and run its startup.
    ///
    /// The poll loop is not armed; see [`AppState::start_polling`].
    ///
    /// # Errors
    ///
    /// Returns an error if the tracker cannot be set up, e.g. because the
    /// known-devices file is malformed.
    pub async fn initialize(config: Config, radio: Arc<dyn Discovery>) -> btpresence_core::Result<Self> {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let registry = Arc::new(PresenceRegistry::new(config.server.consider_home()));

        let handle = setup(&config.tracker, radio, Arc::clone(&store), registry.clone()).await?;

        let services = Arc::new(ServiceRegistry::new());
        register_tracker_services(&services, &handle.control);

        Ok(Self {
            config,
            store,
            registry,
            services,
            tracker: handle.tracker,
            control: handle.control,
            poll_loop: None,
            started_at: Utc::now(),
        })
    }

    /// Arm the poll loop on `scheduler`, first cycle at `at`.
    pub fn start_polling(&mut self, scheduler: Arc<dyn Scheduler>, at: DateTime<Utc>) -> Arc<PollLoop> {
        let task: Arc<dyn PollTask> = self.tracker.clone();
        let poll_loop = PollLoop::new(task, scheduler, self.config.tracker.scan_interval());
        poll_loop.start(at);
        self.poll_loop = Some(Arc::clone(&poll_loop));
        poll_loop
    }

    /// Wrap into the handler state type.
    #[must_use]
    pub fn shared(self) -> SharedState {
        Arc::new(RwLock::new(self))
    }
}
